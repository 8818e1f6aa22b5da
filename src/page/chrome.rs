//! Chrome-backed page surface.
//!
//! A fixed interpreter script (`interpreter.js`) is installed into every
//! document. Commands are serialized to JSON and handed to it as data, and a
//! background poller drains its outbox to produce [`PageEvent`]s.

use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    NavigationState, PageCommand, PageError, PageEvent, PageMessage, PageSurface, Screenshot,
    Viewport,
};
use async_trait::async_trait;

const INTERPRETER_JS: &str = include_str!("interpreter.js");

/// Options for launching the browser.
#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub headless: bool,
    pub window_size: (u32, u32),
    /// Chrome executable; auto-detected when `None`.
    pub chrome_path: Option<PathBuf>,
    /// How often the page outbox is drained.
    pub poll_interval: Duration,
    /// JPEG quality for vision screenshots.
    pub screenshot_quality: u32,
}

impl Default for ChromeOptions {
    fn default() -> Self {
        Self {
            headless: true,
            window_size: (1280, 800),
            chrome_path: None,
            poll_interval: Duration::from_millis(200),
            screenshot_quality: 70,
        }
    }
}

impl ChromeOptions {
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_window_size(mut self, width: u32, height: u32) -> Self {
        self.window_size = (width, height);
        self
    }

    pub fn with_chrome_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.chrome_path = Some(path.into());
        self
    }
}

/// What the interpreter reports on each poll.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollReport {
    url: String,
    loading: bool,
    loaded: bool,
    can_go_back: bool,
    #[serde(default)]
    messages: Vec<Value>,
}

/// A single Chrome tab driven over the DevTools protocol.
pub struct ChromeSurface {
    _browser: Browser,
    tab: Arc<Tab>,
    events: mpsc::UnboundedSender<PageEvent>,
    screenshot_quality: u32,
}

impl ChromeSurface {
    /// Launch Chrome and open a tab.
    ///
    /// Must be called from within a tokio runtime: the outbox poller is
    /// spawned onto it and runs until the returned receiver is dropped.
    pub async fn launch(
        options: ChromeOptions,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<PageEvent>), PageError> {
        let launch_options = LaunchOptions {
            headless: options.headless,
            window_size: Some(options.window_size),
            path: options.chrome_path.clone(),
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };

        let (browser, tab) = tokio::task::spawn_blocking(move || {
            let browser = Browser::new(launch_options)?;
            let tab = browser.new_tab()?;
            Ok::<_, anyhow::Error>((browser, tab))
        })
        .await
        .map_err(|e| PageError::Launch(e.to_string()))?
        .map_err(|e| PageError::Launch(e.to_string()))?;

        info!(headless = options.headless, "Chrome surface launched");

        let (tx, rx) = mpsc::unbounded_channel();
        let surface = Arc::new(Self {
            _browser: browser,
            tab: tab.clone(),
            events: tx.clone(),
            screenshot_quality: options.screenshot_quality,
        });

        tokio::spawn(poll_outbox(tab, tx, options.poll_interval));

        Ok((surface, rx))
    }
}

/// Evaluate `script` in the tab and return its string result.
async fn evaluate_string(tab: Arc<Tab>, script: String) -> Result<String, PageError> {
    let result = tokio::task::spawn_blocking(move || tab.evaluate(&script, false))
        .await
        .map_err(|e| PageError::Script(e.to_string()))?
        .map_err(|e| PageError::Script(e.to_string()))?;

    match result.value {
        Some(Value::String(s)) => Ok(s),
        other => Err(PageError::Script(format!(
            "expected a string result, got {:?}",
            other
        ))),
    }
}

fn poll_script() -> String {
    format!(
        "(() => {{\n{}\nreturn window.__webAgent.poll();\n}})()",
        INTERPRETER_JS
    )
}

fn run_script(command: &PageCommand) -> Result<String, PageError> {
    let json = serde_json::to_string(command).map_err(|e| PageError::Script(e.to_string()))?;
    // The command travels as a JSON string literal and is parsed page-side.
    let literal = serde_json::to_string(&json).map_err(|e| PageError::Script(e.to_string()))?;
    Ok(format!(
        "(() => {{\n{}\nreturn String(window.__webAgent.run(JSON.parse({})));\n}})()",
        INTERPRETER_JS, literal
    ))
}

async fn poll_outbox(
    tab: Arc<Tab>,
    events: mpsc::UnboundedSender<PageEvent>,
    interval: Duration,
) {
    let script = poll_script();
    let mut was_loading = false;
    let mut last_url = String::new();

    loop {
        tokio::time::sleep(interval).await;
        if events.is_closed() {
            debug!("Page event receiver dropped, stopping poller");
            break;
        }

        let raw = match evaluate_string(tab.clone(), script.clone()).await {
            Ok(raw) => raw,
            Err(e) => {
                // Expected while a navigation replaces the document.
                debug!("Outbox poll failed: {}", e);
                continue;
            }
        };
        let report: PollReport = match serde_json::from_str(&raw) {
            Ok(report) => report,
            Err(e) => {
                warn!("Unreadable poll report: {}", e);
                continue;
            }
        };

        let mut batch = Vec::new();
        if report.loading && !was_loading {
            batch.push(PageEvent::LoadStart);
        }
        was_loading = report.loading;

        if report.loaded || report.url != last_url {
            last_url = report.url.clone();
            batch.push(PageEvent::Navigation(NavigationState {
                url: report.url.clone(),
                can_go_back: report.can_go_back,
                can_go_forward: false,
            }));
        }
        if report.loaded {
            batch.push(PageEvent::LoadEnd);
        }

        for value in report.messages {
            match serde_json::from_value::<PageMessage>(value) {
                Ok(message) => batch.push(PageEvent::Message(message)),
                Err(e) => warn!("Dropping malformed page message: {}", e),
            }
        }

        for event in batch {
            if events.send(event).is_err() {
                return;
            }
        }
    }
}

#[async_trait]
impl PageSurface for ChromeSurface {
    async fn load(&self, url: &str) -> Result<(), PageError> {
        info!("Loading {}", url);
        let _ = self.events.send(PageEvent::LoadStart);

        let tab = self.tab.clone();
        let target = url.to_string();
        tokio::task::spawn_blocking(move || tab.navigate_to(&target).map(|_| ()))
            .await
            .map_err(|e| PageError::Navigation(e.to_string()))?
            .map_err(|e| PageError::Navigation(e.to_string()))
    }

    async fn viewport(&self) -> Result<Viewport, PageError> {
        let raw = evaluate_string(
            self.tab.clone(),
            "JSON.stringify({width: window.innerWidth, height: window.innerHeight})".to_string(),
        )
        .await?;
        serde_json::from_str(&raw).map_err(|e| PageError::Script(e.to_string()))
    }

    async fn capture_screenshot(&self) -> Result<Screenshot, PageError> {
        let tab = self.tab.clone();
        let quality = self.screenshot_quality;
        let data = tokio::task::spawn_blocking(move || {
            tab.capture_screenshot(
                CaptureScreenshotFormatOption::Jpeg,
                Some(quality),
                None,
                true,
            )
        })
        .await
        .map_err(|e| PageError::Capture(e.to_string()))?
        .map_err(|e| PageError::Capture(e.to_string()))?;

        Ok(Screenshot::from_encoded(&data)?)
    }

    async fn dispatch(&self, command: PageCommand) -> Result<(), PageError> {
        let script = run_script(&command)?;
        let outcome = evaluate_string(self.tab.clone(), script).await?;
        debug!(outcome = %outcome, "Page command dispatched");
        if outcome == "unknown" {
            return Err(PageError::Script("interpreter rejected command".to_string()));
        }
        Ok(())
    }
}
