//! Page surface: the live web page the agent perceives and acts on.
//!
//! The agent never touches a browser directly. It talks to a [`PageSurface`]
//! and receives [`PageEvent`]s over a channel.

mod chrome;
mod messages;
mod screenshot;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use chrome::{ChromeOptions, ChromeSurface};
pub use messages::{
    Guidance, InteractCommand, InteractKind, Locator, NavigationState, PageCommand, PageEvent,
    PageMessage, Ticket,
};
pub use screenshot::{Screenshot, ScreenshotError};

/// Page surface errors.
#[derive(Error, Debug)]
pub enum PageError {
    #[error("Navigation failed: {0}")]
    Navigation(String),
    #[error("Page script failed: {0}")]
    Script(String),
    #[error("Screenshot capture failed: {0}")]
    Capture(String),
    #[error("Malformed page message: {0}")]
    InvalidMessage(String),
    #[error("Browser launch failed: {0}")]
    Launch(String),
    #[error("Page surface is closed")]
    Closed,
}

impl From<ScreenshotError> for PageError {
    fn from(e: ScreenshotError) -> Self {
        PageError::Capture(e.to_string())
    }
}

/// Visible viewport size in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// A live page that can be loaded, measured, captured and commanded.
///
/// Outcomes of commands arrive asynchronously as [`PageEvent::Message`] on
/// the event channel handed out together with the surface.
#[async_trait]
pub trait PageSurface: Send + Sync {
    /// Start loading `url`. Load completion is reported as [`PageEvent::LoadEnd`].
    async fn load(&self, url: &str) -> Result<(), PageError>;

    /// Current viewport size.
    async fn viewport(&self) -> Result<Viewport, PageError>;

    /// Capture the visible viewport as an encoded image.
    async fn capture_screenshot(&self) -> Result<Screenshot, PageError>;

    /// Hand a command to the page-side interpreter.
    async fn dispatch(&self, command: PageCommand) -> Result<(), PageError>;
}
