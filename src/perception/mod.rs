//! Perception: turn the live page into something the planner can reason about.

pub mod structural;
pub mod vision;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::page::{PageCommand, PageSurface, Screenshot, Ticket};
pub use structural::StructuralSnapshot;

/// Perception errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PerceptionError {
    #[error("Screenshot capture failed: {0}")]
    Capture(String),
    #[error("Element collection could not be started: {0}")]
    Collection(String),
    #[error("Timed out waiting for page snapshot")]
    Timeout,
}

/// Which perception strategy a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerceptionMode {
    #[default]
    Vision,
    Structural,
}

impl fmt::Display for PerceptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerceptionMode::Vision => write!(f, "vision"),
            PerceptionMode::Structural => write!(f, "structural"),
        }
    }
}

impl FromStr for PerceptionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vision" | "screen" => Ok(PerceptionMode::Vision),
            "structural" | "dom" | "code" => Ok(PerceptionMode::Structural),
            other => Err(format!("unknown perception mode: {}", other)),
        }
    }
}

/// An interactive element as seen by structural perception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub tag: String,
    pub text: String,
    pub selector: String,
}

/// A perceived representation of the page.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Vision(Screenshot),
    Structural(StructuralSnapshot),
}

impl Snapshot {
    pub fn mode(&self) -> PerceptionMode {
        match self {
            Snapshot::Vision(_) => PerceptionMode::Vision,
            Snapshot::Structural(_) => PerceptionMode::Structural,
        }
    }
}

/// Runs perception against a page surface.
#[derive(Clone)]
pub struct Perceiver {
    surface: Arc<dyn PageSurface>,
    vision_settle: Duration,
}

impl Perceiver {
    pub fn new(surface: Arc<dyn PageSurface>) -> Self {
        Self {
            surface,
            vision_settle: vision::DEFAULT_SETTLE,
        }
    }

    pub fn with_vision_settle(mut self, settle: Duration) -> Self {
        self.vision_settle = settle;
        self
    }

    /// Perceive the page.
    ///
    /// Vision returns the snapshot directly. Structural asks the page to
    /// collect candidates and returns `None`: the data arrives later as a
    /// `SNAPSHOT_DATA` message carrying `ticket`.
    pub async fn perceive(
        &self,
        mode: PerceptionMode,
        ticket: Ticket,
    ) -> Result<Option<Snapshot>, PerceptionError> {
        match mode {
            PerceptionMode::Vision => {
                let screenshot = vision::capture(self.surface.as_ref(), self.vision_settle).await?;
                Ok(Some(Snapshot::Vision(screenshot)))
            }
            PerceptionMode::Structural => {
                self.surface
                    .dispatch(PageCommand::CollectElements { ticket })
                    .await
                    .map_err(|e| PerceptionError::Collection(e.to_string()))?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{PageError, Viewport};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSurface {
        commands: Mutex<Vec<PageCommand>>,
        fail_capture: bool,
    }

    #[async_trait]
    impl PageSurface for RecordingSurface {
        async fn load(&self, _url: &str) -> Result<(), PageError> {
            Ok(())
        }

        async fn viewport(&self) -> Result<Viewport, PageError> {
            Ok(Viewport {
                width: 100,
                height: 100,
            })
        }

        async fn capture_screenshot(&self) -> Result<Screenshot, PageError> {
            if self.fail_capture {
                return Err(PageError::Capture("surface gone".to_string()));
            }
            Ok(Screenshot::new("AAAA".to_string(), "image/png", 100, 100))
        }

        async fn dispatch(&self, command: PageCommand) -> Result<(), PageError> {
            self.commands.lock().unwrap().push(command);
            Ok(())
        }
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("Vision".parse::<PerceptionMode>(), Ok(PerceptionMode::Vision));
        assert_eq!("dom".parse::<PerceptionMode>(), Ok(PerceptionMode::Structural));
        assert!("smell".parse::<PerceptionMode>().is_err());
    }

    #[tokio::test]
    async fn test_vision_returns_snapshot() {
        let surface = Arc::new(RecordingSurface::default());
        let perceiver = Perceiver::new(surface).with_vision_settle(Duration::ZERO);
        let snapshot = perceiver
            .perceive(PerceptionMode::Vision, Ticket::default())
            .await
            .unwrap();
        assert!(matches!(snapshot, Some(Snapshot::Vision(_))));
    }

    #[tokio::test]
    async fn test_vision_capture_failure_is_perception_error() {
        let surface = Arc::new(RecordingSurface {
            fail_capture: true,
            ..Default::default()
        });
        let perceiver = Perceiver::new(surface).with_vision_settle(Duration::ZERO);
        let err = perceiver
            .perceive(PerceptionMode::Vision, Ticket::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PerceptionError::Capture(_)));
    }

    #[tokio::test]
    async fn test_structural_requests_collection() {
        let surface = Arc::new(RecordingSurface::default());
        let perceiver = Perceiver::new(surface.clone());
        let ticket = Ticket { epoch: 4, token: 2 };
        let snapshot = perceiver
            .perceive(PerceptionMode::Structural, ticket)
            .await
            .unwrap();
        assert!(snapshot.is_none());
        assert_eq!(
            surface.commands.lock().unwrap().as_slice(),
            &[PageCommand::CollectElements { ticket }]
        );
    }
}
