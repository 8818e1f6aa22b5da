//! Vision perception: a screenshot of the visible viewport.

use std::time::Duration;
use tracing::debug;

use super::PerceptionError;
use crate::page::{PageSurface, Screenshot};

/// Default wait before capturing, so in-flight rendering can land.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(800);

/// Wait `settle`, then capture the surface.
pub async fn capture(
    surface: &dyn PageSurface,
    settle: Duration,
) -> Result<Screenshot, PerceptionError> {
    tokio::time::sleep(settle).await;
    let screenshot = surface
        .capture_screenshot()
        .await
        .map_err(|e| PerceptionError::Capture(e.to_string()))?;
    debug!(
        width = screenshot.width,
        height = screenshot.height,
        "Captured viewport"
    );
    Ok(screenshot)
}
