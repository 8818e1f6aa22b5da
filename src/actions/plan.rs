//! Plan model: the single next action proposed by the reasoning model.
//!
//! In memory a [`Plan`] is a tagged union whose interactive variants carry a
//! [`Target`], either a CSS selector or a normalized screen point. On the wire
//! (model responses, persisted skills) it is the flat JSON object the model is
//! asked to produce:
//!
//! ```json
//! {"action": "click", "x": 500, "y": 150, "description": "Login button"}
//! {"action": "type", "selector": "input#q", "value": "rust"}
//! {"action": "navigate", "url": "https://example.com"}
//! {"action": "finish", "message": "Done"}
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::page::Viewport;

/// Upper bound of the normalized coordinate space used by vision plans.
pub const NORMALIZED_MAX: f64 = 1000.0;

/// Plan validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Both a selector and coordinates were given; exactly one addressing mode is allowed")]
    AmbiguousTarget,
    #[error("Coordinate {axis}={value} is outside 0..={max}")]
    CoordinateOutOfRange { axis: char, value: f64, max: f64 },
}

/// A point on the normalized 0..=1000 grid, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedPoint {
    x: f64,
    y: f64,
}

impl NormalizedPoint {
    /// Create a point, rejecting values outside the normalized range.
    pub fn new(x: f64, y: f64) -> Result<Self, PlanError> {
        for (axis, value) in [('x', x), ('y', y)] {
            if !value.is_finite() || !(0.0..=NORMALIZED_MAX).contains(&value) {
                return Err(PlanError::CoordinateOutOfRange {
                    axis,
                    value,
                    max: NORMALIZED_MAX,
                });
            }
        }
        Ok(Self { x, y })
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    /// Rescale to viewport pixels: `(x / 1000 * width, y / 1000 * height)`.
    ///
    /// Must be called with the viewport measured right before acting; the
    /// viewport may change between planning and execution.
    pub fn to_viewport(&self, viewport: Viewport) -> (f64, f64) {
        (
            self.x / NORMALIZED_MAX * f64::from(viewport.width),
            self.y / NORMALIZED_MAX * f64::from(viewport.height),
        )
    }
}

/// How an interactive plan addresses its element.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Produced by structural perception.
    Selector(String),
    /// Produced by vision perception.
    Point(NormalizedPoint),
}

/// The atomic unit of agent action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WirePlan", into = "WirePlan")]
pub enum Plan {
    /// Terminal: the goal is satisfied.
    Finish { message: Option<String> },
    /// Load a new URL.
    Navigate { url: String },
    /// Click an element. `value` is the element's visible text, when known,
    /// and is used to find it again if the selector misses.
    Click {
        target: Target,
        value: Option<String>,
        description: Option<String>,
    },
    /// Enter text into an element.
    Type {
        target: Target,
        value: String,
        description: Option<String>,
    },
}

impl Plan {
    /// Wire name of the action.
    pub fn action_name(&self) -> &'static str {
        match self {
            Plan::Finish { .. } => "finish",
            Plan::Navigate { .. } => "navigate",
            Plan::Click { .. } => "click",
            Plan::Type { .. } => "type",
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Plan::Finish { .. })
    }

    /// The addressed element, for click and type plans.
    pub fn target(&self) -> Option<&Target> {
        match self {
            Plan::Click { target, .. } | Plan::Type { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Text value carried by the plan (typed text or click text hint).
    pub fn value(&self) -> Option<&str> {
        match self {
            Plan::Click { value, .. } => value.as_deref(),
            Plan::Type { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Plan::Click { description, .. } | Plan::Type { description, .. } => {
                description.as_deref()
            }
            _ => None,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plan::Finish { message } => {
                write!(f, "finish")?;
                if let Some(message) = message {
                    write!(f, " ({})", message)?;
                }
                Ok(())
            }
            Plan::Navigate { url } => write!(f, "navigate {}", url),
            Plan::Click { target, .. } | Plan::Type { target, .. } => {
                write!(f, "{} ", self.action_name())?;
                match target {
                    Target::Selector(selector) => write!(f, "{}", selector)?,
                    Target::Point(p) => write!(f, "@({}, {})", p.x(), p.y())?,
                }
                if let Some(description) = self.description() {
                    write!(f, " [{}]", description)?;
                }
                Ok(())
            }
        }
    }
}

/// Flat JSON shape exchanged with the model and the persistence layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WirePlan {
    action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl WirePlan {
    fn target(&self) -> Result<Target, PlanError> {
        let selector = self
            .selector
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        match (selector, self.x, self.y) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => Err(PlanError::AmbiguousTarget),
            (Some(selector), None, None) => Ok(Target::Selector(selector.to_string())),
            (None, Some(x), Some(y)) => Ok(Target::Point(NormalizedPoint::new(x, y)?)),
            (None, Some(_), None) => Err(PlanError::MissingParameter("y")),
            (None, None, Some(_)) => Err(PlanError::MissingParameter("x")),
            (None, None, None) => Err(PlanError::MissingParameter("selector or x,y")),
        }
    }
}

impl TryFrom<WirePlan> for Plan {
    type Error = PlanError;

    fn try_from(wire: WirePlan) -> Result<Self, Self::Error> {
        match wire.action.trim().to_ascii_lowercase().as_str() {
            "finish" => Ok(Plan::Finish {
                message: wire.message.or(wire.description),
            }),
            "navigate" => {
                let url = wire
                    .url
                    .map(|u| u.trim().to_string())
                    .filter(|u| !u.is_empty())
                    .ok_or(PlanError::MissingParameter("url"))?;
                Ok(Plan::Navigate { url })
            }
            "click" => Ok(Plan::Click {
                target: wire.target()?,
                value: wire.value.filter(|v| !v.is_empty()),
                description: wire.description,
            }),
            "type" => {
                let target = wire.target()?;
                let value = wire.value.ok_or(PlanError::MissingParameter("value"))?;
                Ok(Plan::Type {
                    target,
                    value,
                    description: wire.description,
                })
            }
            other => Err(PlanError::UnknownAction(other.to_string())),
        }
    }
}

impl From<Plan> for WirePlan {
    fn from(plan: Plan) -> Self {
        let action = plan.action_name().to_string();
        match plan {
            Plan::Finish { message } => WirePlan {
                action,
                message,
                ..Default::default()
            },
            Plan::Navigate { url } => WirePlan {
                action,
                url: Some(url),
                ..Default::default()
            },
            Plan::Click {
                target,
                value,
                description,
            } => with_target(
                WirePlan {
                    action,
                    value,
                    description,
                    ..Default::default()
                },
                target,
            ),
            Plan::Type {
                target,
                value,
                description,
            } => with_target(
                WirePlan {
                    action,
                    value: Some(value),
                    description,
                    ..Default::default()
                },
                target,
            ),
        }
    }
}

fn with_target(mut wire: WirePlan, target: Target) -> WirePlan {
    match target {
        Target::Selector(selector) => wire.selector = Some(selector),
        Target::Point(point) => {
            wire.x = Some(point.x());
            wire.y = Some(point.y());
        }
    }
    wire
}
