//! Actions: the plan model and its execution against a page.

mod handler;
mod plan;

pub use handler::{
    resolve_locator, ActionError, ActionExecutor, ExecutionStyle, DEFAULT_INTERACTION_SETTLE,
};
pub use plan::{NormalizedPoint, Plan, PlanError, Target, NORMALIZED_MAX};
