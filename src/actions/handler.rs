//! Action executor: turn a [`Plan`] into a concrete page command.
//!
//! Coordinates are rescaled here, against the viewport measured right before
//! acting. Step counting and history belong to the agent state machine.

use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::plan::{Plan, Target};
use crate::config::{click_instruction, type_instruction};
use crate::page::{
    Guidance, InteractCommand, InteractKind, Locator, PageCommand, PageError, PageSurface, Ticket,
    Viewport,
};

/// Default delay between locating an element and acting on it.
pub const DEFAULT_INTERACTION_SETTLE: Duration = Duration::from_millis(500);

/// Action executor errors.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Plan {0:?} is not a page interaction")]
    NotInteractive(&'static str),
    #[error("Viewport is required to resolve coordinates")]
    MissingViewport,
    #[error("Action failed: {0}")]
    ExecutionFailed(#[from] PageError),
}

/// Auto performs the interaction; guided highlights it and waits for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStyle {
    Auto,
    Guided,
}

/// Executes click and type plans against a page surface.
#[derive(Debug, Clone)]
pub struct ActionExecutor {
    lang: String,
    submit_on_type: bool,
    interaction_settle: Duration,
}

impl Default for ActionExecutor {
    fn default() -> Self {
        Self {
            lang: "en".to_string(),
            submit_on_type: true,
            interaction_settle: DEFAULT_INTERACTION_SETTLE,
        }
    }
}

impl ActionExecutor {
    pub fn new(lang: impl Into<String>) -> Self {
        Self {
            lang: lang.into(),
            ..Default::default()
        }
    }

    /// Submit the enclosing form after typing into an `INPUT`.
    pub fn with_submit_on_type(mut self, submit: bool) -> Self {
        self.submit_on_type = submit;
        self
    }

    pub fn with_interaction_settle(mut self, settle: Duration) -> Self {
        self.interaction_settle = settle;
        self
    }

    /// Whether executing `plan` needs the current viewport.
    pub fn needs_viewport(plan: &Plan) -> bool {
        matches!(plan.target(), Some(Target::Point(_)))
    }

    /// Build the page command for `plan`.
    pub fn prepare(
        &self,
        plan: &Plan,
        ticket: Ticket,
        style: ExecutionStyle,
        viewport: Option<Viewport>,
    ) -> Result<PageCommand, ActionError> {
        let (target, action) = match plan {
            Plan::Click { target, .. } => (target, InteractKind::Click),
            Plan::Type { target, value, .. } => (
                target,
                InteractKind::Type {
                    value: value.clone(),
                    submit: self.submit_on_type,
                },
            ),
            other => return Err(ActionError::NotInteractive(other.action_name())),
        };

        let locator = resolve_locator(target, plan.value(), viewport)?;
        let guidance = match style {
            ExecutionStyle::Auto => None,
            ExecutionStyle::Guided => Some(Guidance {
                instruction: self.instruction(plan),
                marker: matches!(locator, Locator::Point { .. }),
            }),
        };

        Ok(PageCommand::Interact(InteractCommand {
            ticket,
            locator,
            action,
            guidance,
            settle_ms: self.interaction_settle.as_millis() as u64,
        }))
    }

    /// Localized guided-mode instruction for `plan`.
    pub fn instruction(&self, plan: &Plan) -> String {
        match plan {
            Plan::Type { value, .. } => type_instruction(&self.lang, value),
            _ => click_instruction(&self.lang),
        }
    }

    /// Measure the viewport if needed, then dispatch the interaction.
    ///
    /// A successful return only means the page accepted the command; a miss
    /// is reported later as `ELEMENT_NOT_FOUND`.
    pub async fn execute(
        &self,
        surface: &dyn PageSurface,
        plan: &Plan,
        ticket: Ticket,
        style: ExecutionStyle,
    ) -> Result<(), ActionError> {
        let viewport = if Self::needs_viewport(plan) {
            Some(surface.viewport().await?)
        } else {
            None
        };
        let command = self.prepare(plan, ticket, style, viewport)?;
        debug!(plan = %plan, ?style, "Dispatching interaction");
        surface.dispatch(command).await?;
        Ok(())
    }
}

/// Map a plan target to a page locator.
///
/// Selector targets keep `text_hint` for the text fallback scan; point
/// targets are rescaled to viewport pixels.
pub fn resolve_locator(
    target: &Target,
    text_hint: Option<&str>,
    viewport: Option<Viewport>,
) -> Result<Locator, ActionError> {
    match target {
        Target::Selector(selector) => Ok(Locator::Selector {
            selector: selector.clone(),
            text_fallback: text_hint
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        }),
        Target::Point(point) => {
            let viewport = viewport.ok_or(ActionError::MissingViewport)?;
            let (x, y) = point.to_viewport(viewport);
            Ok(Locator::Point { x, y })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::NormalizedPoint;

    const VIEWPORT: Viewport = Viewport {
        width: 400,
        height: 800,
    };

    fn ticket() -> Ticket {
        Ticket { epoch: 1, token: 1 }
    }

    fn interact(command: PageCommand) -> InteractCommand {
        match command {
            PageCommand::Interact(cmd) => cmd,
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_point_click_is_rescaled() {
        let plan = Plan::Click {
            target: Target::Point(NormalizedPoint::new(500.0, 250.0).unwrap()),
            value: None,
            description: None,
        };
        assert!(ActionExecutor::needs_viewport(&plan));

        let cmd = interact(
            ActionExecutor::default()
                .prepare(&plan, ticket(), ExecutionStyle::Auto, Some(VIEWPORT))
                .unwrap(),
        );
        assert_eq!(cmd.locator, Locator::Point { x: 200.0, y: 200.0 });
        assert_eq!(cmd.action, InteractKind::Click);
        assert!(cmd.guidance.is_none());
        assert_eq!(cmd.settle_ms, 500);
    }

    #[test]
    fn test_point_without_viewport_fails() {
        let plan = Plan::Click {
            target: Target::Point(NormalizedPoint::new(1.0, 1.0).unwrap()),
            value: None,
            description: None,
        };
        assert!(matches!(
            ActionExecutor::default().prepare(&plan, ticket(), ExecutionStyle::Auto, None),
            Err(ActionError::MissingViewport)
        ));
    }

    #[test]
    fn test_selector_click_keeps_text_fallback() {
        let plan = Plan::Click {
            target: Target::Selector("div.card".to_string()),
            value: Some("Buy now".to_string()),
            description: None,
        };
        assert!(!ActionExecutor::needs_viewport(&plan));
        let cmd = interact(
            ActionExecutor::default()
                .prepare(&plan, ticket(), ExecutionStyle::Auto, None)
                .unwrap(),
        );
        assert_eq!(
            cmd.locator,
            Locator::Selector {
                selector: "div.card".to_string(),
                text_fallback: Some("Buy now".to_string()),
            }
        );
    }

    #[test]
    fn test_type_respects_submit_setting() {
        let plan = Plan::Type {
            target: Target::Selector("input#q".to_string()),
            value: "rust".to_string(),
            description: None,
        };
        let cmd = interact(
            ActionExecutor::default()
                .with_submit_on_type(false)
                .prepare(&plan, ticket(), ExecutionStyle::Auto, None)
                .unwrap(),
        );
        assert_eq!(
            cmd.action,
            InteractKind::Type {
                value: "rust".to_string(),
                submit: false
            }
        );
    }

    #[test]
    fn test_guided_command_carries_localized_instruction() {
        let plan = Plan::Type {
            target: Target::Point(NormalizedPoint::new(100.0, 100.0).unwrap()),
            value: "привет".to_string(),
            description: None,
        };
        let cmd = interact(
            ActionExecutor::new("ru")
                .prepare(&plan, ticket(), ExecutionStyle::Guided, Some(VIEWPORT))
                .unwrap(),
        );
        let guidance = cmd.guidance.unwrap();
        assert_eq!(guidance.instruction, "Введите текст: \"привет\"");
        assert!(guidance.marker);
    }

    #[test]
    fn test_non_interactive_plans_are_rejected() {
        let executor = ActionExecutor::default();
        for plan in [
            Plan::Finish { message: None },
            Plan::Navigate {
                url: "https://a.test".to_string(),
            },
        ] {
            assert!(matches!(
                executor.prepare(&plan, ticket(), ExecutionStyle::Auto, None),
                Err(ActionError::NotInteractive(_))
            ));
        }
    }
}
