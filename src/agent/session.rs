//! The task session owned by the state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::actions::Plan;
use crate::perception::PerceptionMode;

/// Whether the agent acts itself or guides the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    #[default]
    Auto,
    Guide,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::Auto => write!(f, "auto"),
            SessionMode::Guide => write!(f, "guide"),
        }
    }
}

impl FromStr for SessionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "self" => Ok(SessionMode::Auto),
            "guide" | "guided" => Ok(SessionMode::Guide),
            other => Err(format!("unknown agent mode: {}", other)),
        }
    }
}

/// One goal being worked on.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub goal: String,
    pub mode: SessionMode,
    pub perception: PerceptionMode,
    /// Interactions performed (click/type); navigate and finish do not count.
    pub step_count: u32,
    pub history: Vec<Plan>,
    /// Consecutive element-not-found retries since the last successful step.
    pub not_found_retries: u32,
    /// Consecutive perception failures since the last usable snapshot.
    pub perception_failures: u32,
    /// The last history entry is awaiting confirmation from the page.
    pending: Option<PendingStep>,
}

#[derive(Debug, Clone, Copy)]
struct PendingStep {
    counted: bool,
}

impl Session {
    pub fn new(goal: impl Into<String>, mode: SessionMode, perception: PerceptionMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            mode,
            perception,
            step_count: 0,
            history: Vec::new(),
            not_found_retries: 0,
            perception_failures: 0,
            pending: None,
        }
    }

    /// Record a dispatched plan. Click and type count as steps.
    pub fn record(&mut self, plan: Plan) {
        let counted = matches!(plan, Plan::Click { .. } | Plan::Type { .. });
        if counted {
            self.step_count += 1;
        }
        self.history.push(plan);
        self.pending = Some(PendingStep { counted });
    }

    /// The page confirmed the last step; it can no longer be withdrawn.
    pub fn confirm(&mut self) {
        if self.pending.take().is_some() {
            self.not_found_retries = 0;
        }
    }

    /// Undo the last recorded step because it could not be performed.
    pub fn withdraw(&mut self) -> Option<Plan> {
        let pending = self.pending.take()?;
        if pending.counted {
            self.step_count = self.step_count.saturating_sub(1);
        }
        self.history.pop()
    }

    /// Close the history with the terminal plan.
    pub fn finish(&mut self, plan: Plan) -> Vec<Plan> {
        self.pending = None;
        self.history.push(plan);
        self.history.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Target;

    fn click() -> Plan {
        Plan::Click {
            target: Target::Selector("a".to_string()),
            value: None,
            description: None,
        }
    }

    #[test]
    fn test_record_and_withdraw() {
        let mut session = Session::new("g", SessionMode::Auto, PerceptionMode::Structural);
        session.record(click());
        assert_eq!(session.step_count, 1);
        assert_eq!(session.withdraw(), Some(click()));
        assert_eq!(session.step_count, 0);
        assert!(session.history.is_empty());
        assert_eq!(session.withdraw(), None);
    }

    #[test]
    fn test_navigate_is_not_a_step() {
        let mut session = Session::new("g", SessionMode::Auto, PerceptionMode::Vision);
        session.record(Plan::Navigate {
            url: "https://a.test".to_string(),
        });
        assert_eq!(session.step_count, 0);
        assert_eq!(session.history.len(), 1);
    }

    #[test]
    fn test_confirm_resets_retries() {
        let mut session = Session::new("g", SessionMode::Guide, PerceptionMode::Vision);
        session.record(click());
        session.not_found_retries = 3;
        session.confirm();
        assert_eq!(session.not_found_retries, 0);
        assert_eq!(session.withdraw(), None);
        assert_eq!(session.step_count, 1);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("Guide".parse::<SessionMode>(), Ok(SessionMode::Guide));
        assert_eq!("auto".parse::<SessionMode>(), Ok(SessionMode::Auto));
        assert!("manual".parse::<SessionMode>().is_err());
    }
}
