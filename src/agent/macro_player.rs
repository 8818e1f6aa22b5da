//! Macro player: step through a stored skill without perception or planning.

use std::time::Duration;

use crate::actions::Plan;

/// Pause after an ordinary step.
pub const DEFAULT_STEP_PAUSE: Duration = Duration::from_millis(2500);
/// Pause after a `navigate` step, to let the new page load.
pub const DEFAULT_NAVIGATE_PAUSE: Duration = Duration::from_millis(4000);

/// One step to perform, and how long to wait before the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayStep {
    pub index: usize,
    pub plan: Plan,
    pub pause: Duration,
}

/// Yields the steps of a skill up to (not including) the first `finish`.
#[derive(Debug, Clone)]
pub struct MacroPlayer {
    plans: std::vec::IntoIter<Plan>,
    step_pause: Duration,
    navigate_pause: Duration,
    played: usize,
    done: bool,
}

impl MacroPlayer {
    pub fn new(plans: Vec<Plan>) -> Self {
        Self {
            plans: plans.into_iter(),
            step_pause: DEFAULT_STEP_PAUSE,
            navigate_pause: DEFAULT_NAVIGATE_PAUSE,
            played: 0,
            done: false,
        }
    }

    pub fn with_pauses(mut self, step_pause: Duration, navigate_pause: Duration) -> Self {
        self.step_pause = step_pause;
        self.navigate_pause = navigate_pause;
        self
    }

    /// Steps handed out so far.
    pub fn played(&self) -> usize {
        self.played
    }
}

impl Iterator for MacroPlayer {
    type Item = ReplayStep;

    fn next(&mut self) -> Option<ReplayStep> {
        if self.done {
            return None;
        }
        match self.plans.next() {
            None | Some(Plan::Finish { .. }) => {
                self.done = true;
                None
            }
            Some(plan) => {
                let pause = match plan {
                    Plan::Navigate { .. } => self.navigate_pause,
                    _ => self.step_pause,
                };
                let index = self.played;
                self.played += 1;
                Some(ReplayStep { index, plan, pause })
            }
        }
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

    fn type_plan() -> Plan {
        Plan::Type {
            target: Target::Selector("input".to_string()),
            value: "x".to_string(),
            description: None,
        }
    }

    #[test]
    fn test_stops_at_first_finish() {
        let player = MacroPlayer::new(vec![
            click(),
            type_plan(),
            Plan::Finish { message: None },
            click(),
        ]);
        let steps: Vec<_> = player.collect();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].plan, click());
        assert_eq!(steps[1].plan, type_plan());
        assert_eq!(steps[1].index, 1);
    }

    #[test]
    fn test_navigate_pauses_longer() {
        let mut player = MacroPlayer::new(vec![
            Plan::Navigate {
                url: "https://a.test".to_string(),
            },
            click(),
        ]);
        assert_eq!(player.next().map(|s| s.pause), Some(DEFAULT_NAVIGATE_PAUSE));
        assert_eq!(player.next().map(|s| s.pause), Some(DEFAULT_STEP_PAUSE));
        assert!(player.next().is_none());
        assert_eq!(player.played(), 2);
    }

    #[test]
    fn test_empty_and_exhausted() {
        let mut player = MacroPlayer::new(Vec::new());
        assert!(player.next().is_none());
        assert!(player.next().is_none());
    }
}
