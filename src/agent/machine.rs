//! Agent state machine.
//!
//! [`AgentMachine::handle`] consumes one [`Event`] and returns the side
//! effects to perform as [`Command`]s. It never awaits anything itself, so
//! every transition can be tested synchronously.
//!
//! Each session gets a fresh epoch; each honored trigger bumps the token.
//! Results and timers carry the [`Ticket`] they were issued under and are
//! dropped if it is no longer current, so a timer and a DOM mutation racing
//! to start the next step cannot both win, and nothing from a stopped
//! session can act.

use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::knowledge::SiteAdvisory;
use super::macro_player::MacroPlayer;
use super::planner::PlanRequest;
use super::session::{Session, SessionMode};
use super::web_agent::AgentConfig;
use crate::actions::{ExecutionStyle, Plan};
use crate::page::{NavigationState, PageEvent, PageMessage, Ticket};
use crate::perception::{ElementDescriptor, PerceptionError, PerceptionMode, Snapshot};

/// Externally visible agent state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    AwaitingReplayChoice,
    Analyzing,
    Executing,
    AwaitingUserAction,
    Stalled,
    Replaying,
}

/// Timers the machine asks the runtime to arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// Start the next analysis.
    Retrigger,
    /// Give up waiting for perception.
    PerceptionDeadline,
    /// Play the next macro step.
    ReplayStep,
}

/// Why a session ended without reaching its goal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Planner(String),
    NotFoundLimit(u32),
    PerceptionLimit(u32),
    StepLimit(u32),
}

/// Inputs to the state machine.
#[derive(Debug, Clone)]
pub enum Event {
    Submit {
        goal: String,
        mode: SessionMode,
        perception: PerceptionMode,
        /// Stored skill for this goal, if any.
        skill: Option<Vec<Plan>>,
    },
    ReplayChoice {
        replay: bool,
    },
    PlaySkill {
        goal: String,
        plans: Vec<Plan>,
    },
    Stop,
    Perceived {
        ticket: Option<Ticket>,
        snapshot: Snapshot,
        advisory: Option<SiteAdvisory>,
    },
    PerceptionFailed {
        ticket: Ticket,
        error: String,
    },
    Planned {
        ticket: Ticket,
        plan: Plan,
    },
    PlanningFailed {
        ticket: Ticket,
        error: String,
    },
    ExecutionFailed {
        ticket: Ticket,
        error: String,
    },
    Page(PageEvent),
    TimerFired {
        ticket: Ticket,
        timer: Timer,
    },
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone)]
pub enum Command {
    Perceive {
        ticket: Ticket,
        mode: PerceptionMode,
    },
    RequestPlan {
        ticket: Ticket,
        request: PlanRequest,
    },
    Execute {
        ticket: Ticket,
        plan: Plan,
        style: ExecutionStyle,
    },
    Navigate {
        ticket: Ticket,
        url: String,
    },
    WatchMutations,
    /// Remove a guided highlight still on the page.
    ClearGuidance,
    Schedule {
        ticket: Ticket,
        timer: Timer,
        delay: Duration,
    },
    SaveSkill {
        goal: String,
        plans: Vec<Plan>,
    },
    SaveSiteMap {
        url: String,
        elements: Vec<ElementDescriptor>,
    },
    Notify(Notice),
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    State(AgentState),
    Loading(bool),
    Busy,
    ReplayOffered { goal: String, steps: usize },
    Action { step: u32, plan: Plan },
    ReplayStep { index: usize, plan: Plan },
    GuidePrompt(String),
    GuideCleared,
    StepAborted(String),
    Finished {
        goal: String,
        message: Option<String>,
        steps: u32,
    },
    ReplayFinished { goal: String, steps: usize },
    Stopped,
    Failed(FailureReason),
    Navigation(NavigationState),
    SkillSaved(String),
    UnknownSkill(String),
    KnowledgeUnavailable(String),
    VoiceError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settle {
    Interaction,
    Navigation,
    Load,
    Retry,
    UserAction,
}

#[derive(Debug)]
struct PendingReplay {
    goal: String,
    mode: SessionMode,
    perception: PerceptionMode,
    plans: Vec<Plan>,
}

#[derive(Debug)]
struct Replay {
    goal: String,
    player: MacroPlayer,
}

#[derive(Debug)]
enum Phase {
    Idle,
    ChoosingReplay(PendingReplay),
    Analyzing { perceived: bool },
    Settling(Settle),
    AwaitingUser,
    Stalled,
    Replaying(Replay),
}

/// The agent's control logic.
pub struct AgentMachine {
    config: AgentConfig,
    phase: Phase,
    session: Option<Session>,
    epoch: u64,
    token: u64,
}

impl AgentMachine {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            session: None,
            epoch: 0,
            token: 0,
        }
    }

    pub fn state(&self) -> AgentState {
        match self.phase {
            Phase::Idle => AgentState::Idle,
            Phase::ChoosingReplay(_) => AgentState::AwaitingReplayChoice,
            Phase::Analyzing { .. } => AgentState::Analyzing,
            Phase::Settling(_) => AgentState::Executing,
            Phase::AwaitingUser => AgentState::AwaitingUserAction,
            Phase::Stalled => AgentState::Stalled,
            Phase::Replaying(_) => AgentState::Replaying,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Ticket for work issued now.
    pub fn ticket(&self) -> Ticket {
        Ticket {
            epoch: self.epoch,
            token: self.token,
        }
    }

    fn is_current(&self, ticket: Option<Ticket>) -> bool {
        ticket.map_or(true, |t| t == self.ticket())
    }

    /// Apply one event.
    pub fn handle(&mut self, event: Event) -> Vec<Command> {
        let mut out = Vec::new();
        match event {
            Event::Submit {
                goal,
                mode,
                perception,
                skill,
            } => self.on_submit(goal, mode, perception, skill, &mut out),
            Event::ReplayChoice { replay } => self.on_replay_choice(replay, &mut out),
            Event::PlaySkill { goal, plans } => {
                if matches!(self.phase, Phase::Idle) {
                    self.start_replay(goal, plans, &mut out);
                } else {
                    out.push(Command::Notify(Notice::Busy));
                }
            }
            Event::Stop => self.on_stop(&mut out),
            Event::Perceived {
                ticket,
                snapshot,
                advisory,
            } => self.on_perceived(ticket, snapshot, advisory, &mut out),
            Event::PerceptionFailed { ticket, error } => {
                if self.awaiting_perception(Some(ticket)) {
                    self.on_perception_failed(error, &mut out);
                } else {
                    debug!("Ignoring stale perception failure: {}", error);
                }
            }
            Event::Planned { ticket, plan } => self.on_planned(ticket, plan, &mut out),
            Event::PlanningFailed { ticket, error } => {
                if self.awaiting_plan(ticket) {
                    self.fail(FailureReason::Planner(error), &mut out);
                } else {
                    debug!("Ignoring stale planner failure: {}", error);
                }
            }
            Event::ExecutionFailed { ticket, error } => {
                debug!("Execution failed: {}", error);
                self.on_not_found(Some(ticket), &mut out);
            }
            Event::Page(page_event) => self.on_page_event(page_event, &mut out),
            Event::TimerFired { ticket, timer } => self.on_timer(ticket, timer, &mut out),
        }
        out
    }

    fn on_submit(
        &mut self,
        goal: String,
        mode: SessionMode,
        perception: PerceptionMode,
        skill: Option<Vec<Plan>>,
        out: &mut Vec<Command>,
    ) {
        let goal = goal.trim().to_string();
        if goal.is_empty() {
            return;
        }
        if !matches!(self.phase, Phase::Idle) {
            info!("Rejecting goal {:?}: agent is busy", goal);
            out.push(Command::Notify(Notice::Busy));
            return;
        }

        match skill.filter(|plans| !plans.is_empty()) {
            Some(plans) => {
                let steps = plans.len();
                info!(goal = %goal, steps, "Known skill, offering replay");
                self.phase = Phase::ChoosingReplay(PendingReplay {
                    goal: goal.clone(),
                    mode,
                    perception,
                    plans,
                });
                out.push(Command::Notify(Notice::ReplayOffered { goal, steps }));
                out.push(Command::Notify(Notice::State(AgentState::AwaitingReplayChoice)));
            }
            None => self.start_session(goal, mode, perception, out),
        }
    }

    fn on_replay_choice(&mut self, replay: bool, out: &mut Vec<Command>) {
        if !matches!(self.phase, Phase::ChoosingReplay(_)) {
            debug!("No replay choice pending");
            return;
        }
        let Phase::ChoosingReplay(pending) = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return;
        };
        if replay {
            self.start_replay(pending.goal, pending.plans, out);
        } else {
            self.start_session(pending.goal, pending.mode, pending.perception, out);
        }
    }

    fn start_session(
        &mut self,
        goal: String,
        mode: SessionMode,
        perception: PerceptionMode,
        out: &mut Vec<Command>,
    ) {
        self.epoch += 1;
        let session = Session::new(goal, mode, perception);
        info!(
            session = %session.id,
            goal = %session.goal,
            mode = %mode,
            perception = %perception,
            "Session started"
        );
        self.session = Some(session);
        self.begin_analysis(out);
    }

    fn begin_analysis(&mut self, out: &mut Vec<Command>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.confirm();

        if session.step_count >= self.config.max_steps {
            let steps = session.step_count;
            self.fail(FailureReason::StepLimit(steps), out);
            return;
        }

        let mode = session.perception;
        self.token += 1;
        self.phase = Phase::Analyzing { perceived: false };
        let ticket = self.ticket();
        debug!(?ticket, "Analyzing");

        out.push(Command::Notify(Notice::State(AgentState::Analyzing)));
        out.push(Command::Notify(Notice::Loading(true)));
        out.push(Command::Perceive { ticket, mode });
        out.push(Command::Schedule {
            ticket,
            timer: Timer::PerceptionDeadline,
            delay: self.config.timings.perception_timeout,
        });
    }

    fn awaiting_perception(&self, ticket: Option<Ticket>) -> bool {
        matches!(self.phase, Phase::Analyzing { perceived: false }) && self.is_current(ticket)
    }

    fn awaiting_plan(&self, ticket: Ticket) -> bool {
        matches!(self.phase, Phase::Analyzing { perceived: true }) && ticket == self.ticket()
    }

    fn on_perceived(
        &mut self,
        ticket: Option<Ticket>,
        snapshot: Snapshot,
        advisory: Option<SiteAdvisory>,
        out: &mut Vec<Command>,
    ) {
        if !self.awaiting_perception(ticket) {
            debug!("Ignoring stale snapshot");
            return;
        }
        self.phase = Phase::Analyzing { perceived: true };
        let ticket = self.ticket();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.perception_failures = 0;

        if let Snapshot::Structural(structural) = &snapshot {
            debug!(
                url = %structural.url,
                elements = structural.elements.len(),
                "Structural snapshot"
            );
            out.push(Command::SaveSiteMap {
                url: structural.url.clone(),
                elements: structural.elements.clone(),
            });
        }

        out.push(Command::RequestPlan {
            ticket,
            request: PlanRequest {
                goal: session.goal.clone(),
                snapshot,
                advisory,
                history: session.history.clone(),
            },
        });
    }

    fn on_planned(&mut self, ticket: Ticket, plan: Plan, out: &mut Vec<Command>) {
        if !self.awaiting_plan(ticket) {
            debug!(plan = %plan, "Discarding plan from a superseded step");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let timings = &self.config.timings;

        match plan {
            Plan::Finish { ref message } => {
                let message = message.clone();
                let goal = session.goal.clone();
                let steps = session.step_count;
                let plans = session.finish(plan);
                info!(goal = %goal, steps, "Goal reached");
                out.push(Command::SaveSkill {
                    goal: goal.clone(),
                    plans,
                });
                out.push(Command::Notify(Notice::Finished {
                    goal,
                    message,
                    steps,
                }));
                self.end_session(out);
            }
            Plan::Navigate { ref url } => {
                let url = url.clone();
                session.record(plan.clone());
                let step = session.step_count;
                self.phase = Phase::Settling(Settle::Navigation);
                out.push(Command::Notify(Notice::Action { step, plan }));
                out.push(Command::Notify(Notice::State(AgentState::Executing)));
                out.push(Command::Navigate { ticket, url });
                out.push(Command::Schedule {
                    ticket,
                    timer: Timer::Retrigger,
                    delay: timings.navigation_timeout,
                });
            }
            Plan::Click { .. } | Plan::Type { .. } => {
                session.record(plan.clone());
                let step = session.step_count;
                let guided = session.mode == SessionMode::Guide;
                out.push(Command::Notify(Notice::Action {
                    step,
                    plan: plan.clone(),
                }));

                if guided {
                    self.phase = Phase::AwaitingUser;
                    out.push(Command::Execute {
                        ticket,
                        plan,
                        style: ExecutionStyle::Guided,
                    });
                    out.push(Command::Notify(Notice::Loading(false)));
                    out.push(Command::Notify(Notice::State(AgentState::AwaitingUserAction)));
                } else {
                    self.phase = Phase::Settling(Settle::Interaction);
                    out.push(Command::Execute {
                        ticket,
                        plan,
                        style: ExecutionStyle::Auto,
                    });
                    out.push(Command::Notify(Notice::State(AgentState::Executing)));
                    out.push(Command::Schedule {
                        ticket,
                        timer: Timer::Retrigger,
                        delay: timings.step_settle,
                    });
                }
            }
        }
    }

    fn on_not_found(&mut self, ticket: Option<Ticket>, out: &mut Vec<Command>) {
        let waiting = matches!(self.phase, Phase::Settling(_) | Phase::AwaitingUser);
        if !waiting || !self.is_current(ticket) {
            debug!("Ignoring element-not-found outside an active step");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if let Some(plan) = session.withdraw() {
            debug!(plan = %plan, "Step withdrawn");
        }
        session.not_found_retries += 1;
        let retries = session.not_found_retries;

        self.clear_guidance(out);
        if retries > self.config.max_not_found_retries {
            let limit = self.config.max_not_found_retries;
            self.fail(FailureReason::NotFoundLimit(limit), out);
            return;
        }

        warn!(retries, "Element not found, retrying");
        self.schedule_retrigger(Settle::Retry, self.config.timings.retry_delay, out);
    }

    fn schedule_retrigger(&mut self, settle: Settle, delay: Duration, out: &mut Vec<Command>) {
        self.token += 1;
        self.phase = Phase::Settling(settle);
        out.push(Command::Notify(Notice::Loading(true)));
        out.push(Command::Schedule {
            ticket: self.ticket(),
            timer: Timer::Retrigger,
            delay,
        });
    }

    fn on_page_event(&mut self, event: PageEvent, out: &mut Vec<Command>) {
        match event {
            PageEvent::LoadStart => out.push(Command::Notify(Notice::Loading(true))),
            PageEvent::LoadEnd => {
                out.push(Command::WatchMutations);
                match self.phase {
                    Phase::Settling(_)
                    | Phase::AwaitingUser
                    | Phase::Stalled
                    | Phase::Analyzing { perceived: false } => {
                        if matches!(self.phase, Phase::AwaitingUser) {
                            out.push(Command::Notify(Notice::GuideCleared));
                        }
                        debug!("Page loaded, re-analyzing after settle");
                        self.schedule_retrigger(Settle::Load, self.config.timings.load_settle, out);
                    }
                    Phase::Idle => out.push(Command::Notify(Notice::Loading(false))),
                    _ => {}
                }
            }
            PageEvent::Navigation(state) => out.push(Command::Notify(Notice::Navigation(state))),
            PageEvent::Message(message) => self.on_page_message(message, out),
        }
    }

    fn on_page_message(&mut self, message: PageMessage, out: &mut Vec<Command>) {
        match message {
            PageMessage::GuidePrompt { ticket, message } => {
                if matches!(self.phase, Phase::AwaitingUser) && self.is_current(ticket) {
                    out.push(Command::Notify(Notice::GuidePrompt(message)));
                }
            }
            PageMessage::UserActionCompleted { ticket } => {
                if !matches!(self.phase, Phase::AwaitingUser) || !self.is_current(ticket) {
                    debug!("Ignoring stale user action");
                    return;
                }
                if let Some(session) = self.session.as_mut() {
                    session.confirm();
                }
                out.push(Command::Notify(Notice::GuideCleared));
                out.push(Command::Notify(Notice::State(AgentState::Executing)));
                self.schedule_retrigger(
                    Settle::UserAction,
                    self.config.timings.user_action_settle,
                    out,
                );
            }
            PageMessage::ElementNotFound { ticket } => self.on_not_found(ticket, out),
            PageMessage::DomMutated { ticket } => {
                let auto = self
                    .session
                    .as_ref()
                    .is_some_and(|s| s.mode == SessionMode::Auto);
                // After an auto step only mutations caused by that step count.
                let resumable = match self.phase {
                    Phase::Settling(Settle::Interaction) => ticket == Some(self.ticket()),
                    Phase::Stalled => true,
                    _ => false,
                };
                if self.config.reactive && auto && resumable {
                    debug!("DOM mutated, analyzing early");
                    self.begin_analysis(out);
                }
            }
            PageMessage::SnapshotData { .. } => {
                debug!("Snapshot data must be routed through perception");
            }
        }
    }

    fn on_timer(&mut self, ticket: Ticket, timer: Timer, out: &mut Vec<Command>) {
        if ticket != self.ticket() {
            debug!(?timer, "Ignoring stale timer");
            return;
        }
        match timer {
            Timer::Retrigger if matches!(self.phase, Phase::Settling(_)) => self.begin_analysis(out),
            Timer::PerceptionDeadline if self.awaiting_perception(None) => {
                self.on_perception_failed(PerceptionError::Timeout.to_string(), out)
            }
            Timer::ReplayStep if matches!(self.phase, Phase::Replaying(_)) => self.replay_next(out),
            _ => debug!(?timer, "Timer no longer applies"),
        }
    }

    fn on_perception_failed(&mut self, error: String, out: &mut Vec<Command>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.perception_failures += 1;
        if session.perception_failures > self.config.max_perception_failures {
            let limit = self.config.max_perception_failures;
            warn!("Perception failed: {}", error);
            self.fail(FailureReason::PerceptionLimit(limit), out);
            return;
        }
        self.stall(error, out);
    }

    fn stall(&mut self, error: String, out: &mut Vec<Command>) {
        warn!("Perception failed, step aborted: {}", error);
        self.phase = Phase::Stalled;
        out.push(Command::Notify(Notice::Loading(false)));
        out.push(Command::Notify(Notice::StepAborted(error)));
        out.push(Command::Notify(Notice::State(AgentState::Stalled)));
    }

    fn start_replay(&mut self, goal: String, plans: Vec<Plan>, out: &mut Vec<Command>) {
        self.epoch += 1;
        self.session = None;
        info!(goal = %goal, steps = plans.len(), "Replaying skill");

        let timings = &self.config.timings;
        let player = MacroPlayer::new(plans).with_pauses(timings.replay_step, timings.replay_navigate);
        self.phase = Phase::Replaying(Replay { goal, player });

        out.push(Command::Notify(Notice::State(AgentState::Replaying)));
        out.push(Command::Notify(Notice::Loading(true)));
        self.replay_next(out);
    }

    fn replay_next(&mut self, out: &mut Vec<Command>) {
        let next = match &mut self.phase {
            Phase::Replaying(replay) => replay
                .player
                .next()
                .ok_or_else(|| (replay.goal.clone(), replay.player.played())),
            _ => return,
        };

        match next {
            Ok(step) => {
                self.token += 1;
                let ticket = self.ticket();
                out.push(Command::Notify(Notice::ReplayStep {
                    index: step.index,
                    plan: step.plan.clone(),
                }));
                match step.plan {
                    Plan::Navigate { url } => out.push(Command::Navigate { ticket, url }),
                    plan => out.push(Command::Execute {
                        ticket,
                        plan,
                        style: ExecutionStyle::Auto,
                    }),
                }
                out.push(Command::Schedule {
                    ticket,
                    timer: Timer::ReplayStep,
                    delay: step.pause,
                });
            }
            Err((goal, steps)) => {
                info!(goal = %goal, steps, "Replay finished");
                out.push(Command::Notify(Notice::ReplayFinished { goal, steps }));
                self.end_session(out);
            }
        }
    }

    fn on_stop(&mut self, out: &mut Vec<Command>) {
        if matches!(self.phase, Phase::Idle) {
            return;
        }
        info!("Stopped by user");
        self.clear_guidance(out);
        self.reset();
        out.push(Command::Notify(Notice::Loading(false)));
        out.push(Command::Notify(Notice::Stopped));
        out.push(Command::Notify(Notice::State(AgentState::Idle)));
    }

    /// Take down the highlight of a guided step that will not complete.
    fn clear_guidance(&self, out: &mut Vec<Command>) {
        if matches!(self.phase, Phase::AwaitingUser) {
            out.push(Command::ClearGuidance);
            out.push(Command::Notify(Notice::GuideCleared));
        }
    }

    fn fail(&mut self, reason: FailureReason, out: &mut Vec<Command>) {
        error!(?reason, "Session failed");
        self.reset();
        out.push(Command::Notify(Notice::Loading(false)));
        out.push(Command::Notify(Notice::Failed(reason)));
        out.push(Command::Notify(Notice::State(AgentState::Idle)));
    }

    fn end_session(&mut self, out: &mut Vec<Command>) {
        self.reset();
        out.push(Command::Notify(Notice::Loading(false)));
        out.push(Command::Notify(Notice::State(AgentState::Idle)));
    }

    /// Drop the session and invalidate everything issued under it.
    fn reset(&mut self) {
        self.session = None;
        self.phase = Phase::Idle;
        self.epoch += 1;
    }
}
