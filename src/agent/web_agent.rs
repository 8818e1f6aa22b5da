//! Web agent runtime.
//!
//! A single control task owns the [`AgentMachine`] and the knowledge base.
//! Perception, planning, page commands and timers run in spawned tasks and
//! report back as events on an internal channel, so steps stay sequential
//! while the loop keeps listening for stop requests and page events.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::knowledge::{goal_key, KnowledgeBase, KnowledgeError};
use super::machine::{AgentMachine, Command, Event, Notice};
use super::planner::Planner;
use super::session::SessionMode;
use crate::actions::{ActionExecutor, Plan};
use crate::page::{PageCommand, PageEvent, PageMessage, PageSurface};
use crate::perception::{structural, Perceiver, PerceptionMode, Snapshot};

/// Delays used by the agent loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Wait before taking a screenshot.
    pub vision_settle: Duration,
    /// Give up on a perception attempt after this long.
    pub perception_timeout: Duration,
    /// Re-analyze after an auto click/type if no mutation arrives first.
    pub step_settle: Duration,
    /// Re-analyze after a page finished loading.
    pub load_settle: Duration,
    /// Re-analyze after the user performed a guided step.
    pub user_action_settle: Duration,
    /// Re-analyze after an element could not be found.
    pub retry_delay: Duration,
    /// Re-analyze after `navigate` if the load never completes.
    pub navigation_timeout: Duration,
    pub replay_step: Duration,
    pub replay_navigate: Duration,
    /// Delay between locating an element and acting on it.
    pub interaction_settle: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            vision_settle: Duration::from_millis(800),
            perception_timeout: Duration::from_secs(10),
            step_settle: Duration::from_millis(5000),
            load_settle: Duration::from_millis(1500),
            user_action_settle: Duration::from_millis(2000),
            retry_delay: Duration::from_millis(2000),
            navigation_timeout: Duration::from_secs(15),
            replay_step: Duration::from_millis(2500),
            replay_navigate: Duration::from_millis(4000),
            interaction_settle: Duration::from_millis(500),
        }
    }
}

impl Timings {
    pub fn with_vision_settle(mut self, delay: Duration) -> Self {
        self.vision_settle = delay;
        self
    }

    pub fn with_perception_timeout(mut self, timeout: Duration) -> Self {
        self.perception_timeout = timeout;
        self
    }

    pub fn with_step_settle(mut self, delay: Duration) -> Self {
        self.step_settle = delay;
        self
    }

    pub fn with_load_settle(mut self, delay: Duration) -> Self {
        self.load_settle = delay;
        self
    }

    pub fn with_user_action_settle(mut self, delay: Duration) -> Self {
        self.user_action_settle = delay;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    /// Set the replay pauses after ordinary and `navigate` steps.
    pub fn with_replay_pauses(mut self, step: Duration, navigate: Duration) -> Self {
        self.replay_step = step;
        self.replay_navigate = navigate;
        self
    }

    pub fn with_interaction_settle(mut self, delay: Duration) -> Self {
        self.interaction_settle = delay;
        self
    }
}

/// Configuration for the web agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum number of click/type steps before the session fails.
    pub max_steps: u32,
    /// Consecutive element-not-found retries before the session fails.
    pub max_not_found_retries: u32,
    /// Consecutive failed perceptions tolerated before the session fails.
    pub max_perception_failures: u32,
    /// Re-analyze as soon as the DOM mutates after an auto step.
    pub reactive: bool,
    /// Submit the enclosing form after typing into an input.
    pub submit_on_type: bool,
    /// Language code ("en" or "ru") for guide instructions.
    pub lang: String,
    pub default_mode: SessionMode,
    pub default_perception: PerceptionMode,
    pub timings: Timings,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            max_not_found_retries: 5,
            max_perception_failures: 3,
            reactive: true,
            submit_on_type: true,
            lang: "en".to_string(),
            default_mode: SessionMode::Auto,
            default_perception: PerceptionMode::Vision,
            timings: Timings::default(),
        }
    }
}

impl AgentConfig {
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_not_found_retries(mut self, retries: u32) -> Self {
        self.max_not_found_retries = retries;
        self
    }

    pub fn with_max_perception_failures(mut self, failures: u32) -> Self {
        self.max_perception_failures = failures;
        self
    }

    pub fn with_reactive(mut self, reactive: bool) -> Self {
        self.reactive = reactive;
        self
    }

    pub fn with_submit_on_type(mut self, submit: bool) -> Self {
        self.submit_on_type = submit;
        self
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    pub fn with_default_mode(mut self, mode: SessionMode) -> Self {
        self.default_mode = mode;
        self
    }

    pub fn with_default_perception(mut self, perception: PerceptionMode) -> Self {
        self.default_perception = perception;
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }
}

/// Errors surfaced through the [`AgentHandle`].
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent loop has stopped")]
    ChannelClosed,
    #[error("Knowledge error: {0}")]
    Knowledge(#[from] KnowledgeError),
    #[error("Invalid URL: {0:?}")]
    InvalidUrl(String),
}

enum Input {
    Submit(String),
    Transcript(Result<String, String>),
    ReplayChoice(bool),
    PlaySkill(String),
    ForgetSkill {
        goal: String,
        reply: oneshot::Sender<Result<bool, KnowledgeError>>,
    },
    Skills(oneshot::Sender<Vec<String>>),
    Open(String),
    SetMode(SessionMode),
    SetPerception(PerceptionMode),
    Stop,
    Shutdown,
}

/// Handle for controlling a running agent.
#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::Sender<Input>,
}

impl AgentHandle {
    async fn send(&self, input: Input) -> Result<(), AgentError> {
        self.tx
            .send(input)
            .await
            .map_err(|_| AgentError::ChannelClosed)
    }

    /// Submit a goal in the current mode.
    pub async fn submit(&self, goal: impl Into<String>) -> Result<(), AgentError> {
        self.send(Input::Submit(goal.into())).await
    }

    /// Deliver a speech recognition result.
    pub async fn transcript(&self, result: Result<String, String>) -> Result<(), AgentError> {
        self.send(Input::Transcript(result)).await
    }

    /// Answer a replay offer.
    pub async fn choose_replay(&self, replay: bool) -> Result<(), AgentError> {
        self.send(Input::ReplayChoice(replay)).await
    }

    /// Replay the stored skill for `goal` right away.
    pub async fn play_skill(&self, goal: impl Into<String>) -> Result<(), AgentError> {
        self.send(Input::PlaySkill(goal.into())).await
    }

    /// Remove a stored skill. Returns whether one existed.
    pub async fn forget_skill(&self, goal: impl Into<String>) -> Result<bool, AgentError> {
        let (reply, rx) = oneshot::channel();
        self.send(Input::ForgetSkill {
            goal: goal.into(),
            reply,
        })
        .await?;
        Ok(rx.await.map_err(|_| AgentError::ChannelClosed)??)
    }

    /// Goal keys of all stored skills.
    pub async fn skills(&self) -> Result<Vec<String>, AgentError> {
        let (reply, rx) = oneshot::channel();
        self.send(Input::Skills(reply)).await?;
        rx.await.map_err(|_| AgentError::ChannelClosed)
    }

    /// Load a page manually. A missing scheme defaults to `https://`.
    pub async fn open(&self, address: &str) -> Result<(), AgentError> {
        let url = normalize_url(address)?;
        self.send(Input::Open(url)).await
    }

    /// Mode for sessions started from now on.
    pub async fn set_mode(&self, mode: SessionMode) -> Result<(), AgentError> {
        self.send(Input::SetMode(mode)).await
    }

    /// Perception for sessions started from now on.
    pub async fn set_perception(&self, perception: PerceptionMode) -> Result<(), AgentError> {
        self.send(Input::SetPerception(perception)).await
    }

    /// Abort the current session or replay.
    pub async fn stop(&self) -> Result<(), AgentError> {
        self.send(Input::Stop).await
    }

    /// Stop the agent loop.
    pub async fn shutdown(&self) -> Result<(), AgentError> {
        self.send(Input::Shutdown).await
    }
}

/// Turn user input into an absolute URL.
pub fn normalize_url(address: &str) -> Result<String, AgentError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(AgentError::InvalidUrl(address.to_string()));
    }
    let candidate = if address.contains("://") || address.starts_with("about:") {
        address.to_string()
    } else {
        format!("https://{}", address)
    };
    url::Url::parse(&candidate)
        .map(|u| u.to_string())
        .map_err(|_| AgentError::InvalidUrl(address.to_string()))
}

/// The web agent: wires the state machine to a page, a planner and storage.
pub struct WebAgent {
    surface: Arc<dyn PageSurface>,
    page_events: mpsc::UnboundedReceiver<PageEvent>,
    planner: Arc<Planner>,
    knowledge: KnowledgeBase,
    perceiver: Perceiver,
    executor: ActionExecutor,
    machine: AgentMachine,
    mode: SessionMode,
    perception: PerceptionMode,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    notices: mpsc::UnboundedSender<Notice>,
}

impl WebAgent {
    /// Create the agent and the receiver its notices are delivered on.
    pub fn new(
        config: AgentConfig,
        surface: Arc<dyn PageSurface>,
        page_events: mpsc::UnboundedReceiver<PageEvent>,
        planner: Planner,
        knowledge: KnowledgeBase,
    ) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let perceiver =
            Perceiver::new(surface.clone()).with_vision_settle(config.timings.vision_settle);
        let executor = ActionExecutor::new(config.lang.clone())
            .with_submit_on_type(config.submit_on_type)
            .with_interaction_settle(config.timings.interaction_settle);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices, notices_rx) = mpsc::unbounded_channel();

        let agent = Self {
            surface,
            page_events,
            planner: Arc::new(planner),
            knowledge,
            perceiver,
            executor,
            mode: config.default_mode,
            perception: config.default_perception,
            machine: AgentMachine::new(config),
            events_tx,
            events_rx,
            notices,
        };
        (agent, notices_rx)
    }

    /// Spawn the control loop and return a handle to it.
    ///
    /// The loop ends on [`AgentHandle::shutdown`] or when every handle has
    /// been dropped; the notice channel closes with it.
    pub fn spawn(self) -> AgentHandle {
        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(self.run(rx));
        AgentHandle { tx }
    }

    async fn run(mut self, mut inputs: mpsc::Receiver<Input>) {
        info!(mode = %self.mode, perception = %self.perception, "Web agent started");

        loop {
            tokio::select! {
                biased;

                input = inputs.recv() => {
                    let Some(input) = input else { break };
                    if !self.on_input(input).await {
                        break;
                    }
                }

                Some(event) = self.events_rx.recv() => self.apply(event).await,

                Some(page_event) = self.page_events.recv() => self.on_page_event(page_event).await,
            }
        }

        info!("Web agent stopped");
    }

    /// Returns `false` when the loop should exit.
    async fn on_input(&mut self, input: Input) -> bool {
        match input {
            Input::Submit(goal) => self.submit(goal).await,
            Input::Transcript(Ok(text)) => {
                debug!("Voice transcript: {}", text);
                self.submit(text).await;
            }
            Input::Transcript(Err(e)) => {
                warn!("Voice input failed: {}", e);
                self.notify(Notice::VoiceError(e));
            }
            Input::ReplayChoice(replay) => self.apply(Event::ReplayChoice { replay }).await,
            Input::PlaySkill(goal) => match self.knowledge.skill(&goal) {
                Some(plans) => {
                    let plans = plans.to_vec();
                    self.apply(Event::PlaySkill {
                        goal: goal_key(&goal),
                        plans,
                    })
                    .await
                }
                None => self.notify(Notice::UnknownSkill(goal)),
            },
            Input::ForgetSkill { goal, reply } => {
                let result = self.knowledge.forget_skill(&goal).await;
                let _ = reply.send(result);
            }
            Input::Skills(reply) => {
                let _ = reply.send(self.knowledge.skill_keys());
            }
            Input::Open(url) => {
                info!(url = %url, "Opening page");
                let surface = self.surface.clone();
                tokio::spawn(async move {
                    if let Err(e) = surface.load(&url).await {
                        warn!("Failed to open {}: {}", url, e);
                    }
                });
            }
            Input::SetMode(mode) => {
                info!(mode = %mode, "Agent mode changed");
                self.mode = mode;
            }
            Input::SetPerception(perception) => {
                info!(perception = %perception, "Perception mode changed");
                self.perception = perception;
            }
            Input::Stop => self.apply(Event::Stop).await,
            Input::Shutdown => return false,
        }
        true
    }

    async fn submit(&mut self, goal: String) {
        let skill = self.knowledge.skill(&goal).map(<[Plan]>::to_vec);
        self.apply(Event::Submit {
            goal,
            mode: self.mode,
            perception: self.perception,
            skill,
        })
        .await;
    }

    async fn on_page_event(&mut self, event: PageEvent) {
        match event {
            PageEvent::Message(PageMessage::SnapshotData { ticket, payload }) => {
                let snapshot = structural::distill(payload);
                // Advisory reflects what was known before this snapshot is saved.
                let advisory = self.knowledge.site_advisory(&snapshot.url);
                self.apply(Event::Perceived {
                    ticket,
                    snapshot: Snapshot::Structural(snapshot),
                    advisory,
                })
                .await;
            }
            other => self.apply(Event::Page(other)).await,
        }
    }

    async fn apply(&mut self, event: Event) {
        for command in self.machine.handle(event) {
            self.perform(command).await;
        }
    }

    async fn perform(&mut self, command: Command) {
        match command {
            Command::Perceive { ticket, mode } => {
                let perceiver = self.perceiver.clone();
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let event = match perceiver.perceive(mode, ticket).await {
                        Ok(Some(snapshot)) => Event::Perceived {
                            ticket: Some(ticket),
                            snapshot,
                            advisory: None,
                        },
                        // Structural data arrives as a page message.
                        Ok(None) => return,
                        Err(e) => Event::PerceptionFailed {
                            ticket,
                            error: e.to_string(),
                        },
                    };
                    let _ = events.send(event);
                });
            }
            Command::RequestPlan { ticket, request } => {
                let planner = self.planner.clone();
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let event = match planner.plan(&request).await {
                        Ok(plan) => Event::Planned { ticket, plan },
                        Err(e) => Event::PlanningFailed {
                            ticket,
                            error: e.to_string(),
                        },
                    };
                    let _ = events.send(event);
                });
            }
            Command::Execute {
                ticket,
                plan,
                style,
            } => {
                let surface = self.surface.clone();
                let executor = self.executor.clone();
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = executor.execute(surface.as_ref(), &plan, ticket, style).await {
                        let _ = events.send(Event::ExecutionFailed {
                            ticket,
                            error: e.to_string(),
                        });
                    }
                });
            }
            Command::Navigate { ticket, url } => {
                let surface = self.surface.clone();
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = surface.load(&url).await {
                        let _ = events.send(Event::ExecutionFailed {
                            ticket,
                            error: e.to_string(),
                        });
                    }
                });
            }
            Command::WatchMutations => {
                let surface = self.surface.clone();
                tokio::spawn(async move {
                    if let Err(e) = surface.dispatch(PageCommand::WatchMutations).await {
                        debug!("Mutation observer not installed: {}", e);
                    }
                });
            }
            Command::ClearGuidance => {
                let surface = self.surface.clone();
                tokio::spawn(async move {
                    if let Err(e) = surface.dispatch(PageCommand::ClearGuidance).await {
                        debug!("Guidance not cleared: {}", e);
                    }
                });
            }
            Command::Schedule {
                ticket,
                timer,
                delay,
            } => {
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(Event::TimerFired { ticket, timer });
                });
            }
            Command::SaveSkill { goal, plans } => {
                match self.knowledge.save_skill(&goal, plans).await {
                    Ok(()) => self.notify(Notice::SkillSaved(goal_key(&goal))),
                    Err(e) => {
                        warn!("Skill not saved: {}", e);
                        self.notify(Notice::KnowledgeUnavailable(e.to_string()));
                    }
                }
            }
            Command::SaveSiteMap { url, elements } => {
                match self.knowledge.save_site_map(&url, &elements).await {
                    Ok(()) => {}
                    Err(KnowledgeError::NoDomain(url)) => debug!("No site map for {}", url),
                    Err(e) => warn!("Site map not saved: {}", e),
                }
            }
            Command::Notify(notice) => self.notify(notice),
        }
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }
}
