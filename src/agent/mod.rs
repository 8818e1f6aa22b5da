//! Agent module: the perceive, plan, act loop and what it learns.

pub mod knowledge;
mod machine;
mod macro_player;
mod planner;
mod session;
mod web_agent;

pub use knowledge::{
    domain_of, goal_key, KnowledgeBase, KnowledgeError, SiteAdvisory, SiteMaps, Skills,
    SITE_MAPS_KEY, SITE_MAP_CAPACITY, SKILLS_KEY,
};
pub use machine::{AgentMachine, AgentState, Command, Event, FailureReason, Notice, Timer};
pub use macro_player::{MacroPlayer, ReplayStep, DEFAULT_NAVIGATE_PAUSE, DEFAULT_STEP_PAUSE};
pub use planner::{
    extract_first_json_object, parse_plan, PlanRequest, Planner, PlannerConfig, PlannerError,
};
pub use session::{Session, SessionMode};
pub use web_agent::{normalize_url, AgentConfig, AgentError, AgentHandle, Timings, WebAgent};
