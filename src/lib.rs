// Copyright 2025 Zhipu AI (Original Python implementation)
// Copyright 2025 ModerRAS (Rust implementation)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Web Agent
//!
//! An autonomous web-navigation agent. Given a goal in natural language it
//! repeatedly perceives the current page (a screenshot, or a distilled list
//! of interactive elements), asks a multimodal reasoning model for exactly
//! one next step, and performs it, until the model declares the goal reached.
//!
//! In guided mode the agent highlights the element and waits for the user to
//! act instead. Completed runs are stored as skills and can be replayed
//! without the model; structural runs also leave a per-domain site map that
//! is fed back to later prompts.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use web_agent::{
//!     AgentConfig, ChromeOptions, ChromeSurface, JsonFileStore, KnowledgeBase, ModelConfig,
//!     Planner, PlannerConfig, WebAgent,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (surface, page_events) = ChromeSurface::launch(ChromeOptions::default()).await?;
//!     let planner = Planner::from_config(
//!         PlannerConfig::default().with_model_config(ModelConfig::default().with_api_key("KEY")),
//!     );
//!     let store = Arc::new(JsonFileStore::new("knowledge"));
//!     let knowledge = KnowledgeBase::load(store).await?;
//!
//!     let (agent, mut notices) =
//!         WebAgent::new(AgentConfig::default(), surface, page_events, planner, knowledge);
//!     let handle = agent.spawn();
//!     handle.open("example.com").await?;
//!     handle.submit("Find the contact page").await?;
//!
//!     while let Some(notice) = notices.recv().await {
//!         println!("{:?}", notice);
//!     }
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod agent;
pub mod config;
pub mod model;
pub mod page;
pub mod perception;
pub mod settings;
pub mod storage;

pub use actions::{ActionExecutor, ExecutionStyle, NormalizedPoint, Plan, PlanError, Target};
pub use agent::{
    AgentConfig, AgentError, AgentHandle, AgentMachine, AgentState, FailureReason, KnowledgeBase,
    KnowledgeError, MacroPlayer, Notice, PlanRequest, Planner, PlannerConfig, PlannerError,
    SessionMode, Timings, WebAgent,
};
pub use model::{ApiProvider, ModelClient, ModelConfig, ModelResponse, ReasoningBackend};
pub use page::{ChromeOptions, ChromeSurface, PageError, PageEvent, PageSurface, Screenshot};
pub use perception::{PerceptionError, PerceptionMode, Snapshot};
pub use settings::AppSettings;
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore, StoreError};
