//! Planner: one reasoning round trip that yields exactly one [`Plan`].

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::actions::{Plan, Target};
use crate::agent::knowledge::SiteAdvisory;
use crate::config::{structural_prompt, vision_prompt};
use crate::model::{ModelClient, ModelConfig, ModelError, ReasoningBackend, ReasoningRequest};
use crate::perception::{PerceptionMode, Snapshot};

/// Planner errors. Every variant stops the session; no plan is guessed.
#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("Reasoning request failed: {0}")]
    Transport(#[from] ModelError),
    #[error("No JSON object in model response: {0:?}")]
    NoJson(String),
    #[error("Malformed plan: {0}")]
    Malformed(String),
    #[error("Plan addresses its target by {found} but the page was perceived by {mode}")]
    AddressingMismatch {
        found: &'static str,
        mode: PerceptionMode,
    },
}

/// Configuration for the planner.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub model_config: ModelConfig,
    /// Echo previous actions of the session back to the model.
    pub include_history: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            model_config: ModelConfig::default(),
            include_history: true,
        }
    }
}

impl PlannerConfig {
    /// Set the model configuration.
    pub fn with_model_config(mut self, config: ModelConfig) -> Self {
        self.model_config = config;
        self
    }

    pub fn with_history(mut self, include_history: bool) -> Self {
        self.include_history = include_history;
        self
    }
}

/// Everything the planner needs for one decision.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub goal: String,
    pub snapshot: Snapshot,
    pub advisory: Option<SiteAdvisory>,
    pub history: Vec<Plan>,
}

/// Asks the reasoning backend for the next step.
pub struct Planner {
    backend: Arc<dyn ReasoningBackend>,
    include_history: bool,
}

impl Planner {
    pub fn new(backend: Arc<dyn ReasoningBackend>) -> Self {
        Self {
            backend,
            include_history: true,
        }
    }

    /// Planner talking to the endpoint described by `config`.
    pub fn from_config(config: PlannerConfig) -> Self {
        let client = ModelClient::new(config.model_config);
        Self {
            backend: Arc::new(client),
            include_history: config.include_history,
        }
    }

    /// Build the prompt, ask once, and validate the answer.
    pub async fn plan(&self, request: &PlanRequest) -> Result<Plan, PlannerError> {
        let reasoning = self.build_request(request);
        let mode = request.snapshot.mode();
        debug!(mode = %mode, chars = reasoning.prompt.len(), "Requesting plan");

        let response = self.backend.complete(&reasoning).await?;
        if !response.thinking.is_empty() {
            debug!(thinking = %response.thinking, "Model reasoning");
        }

        let plan = parse_plan(&response.answer, mode)?;
        info!(plan = %plan, "Planned next step");
        Ok(plan)
    }

    fn build_request(&self, request: &PlanRequest) -> ReasoningRequest {
        let history: &[Plan] = if self.include_history {
            &request.history
        } else {
            &[]
        };

        match &request.snapshot {
            Snapshot::Vision(screenshot) => {
                ReasoningRequest::text(vision_prompt(&request.goal, history))
                    .with_image(screenshot.clone())
            }
            Snapshot::Structural(snapshot) => {
                let elements = serde_json::to_string(&snapshot.elements).unwrap_or_default();
                let note = request
                    .advisory
                    .as_ref()
                    .map(SiteAdvisory::note)
                    .unwrap_or_else(|| "New site.".to_string());
                ReasoningRequest::text(structural_prompt(
                    &request.goal,
                    &snapshot.url,
                    &snapshot.title,
                    &elements,
                    &note,
                    history,
                ))
            }
        }
    }
}

/// Extract, decode and check a plan from raw model text.
pub fn parse_plan(text: &str, mode: PerceptionMode) -> Result<Plan, PlannerError> {
    let json = extract_first_json_object(text).ok_or_else(|| {
        let preview: String = text.chars().take(200).collect();
        PlannerError::NoJson(preview)
    })?;

    let plan: Plan = serde_json::from_str(json).map_err(|e| {
        warn!("Rejected plan {}: {}", json, e);
        PlannerError::Malformed(e.to_string())
    })?;

    check_addressing(&plan, mode)?;
    Ok(plan)
}

fn check_addressing(plan: &Plan, mode: PerceptionMode) -> Result<(), PlannerError> {
    match (plan.target(), mode) {
        (Some(Target::Selector(_)), PerceptionMode::Vision) => {
            Err(PlannerError::AddressingMismatch {
                found: "selector",
                mode,
            })
        }
        (Some(Target::Point(_)), PerceptionMode::Structural) => {
            Err(PlannerError::AddressingMismatch {
                found: "coordinates",
                mode,
            })
        }
        _ => Ok(()),
    }
}

/// The first balanced `{...}` substring of `text`.
///
/// Braces inside JSON string literals (including escaped quotes) do not
/// count. If an opening brace never closes, scanning resumes at the next one.
pub fn extract_first_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (i, &b) in bytes.iter().enumerate().skip(start) {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&text[start..=i]);
                    }
                }
                _ => {}
            }
        }

        search_from = start + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelResponse;
    use crate::page::Screenshot;
    use crate::perception::{ElementDescriptor, StructuralSnapshot};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CannedBackend {
        reply: String,
        prompts: Mutex<Vec<ReasoningRequest>>,
    }

    impl CannedBackend {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ReasoningBackend for CannedBackend {
        async fn complete(&self, request: &ReasoningRequest) -> Result<ModelResponse, ModelError> {
            self.prompts.lock().unwrap().push(request.clone());
            Ok(ModelResponse::from_content(self.reply.clone()))
        }
    }

    fn vision_request() -> PlanRequest {
        PlanRequest {
            goal: "open mail".to_string(),
            snapshot: Snapshot::Vision(Screenshot::new("AAAA".to_string(), "image/jpeg", 10, 10)),
            advisory: None,
            history: Vec::new(),
        }
    }

    fn structural_request(advisory: Option<SiteAdvisory>) -> PlanRequest {
        PlanRequest {
            goal: "search".to_string(),
            snapshot: Snapshot::Structural(StructuralSnapshot {
                url: "https://find.test/".to_string(),
                title: "Find".to_string(),
                elements: vec![ElementDescriptor {
                    tag: "INPUT".to_string(),
                    text: String::new(),
                    selector: "input#q".to_string(),
                }],
            }),
            advisory,
            history: Vec::new(),
        }
    }

    #[test]
    fn test_extract_skips_braces_in_strings() {
        let text = r#"Sure! {"action": "type", "value": "a } tricky \" { one"} and {"x": 1}"#;
        assert_eq!(
            extract_first_json_object(text),
            Some(r#"{"action": "type", "value": "a } tricky \" { one"}"#)
        );
    }

    #[test]
    fn test_extract_is_not_greedy() {
        let text = r#"{"action":"finish"} then {"action":"click"}"#;
        assert_eq!(extract_first_json_object(text), Some(r#"{"action":"finish"}"#));
    }

    #[test]
    fn test_extract_nested_and_fenced() {
        let text = "```json\n{\"a\": {\"b\": {}}}\n```";
        assert_eq!(extract_first_json_object(text), Some("{\"a\": {\"b\": {}}}"));
    }

    #[test]
    fn test_extract_resumes_after_unbalanced_brace() {
        let text = r#"use { carefully: {"action":"finish"}"#;
        assert_eq!(extract_first_json_object(text), Some(r#"{"action":"finish"}"#));
        assert_eq!(extract_first_json_object("no json here"), None);
        assert_eq!(extract_first_json_object("{ never closed"), None);
    }

    #[test]
    fn test_parse_plan_checks_addressing() {
        let vision_click = r#"{"action":"click","x":10,"y":20}"#;
        assert!(parse_plan(vision_click, PerceptionMode::Vision).is_ok());
        assert!(matches!(
            parse_plan(vision_click, PerceptionMode::Structural),
            Err(PlannerError::AddressingMismatch { .. })
        ));

        let selector_click = r#"{"action":"click","selector":"a.x"}"#;
        assert!(matches!(
            parse_plan(selector_click, PerceptionMode::Vision),
            Err(PlannerError::AddressingMismatch { .. })
        ));

        let finish = r#"{"action":"finish"}"#;
        assert!(parse_plan(finish, PerceptionMode::Structural).unwrap().is_finish());
    }

    #[test]
    fn test_parse_plan_errors() {
        assert!(matches!(
            parse_plan("I cannot help", PerceptionMode::Vision),
            Err(PlannerError::NoJson(_))
        ));
        assert!(matches!(
            parse_plan(r#"{"action":"dance"}"#, PerceptionMode::Vision),
            Err(PlannerError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_vision_plan_attaches_screenshot() {
        let backend = CannedBackend::new("<think>top right</think>{\"action\":\"click\",\"x\":900,\"y\":50}");
        let planner = Planner::new(backend.clone());
        let plan = planner.plan(&vision_request()).await.unwrap();
        assert_eq!(plan.action_name(), "click");

        let prompts = backend.prompts.lock().unwrap();
        assert!(prompts[0].image.is_some());
        assert!(prompts[0].prompt.contains("0-1000 scale"));
    }

    #[tokio::test]
    async fn test_structural_plan_uses_site_note() {
        let backend = CannedBackend::new(r#"{"action":"type","selector":"input#q","value":"rust"}"#);
        let planner = Planner::new(backend.clone());
        let advisory = SiteAdvisory {
            domain: "find.test".to_string(),
            known_elements: vec![ElementDescriptor {
                tag: "A".to_string(),
                text: "Home".to_string(),
                selector: "a.home".to_string(),
            }],
        };
        let plan = planner
            .plan(&structural_request(Some(advisory)))
            .await
            .unwrap();
        assert_eq!(plan.value(), Some("rust"));

        let prompts = backend.prompts.lock().unwrap();
        assert!(prompts[0].image.is_none());
        assert!(prompts[0].prompt.contains("Known site, previously seen elements"));
        assert!(prompts[0].prompt.contains("input#q"));
    }

    #[tokio::test]
    async fn test_structural_plan_without_advisory_is_new_site() {
        let backend = CannedBackend::new(r#"{"action":"finish"}"#);
        let planner = Planner::new(backend.clone());
        planner.plan(&structural_request(None)).await.unwrap();
        assert!(backend.prompts.lock().unwrap()[0]
            .prompt
            .contains("MEMORY NOTE: New site."));
    }
}
