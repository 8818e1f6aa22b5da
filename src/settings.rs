//! Settings for the web agent.
//! Persisted in the platform-specific config directory via `directories::ProjectDirs`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::agent::{AgentConfig, SessionMode};
use crate::model::{ApiProvider, ModelConfig};
use crate::page::ChromeOptions;
use crate::perception::PerceptionMode;
use crate::storage::JsonFileStore;

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "webagent", "web-agent")
}

/// Application settings that can be saved and loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Reasoning API provider ("gemini" or "openai")
    pub provider: ApiProvider,
    /// Model API base URL
    pub base_url: String,
    /// Model API key
    pub api_key: String,
    /// Model name
    pub model_name: String,
    /// Maximum retries for model requests
    pub max_retries: u32,
    /// Retry delay in seconds
    pub retry_delay: u64,
    /// Language code ("en" or "ru")
    pub lang: String,
    pub mode: SessionMode,
    pub perception: PerceptionMode,
    /// Page opened at startup
    pub home_url: String,
    /// Maximum steps per session
    pub max_steps: u32,
    pub max_not_found_retries: u32,
    /// Submit the form after typing into an input
    pub submit_on_type: bool,
    /// Re-analyze on DOM mutations
    pub reactive: bool,
    pub headless: bool,
    /// Where skills and site maps are stored; empty means the data directory
    pub knowledge_dir: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        let model = ModelConfig::default();
        let agent = AgentConfig::default();
        Self {
            provider: model.provider,
            base_url: model.base_url,
            api_key: model.api_key,
            model_name: model.model_name,
            max_retries: model.max_retries,
            retry_delay: model.retry_delay_secs,
            lang: agent.lang,
            mode: agent.default_mode,
            perception: agent.default_perception,
            home_url: "https://www.google.com".to_string(),
            max_steps: agent.max_steps,
            max_not_found_retries: agent.max_not_found_retries,
            submit_on_type: agent.submit_on_type,
            reactive: agent.reactive,
            headless: false,
            knowledge_dir: String::new(),
        }
    }
}

impl AppSettings {
    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the settings file path.
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("settings.json"))
    }

    /// Load settings from the config file.
    pub fn load() -> Self {
        let loaded: Self = Self::settings_path()
            .and_then(|path| fs::read_to_string(&path).ok())
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();
        loaded.backfilled()
    }

    /// Replace empty or zero values left by older config files with defaults.
    pub fn backfilled(mut self) -> Self {
        let defaults = Self::default();
        if self.base_url.is_empty() {
            self.base_url = defaults.base_url;
        }
        if self.model_name.is_empty() {
            self.model_name = defaults.model_name;
        }
        if self.lang.is_empty() {
            self.lang = defaults.lang;
        }
        if self.home_url.is_empty() {
            self.home_url = defaults.home_url;
        }
        if self.max_steps == 0 {
            self.max_steps = defaults.max_steps;
        }
        self
    }

    /// Save settings to the config file.
    pub fn save(&self) -> Result<(), String> {
        let dir = Self::config_dir().ok_or("Cannot determine config directory")?;

        fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;

        let path = dir.join("settings.json");
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        fs::write(&path, content).map_err(|e| format!("Failed to write settings file: {}", e))?;

        Ok(())
    }

    /// Directory holding the knowledge store.
    pub fn knowledge_path(&self) -> Option<PathBuf> {
        if self.knowledge_dir.trim().is_empty() {
            JsonFileStore::default_dir()
        } else {
            Some(PathBuf::from(self.knowledge_dir.trim()))
        }
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::default()
            .with_provider(self.provider)
            .with_base_url(&self.base_url)
            .with_api_key(&self.api_key)
            .with_model_name(&self.model_name)
            .with_max_retries(self.max_retries)
            .with_retry_delay(self.retry_delay)
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig::default()
            .with_lang(&self.lang)
            .with_default_mode(self.mode)
            .with_default_perception(self.perception)
            .with_max_steps(self.max_steps)
            .with_max_not_found_retries(self.max_not_found_retries)
            .with_submit_on_type(self.submit_on_type)
            .with_reactive(self.reactive)
    }

    pub fn chrome_options(&self) -> ChromeOptions {
        ChromeOptions::default().with_headless(self.headless)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings: AppSettings =
            serde_json::from_str(r#"{"lang": "ru", "perception": "structural"}"#).unwrap();
        assert_eq!(settings.lang, "ru");
        assert_eq!(settings.perception, PerceptionMode::Structural);
        assert_eq!(settings.mode, SessionMode::Auto);
        assert_eq!(settings.max_not_found_retries, 5);
        assert!(settings.submit_on_type);
    }

    #[test]
    fn test_load_is_always_backfilled() {
        let settings = AppSettings::load();
        assert!(!settings.base_url.is_empty());
        assert!(!settings.home_url.is_empty());
        assert!(settings.max_steps > 0);
    }

    #[test]
    fn test_backfill_empty_fields() {
        let settings = AppSettings {
            base_url: String::new(),
            home_url: String::new(),
            max_steps: 0,
            ..Default::default()
        }
        .backfilled();
        let defaults = AppSettings::default();
        assert_eq!(settings.base_url, defaults.base_url);
        assert_eq!(settings.home_url, defaults.home_url);
        assert_eq!(settings.max_steps, 100);
    }

    #[test]
    fn test_conversions() {
        let settings = AppSettings {
            lang: "ru".to_string(),
            max_steps: 7,
            knowledge_dir: "/tmp/knowledge".to_string(),
            ..Default::default()
        };
        let agent = settings.agent_config();
        assert_eq!(agent.lang, "ru");
        assert_eq!(agent.max_steps, 7);
        assert_eq!(
            settings.knowledge_path(),
            Some(PathBuf::from("/tmp/knowledge"))
        );
        assert_eq!(settings.model_config().model_name, settings.model_name);
    }
}
