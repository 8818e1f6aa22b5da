//! One JSON file per key inside a directory.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::{KeyValueStore, StoreError};

/// File-backed store. Writes go to a temporary file that is then renamed over
/// the target, so a reader sees either the old or the new blob.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Platform data directory for the agent's knowledge files.
    pub fn default_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "webagent", "web-agent")
            .map(|dirs| dirs.data_dir().join("knowledge"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(value)?;

        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.get("@agent_skills").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested"));
        let value = json!({"open mail": [{"action": "finish"}]});

        store.set("@agent_skills", &value).await.unwrap();
        assert_eq!(store.get("@agent_skills").await.unwrap(), Some(value));
        assert!(dir.path().join("nested/_agent_skills.json").exists());
        assert!(!dir.path().join("nested/_agent_skills.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        std::fs::write(dir.path().join("_agent_sitemaps.json"), "{not json").unwrap();
        assert!(matches!(
            store.get("@agent_sitemaps").await,
            Err(StoreError::Json(_))
        ));
    }
}
