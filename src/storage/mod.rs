//! Key-value persistence for JSON blobs.

mod file;
mod memory;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Stored value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// A durable map from string keys to JSON values.
///
/// `set` replaces the whole value for the key; a failed `set` leaves the
/// previous value in place.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError>;
}
