//! Model client module for AI inference.

mod client;

pub use client::{
    ApiProvider, MessageBuilder, ModelClient, ModelConfig, ModelError, ModelResponse,
    ReasoningBackend, ReasoningRequest, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_SECS,
};
