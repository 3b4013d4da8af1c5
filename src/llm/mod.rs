//! Generation service integration.
//!
//! Supports any OpenAI-compatible chat completions endpoint:
//! - **Groq** (default): `llama-3.3-70b-versatile`
//! - **OpenAI**
//!
//! Every agent talks to the provider through [`ThrottledCaller`], which adds
//! process-wide spacing and the shared [`RetryPolicy`].

pub mod http;
pub mod keys;
pub mod provider;
pub mod retry;
pub mod throttle;

pub use http::OpenAiCompatProvider;
pub use keys::KeyPool;
pub use provider::*;
pub use retry::{RetryClass, RetryPolicy};
pub use throttle::{RateLimiter, ThrottledCaller};

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::LlmError;

/// Supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Groq,
    OpenAi,
}

impl LlmBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "groq" => Some(Self::Groq),
            "openai" => Some(Self::OpenAi),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::OpenAi => "openai",
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1/chat/completions",
            Self::OpenAi => "https://api.openai.com/v1/chat/completions",
        }
    }

    /// Published (input, output) USD price per token.
    fn costs(&self) -> (Decimal, Decimal) {
        match self {
            Self::Groq => (dec!(0.00000059), dec!(0.00000079)),
            Self::OpenAi => (dec!(0.0000025), dec!(0.00001)),
        }
    }
}

/// Configuration for creating a provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    /// Never empty; agents are spread across these keys.
    pub api_keys: Vec<secrecy::SecretString>,
    pub model: String,
    /// Overrides the backend's default endpoint.
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

/// Create a raw (unthrottled) provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let endpoint = config
        .endpoint
        .clone()
        .unwrap_or_else(|| config.backend.default_endpoint().to_string());
    let keys = KeyPool::new(config.api_keys.clone()).ok_or_else(|| LlmError::AuthFailed {
        provider: config.backend.name().to_string(),
    })?;
    let provider = OpenAiCompatProvider::new(
        config.backend.name(),
        &endpoint,
        keys,
        &config.model,
        config.timeout,
        config.backend.costs(),
    )?;
    tracing::info!(backend = config.backend.name(), model = %config.model, "Using generation provider");
    Ok(Arc::new(provider))
}
