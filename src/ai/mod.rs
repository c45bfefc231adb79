//! Generative text and embedding service seams.
//!
//! Every pipeline stage receives its clients as `Arc<dyn TextGenerator>` /
//! `Arc<dyn EmbeddingClient>`; the worker binary wires in [`gemini::GeminiClient`]
//! wrapped in [`retry::Retrying`], tests wire in scripted fakes.

use async_trait::async_trait;
use thiserror::Error;

pub mod gemini;
pub mod retry;

pub use gemini::GeminiClient;
pub use retry::{RetryPolicy, Retrying};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid service response: {0}")]
    Decode(String),
    #[error("service returned no content")]
    EmptyResponse,
    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl ServiceError {
    /// Transport failures, rate limiting and 5xx responses are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Request(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            ServiceError::Status { status, .. } => *status == 429 || *status >= 500,
            ServiceError::Decode(_)
            | ServiceError::EmptyResponse
            | ServiceError::DimensionMismatch { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub context: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: None,
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Context first, then the instruction, separated by a blank line.
    pub fn full_prompt(&self) -> String {
        match self.context.as_deref() {
            Some(context) if !context.trim().is_empty() => {
                format!("{context}\n\n{}", self.prompt)
            }
            _ => self.prompt.clone(),
        }
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync + 'static {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync + 'static {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError>;
}
