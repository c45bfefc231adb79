use thiserror::Error;
use uuid::Uuid;

use crate::ai::ServiceError;
use crate::jobs::JobQueueError;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failures that abort a job run. Expected per-file problems never surface here:
/// extractors and the classifier report them as flagged values instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("database pool error: {0}")]
    Pool(String),
    #[error("job queue error: {0}")]
    Queue(#[from] JobQueueError),
    #[error("{stage} service failed")]
    Service {
        stage: &'static str,
        #[source]
        source: ServiceError,
    },
    #[error("facts response is not valid JSON: {0}")]
    FactsParse(String),
    #[error("invalid template schema: {0}")]
    TemplateSchema(String),
    #[error("no files found for report {0}")]
    NoFiles(Uuid),
    #[error("job run {0} not found")]
    JobNotFound(Uuid),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn service(stage: &'static str, source: ServiceError) -> Self {
        PipelineError::Service { stage, source }
    }

    pub fn pool<E: std::fmt::Display>(error: E) -> Self {
        PipelineError::Pool(error.to_string())
    }
}
