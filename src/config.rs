use std::{env, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use url::Url;

use crate::ai::RetryPolicy;
use crate::db::DEFAULT_MAX_POOL_SIZE;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub aws_endpoint_url: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_region: String,
    pub s3_bucket_uploads: String,
    pub gemini: GeminiConfig,
    pub pipeline: PipelineSettings,
    pub retry: RetryPolicy,
    pub worker_concurrency: usize,
    pub worker_poll_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub timeout_secs: u64,
}

/// Tunables consumed by the pipeline stages.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub facts_input_budget: usize,
    pub classifier_sample_chars: usize,
    pub context_max_tokens: usize,
    pub retrieval_candidates: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            facts_input_budget: 8000,
            classifier_sample_chars: 2000,
            context_max_tokens: 1500,
            retrieval_candidates: 10,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let aws_endpoint_url = env::var("AWS_ENDPOINT_URL").ok();
        let aws_access_key_id = env::var("AWS_ACCESS_KEY_ID").ok();
        let aws_secret_access_key = env::var("AWS_SECRET_ACCESS_KEY").ok();
        let aws_region = env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let s3_bucket_uploads =
            env::var("S3_BUCKET_UPLOADS").unwrap_or_else(|_| "uploads".to_string());

        let gemini = GeminiConfig {
            api_key: env::var("GEMINI_API_KEY").context("GEMINI_API_KEY must be set")?,
            base_url: env::var("GEMINI_BASE_URL").unwrap_or_else(|_| {
                "https://generativelanguage.googleapis.com/v1beta".to_string()
            }),
            model: env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".to_string()),
            embedding_model: env::var("GEMINI_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-004".to_string()),
            embedding_dimensions: parse_var("EMBEDDING_DIMENSIONS", 768)?,
            timeout_secs: parse_var("GEMINI_TIMEOUT_SECS", 60)?,
        };

        let defaults = PipelineSettings::default();
        let pipeline = PipelineSettings {
            chunk_size: parse_var("CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: parse_var("CHUNK_OVERLAP", defaults.chunk_overlap)?,
            facts_input_budget: parse_var("FACTS_INPUT_BUDGET", defaults.facts_input_budget)?,
            classifier_sample_chars: parse_var(
                "CLASSIFIER_SAMPLE_CHARS",
                defaults.classifier_sample_chars,
            )?,
            context_max_tokens: parse_var("CONTEXT_MAX_TOKENS", defaults.context_max_tokens)?,
            retrieval_candidates: parse_var("RETRIEVAL_TOP_K", defaults.retrieval_candidates)?,
        };
        anyhow::ensure!(pipeline.chunk_size > 0, "CHUNK_SIZE must be positive");

        let retry = RetryPolicy {
            max_attempts: parse_var("SERVICE_MAX_ATTEMPTS", 3)?,
            base_delay: Duration::from_millis(parse_var("SERVICE_RETRY_BASE_MS", 500)?),
        };

        let worker_concurrency = parse_var::<usize>("WORKER_CONCURRENCY", 2)?.max(1);
        let worker_poll_interval =
            Duration::from_secs(parse_var("WORKER_POLL_INTERVAL_SECS", 2)?);

        Ok(Self {
            database_url,
            database_max_pool_size,
            aws_endpoint_url,
            aws_access_key_id,
            aws_secret_access_key,
            aws_region,
            s3_bucket_uploads,
            gemini,
            pipeline,
            retry,
            worker_concurrency,
            worker_poll_interval,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .ok()
            .with_context(|| format!("{name} must be a valid number")),
        Err(_) => Ok(default),
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            let _ = parsed.set_password(Some("*****"));
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
