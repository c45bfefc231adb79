use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EmbeddingClient, GenerationRequest, ServiceError, TextGenerator};
use crate::config::GeminiConfig;

const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 2048;

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    content: Content,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Embedding,
}

#[derive(Deserialize)]
struct Embedding {
    values: Vec<f32>,
}

/// Google Gemini REST client covering both `generateContent` and `embedContent`.
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    embedding_model: String,
    dimensions: usize,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            dimensions: config.embedding_dimensions,
        }
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<R, ServiceError> {
        let response = self
            .http
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status { status, body });
        }

        response
            .json::<R>()
            .await
            .map_err(|err| ServiceError::Decode(err.to_string()))
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ServiceError> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: request.full_prompt(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
            },
        };

        let url = self.endpoint(&self.model, "generateContent");
        debug!(model = %self.model, prompt_chars = body.contents[0].parts[0].text.len(), "calling gemini generateContent");
        let response: GenerateResponse = self.post(&url, &body).await?;

        response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .map(|part| part.text)
                    .collect::<String>()
            })
            .filter(|text| !text.trim().is_empty())
            .ok_or(ServiceError::EmptyResponse)
    }
}

#[async_trait]
impl EmbeddingClient for GeminiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let body = EmbedRequest {
            model: format!("models/{}", self.embedding_model),
            content: Content {
                parts: vec![Part {
                    text: text.to_string(),
                }],
            },
        };

        let url = self.endpoint(&self.embedding_model, "embedContent");
        let response: EmbedResponse = self.post(&url, &body).await?;
        let values = response.embedding.values;

        if values.len() != self.dimensions {
            return Err(ServiceError::DimensionMismatch {
                expected: self.dimensions,
                actual: values.len(),
            });
        }

        Ok(values)
    }
}
