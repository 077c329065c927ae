//! OpenAI-based embedding client implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Embedder, EmbeddingError, EmbeddingVector};

/// Blocking embeddings client that talks to OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
}

impl OpenAiEmbedder {
    /// Builds a new OpenAI embeddings client.
    pub fn new(api_key: &str, base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing OpenAI model name");
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        let mut auth = HeaderValue::from_str(&auth).context("invalid OpenAI API key")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model: model.trim().to_string(),
        })
    }

    /// Full URL embedding requests are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Model identifier sent with each request.
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        // the model degrades on literal newlines
        let input = text.replace('\n', " ");
        let request = EmbeddingRequest {
            model: &self.model,
            input: [input.as_str()],
        };
        debug!(chars = input.chars().count(), model = %self.model, "requesting embedding");
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(EmbeddingError::Transport)?;

        let status = resp.status();
        if status.is_success() {
            let parsed: EmbeddingResponse = resp
                .json()
                .map_err(|err| EmbeddingError::Decode(err.to_string()))?;
            return parsed
                .data
                .into_iter()
                .next()
                .map(|entry| entry.embedding)
                .ok_or_else(|| EmbeddingError::Decode("response contained no embeddings".into()));
        }

        let body = resp
            .text()
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(EmbeddingError::RateLimited {
                message: api_error_message(&body),
            });
        }
        Err(EmbeddingError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

/// Pulls `error.message` out of an OpenAI error body, falling back to the raw body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|parsed| parsed.error.message)
        .unwrap_or_else(|_| body.to_string())
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: EmbeddingVector,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}
