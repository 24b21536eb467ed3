//! Metadata/embedding extractor abstraction.
//!
//! The extractor is the paid external collaborator: text (or an image) in,
//! structured metadata plus an embedding vector out. [`Extractor`] is the
//! injectable seam; [`HttpExtractor`] calls a JSON API with retry and
//! backoff.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::config::ExtractorConfig;

/// Structured output of one extraction call.
#[derive(Debug, Clone, Deserialize)]
pub struct Extraction {
    pub title: String,
    pub summary: String,
    pub content_type: String,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub vector: Vec<f32>,
}

/// External text/image metadata-and-embedding extractor.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract metadata and an embedding from normalized text.
    async fn extract(&self, text: &str, filename: &str) -> Result<Extraction>;

    /// Produce a textual description of an image. The description replaces
    /// the image as the searchable artifact.
    async fn describe_image(&self, image: &[u8], filename: &str) -> Result<String>;
}

/// HTTP implementation of [`Extractor`].
pub struct HttpExtractor {
    base_url: String,
    api_key: String,
    model: Option<String>,
    max_retries: u32,
    client: reqwest::Client,
}

impl HttpExtractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            bail!("extractor.base_url is not configured");
        }
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!(
                "Extractor API key not found in environment variable {}",
                config.api_key_env
            )
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_retries: config.max_retries,
            client,
        })
    }

    async fn post_with_retry<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;
        loop {
            let result = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.json::<T>().await?);
                    }
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    let text = response.text().await.unwrap_or_default();
                    if !retryable {
                        bail!("extractor {} returned {}: {}", path, status, text.trim());
                    }
                    if attempt >= self.max_retries {
                        bail!(
                            "extractor {} still failing after {} retries: {} {}",
                            path,
                            self.max_retries,
                            status,
                            text.trim()
                        );
                    }
                    tracing::warn!("extractor {} returned {}, retrying", path, status);
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        bail!(
                            "extractor {} unreachable after {} retries: {}",
                            path,
                            self.max_retries,
                            e
                        );
                    }
                    tracing::warn!("extractor request failed ({}), retrying", e);
                }
            }

            let backoff = Duration::from_secs(1 << attempt.min(5));
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

#[derive(Deserialize)]
struct DescribeResponse {
    description: String,
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract(&self, text: &str, filename: &str) -> Result<Extraction> {
        let body = serde_json::json!({
            "model": self.model,
            "filename": filename,
            "text": text,
        });
        self.post_with_retry("/v1/extract", body).await
    }

    async fn describe_image(&self, image: &[u8], filename: &str) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let body = serde_json::json!({
            "model": self.model,
            "filename": filename,
            "image_base64": encoded,
        });
        let response: DescribeResponse = self.post_with_retry("/v1/describe", body).await?;
        Ok(response.description)
    }
}
