//! Remote metadata/vector store client.
//!
//! The engine only needs a handful of black-box operations against the
//! store; query and ranking logic live elsewhere. [`RemoteStore`] is the
//! injectable seam, [`HttpRemoteStore`] the production implementation.
//!
//! Authorization failures are distinguished from every other failure
//! because they invalidate the whole processing run (see the pipeline's
//! abort semantics), while other store errors are file-scoped.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::config::StoreConfig;
use crate::models::SourceRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected our credential. Every subsequent call in the
    /// run will fail identically; callers abort instead of retrying.
    #[error("authorization failed: {0} (re-authenticate and retry)")]
    Unauthorized(String),
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, StoreError::Unauthorized(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Black-box operations the engine needs from the remote store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// One cheap authorized read. Used as the pre-processing preflight so
    /// a run with a dead credential fails before any extraction spend.
    async fn check_auth(&self) -> StoreResult<()>;

    /// Index one source record (insert, or update when `id` exists).
    async fn add_source(&self, record: &SourceRecord) -> StoreResult<()>;

    /// Which of `hashes` the store already knows. One batched read.
    async fn existing_content_hashes(&self, hashes: &[String]) -> StoreResult<HashSet<String>>;

    /// Map absolute origin paths to the ids they previously produced.
    /// One batched read.
    async fn source_path_mappings(&self, paths: &[String]) -> StoreResult<HashMap<String, String>>;

    /// All source records, for reconciliation.
    async fn list_sources(&self) -> StoreResult<Vec<SourceRecord>>;

    /// Fetch remote-stored full content for the given ids, batched.
    async fn fetch_full_content(&self, ids: &[String]) -> StoreResult<HashMap<String, String>>;

    /// Push full content for sources that predate remote content storage.
    async fn backfill_content(&self, items: &[(String, String)]) -> StoreResult<()>;

    /// Drop any cached connection state. Used by the auth-retry path.
    fn reset(&self) {}
}

/// HTTP implementation of [`RemoteStore`].
pub struct HttpRemoteStore {
    base_url: String,
    api_key: String,
    timeout: Duration,
    client: Mutex<reqwest::Client>,
}

impl HttpRemoteStore {
    pub fn new(config: &StoreConfig) -> anyhow::Result<Self> {
        if config.base_url.is_empty() {
            anyhow::bail!("store.base_url is not configured");
        }
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!(
                "Store API key not found in environment variable {}",
                config.api_key_env
            )
        })?;
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
            client: Mutex::new(build_client(timeout)),
        })
    }

    fn client(&self) -> reqwest::Client {
        // A panic while holding the lock must not take down every later
        // sync run; the cached client itself is still valid.
        self.client.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    async fn post_json<B: serde::Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> StoreResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client()
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| StoreError::Other(format!("store request to {} failed: {}", path, e)))?;
        Self::decode(path, response).await
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> StoreResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client()
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| StoreError::Other(format!("store request to {} failed: {}", path, e)))?;
        Self::decode(path, response).await
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        path: &str,
        response: reqwest::Response,
    ) -> StoreResult<T> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Unauthorized(format!(
                "{} returned {}: {}",
                path,
                status,
                body.trim()
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Other(format!(
                "{} returned {}: {}",
                path,
                status,
                body.trim()
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::Other(format!("invalid response from {}: {}", path, e)))
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

#[derive(Deserialize)]
struct HashesResponse {
    existing: Vec<String>,
}

#[derive(Deserialize)]
struct MappingsResponse {
    mappings: HashMap<String, String>,
}

#[derive(Deserialize)]
struct SourcesResponse {
    sources: Vec<SourceRecord>,
}

#[derive(Deserialize)]
struct ContentResponse {
    content: HashMap<String, String>,
}

#[derive(Deserialize)]
struct Empty {}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn check_auth(&self) -> StoreResult<()> {
        let _: Empty = self.get_json("/v1/auth/check").await?;
        Ok(())
    }

    async fn add_source(&self, record: &SourceRecord) -> StoreResult<()> {
        let _: Empty = self.post_json("/v1/sources", record).await?;
        Ok(())
    }

    async fn existing_content_hashes(&self, hashes: &[String]) -> StoreResult<HashSet<String>> {
        if hashes.is_empty() {
            return Ok(HashSet::new());
        }
        let response: HashesResponse = self
            .post_json("/v1/sources/hashes", &serde_json::json!({ "hashes": hashes }))
            .await?;
        Ok(response.existing.into_iter().collect())
    }

    async fn source_path_mappings(&self, paths: &[String]) -> StoreResult<HashMap<String, String>> {
        if paths.is_empty() {
            return Ok(HashMap::new());
        }
        let response: MappingsResponse = self
            .post_json("/v1/sources/paths", &serde_json::json!({ "paths": paths }))
            .await?;
        Ok(response.mappings)
    }

    async fn list_sources(&self) -> StoreResult<Vec<SourceRecord>> {
        let response: SourcesResponse = self.get_json("/v1/sources").await?;
        Ok(response.sources)
    }

    async fn fetch_full_content(&self, ids: &[String]) -> StoreResult<HashMap<String, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let response: ContentResponse = self
            .post_json("/v1/sources/content/fetch", &serde_json::json!({ "ids": ids }))
            .await?;
        Ok(response.content)
    }

    async fn backfill_content(&self, items: &[(String, String)]) -> StoreResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let body: Vec<_> = items
            .iter()
            .map(|(id, content)| serde_json::json!({ "id": id, "content": content }))
            .collect();
        let _: Empty = self
            .post_json(
                "/v1/sources/content/backfill",
                &serde_json::json!({ "items": body }),
            )
            .await?;
        Ok(())
    }

    fn reset(&self) {
        *self.client.lock().unwrap_or_else(|p| p.into_inner()) = build_client(self.timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    fn test_store() -> HttpRemoteStore {
        std::env::set_var("LOREBASE_TEST_STORE_KEY", "secret");
        HttpRemoteStore::new(&StoreConfig {
            base_url: "http://localhost:9/".to_string(),
            api_key_env: "LOREBASE_TEST_STORE_KEY".to_string(),
            timeout_secs: 1,
        })
        .unwrap()
    }

    #[test]
    fn client_survives_a_poisoned_lock() {
        let store = test_store();

        std::thread::scope(|s| {
            let handle = s.spawn(|| {
                let _guard = store.client.lock().unwrap();
                panic!("poison the lock");
            });
            assert!(handle.join().is_err());
        });

        // Still usable after the poisoning panic.
        let _ = store.client();
        store.reset();
        let _ = store.client();
    }
}
