use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{
    event::{BodyEncoding, EdgeHeaders, EdgeResponse},
    policy::CachePolicy,
};

/// Error type for cache persistence
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CacheStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache entry: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Cache store is closed")]
    Closed,
}

/// Result type for cache operations
pub type CacheStoreResult<T> = Result<T, CacheStoreError>;

fn default_status() -> u16 {
    200
}

/// One persisted response, keyed by request URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    #[serde(default)]
    pub uri: String,
    /// Absolute expiry, serialized as ISO-8601.
    pub expire: DateTime<Utc>,
    pub body: String,
    #[serde(default)]
    pub body_encoding: BodyEncoding,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub headers: EdgeHeaders,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expire
    }

    /// Rebuild a response from the stored record.
    pub fn to_response(&self) -> EdgeResponse {
        let mut response = EdgeResponse::new(self.status);
        response.headers = self.headers.clone();
        response.body = self.body.clone();
        response.body_encoding = self.body_encoding;
        response
    }
}

/// CacheStore defines the port for the edge response cache
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Return the live entry for `uri`; expired entries are deleted and reported absent.
    async fn lookup(&self, uri: &str) -> CacheStoreResult<Option<CacheEntry>>;

    /// Persist `response` under `uri` with a TTL derived from `policy`, returning the stored entry.
    async fn store(
        &self,
        uri: &str,
        response: &EdgeResponse,
        policy: &CachePolicy,
    ) -> CacheStoreResult<CacheEntry>;

    /// Remove every entry.
    async fn purge(&self) -> CacheStoreResult<()>;

    /// Release the store; later calls fail with [`CacheStoreError::Closed`].
    async fn close(&self) -> CacheStoreResult<()>;
}
