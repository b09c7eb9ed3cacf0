use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sha1::{Digest, Sha1};

use crate::{
    core::{event::EdgeResponse, lifecycle::X_CACHE, policy::CachePolicy},
    ports::cache_store::{CacheEntry, CacheStore, CacheStoreError, CacheStoreResult},
};

/// Durable cache store keeping one JSON record per URI on disk.
///
/// Layout: `<dir>/<namespace>/<sha1(uri)>.json`. Records are written to a
/// temporary file and renamed into place so readers never see partial JSON.
/// Expiry is only checked on lookup; nothing sweeps in the background.
#[derive(Debug)]
pub struct FileCacheStore {
    root: PathBuf,
    closed: AtomicBool,
}

impl FileCacheStore {
    /// Open (creating if needed) the store for `namespace` under `dir`.
    pub fn open(dir: impl AsRef<Path>, namespace: &str) -> CacheStoreResult<Self> {
        let root = dir.as_ref().join(namespace);
        std::fs::create_dir_all(&root)?;
        tracing::info!("Opened edge cache at {}", root.display());
        Ok(Self {
            root,
            closed: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, uri: &str) -> PathBuf {
        self.root
            .join(format!("{:x}.json", Sha1::digest(uri.as_bytes())))
    }

    fn ensure_open(&self) -> CacheStoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(CacheStoreError::Closed)
        } else {
            Ok(())
        }
    }

    /// Lookup as of `now`; expired or unreadable records are removed.
    pub async fn lookup_at(
        &self,
        uri: &str,
        now: DateTime<Utc>,
    ) -> CacheStoreResult<Option<CacheEntry>> {
        self.ensure_open()?;
        let path = self.entry_path(uri);

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry: CacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Discarding unreadable cache record for {}: {}", uri, e);
                remove_if_present(&path).await?;
                return Ok(None);
            }
        };

        if entry.is_expired_at(now) {
            tracing::debug!("Cache entry for {} expired at {}", uri, entry.expire);
            remove_if_present(&path).await?;
            return Ok(None);
        }

        Ok(Some(entry))
    }

    /// Store as of `now`.
    pub async fn store_at(
        &self,
        uri: &str,
        response: &EdgeResponse,
        policy: &CachePolicy,
        now: DateTime<Utc>,
    ) -> CacheStoreResult<CacheEntry> {
        self.ensure_open()?;
        let ttl = policy.ttl_for(&response.headers);
        let delta = TimeDelta::try_seconds(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or(TimeDelta::MAX);
        let expire = now
            .checked_add_signed(delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut headers = response.headers.clone();
        headers.remove(X_CACHE);
        let entry = CacheEntry {
            uri: uri.to_string(),
            expire,
            body: response.body.clone(),
            body_encoding: response.body_encoding,
            status: response.status,
            headers,
        };

        let path = self.entry_path(uri);
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        let record = serde_json::to_vec(&entry)?;
        match tokio::fs::write(&tmp, &record).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&self.root).await?;
                tokio::fs::write(&tmp, &record).await?;
            }
            Err(e) => return Err(e.into()),
        }
        match tokio::fs::rename(&tmp, &path).await {
            Ok(()) => tracing::debug!("Cached {} for {}s", uri, ttl.as_secs()),
            // A concurrent purge removed the temporary record; the write is lost.
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("Cache write for {} dropped by a concurrent purge", uri);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(entry)
    }
}

async fn remove_if_present(path: &Path) -> CacheStoreResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn lookup(&self, uri: &str) -> CacheStoreResult<Option<CacheEntry>> {
        self.lookup_at(uri, Utc::now()).await
    }

    async fn store(
        &self,
        uri: &str,
        response: &EdgeResponse,
        policy: &CachePolicy,
    ) -> CacheStoreResult<CacheEntry> {
        self.store_at(uri, response, policy, Utc::now()).await
    }

    async fn purge(&self) -> CacheStoreResult<()> {
        self.ensure_open()?;
        // Only records are removed; the namespace directory is kept.
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&self.root).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await.is_ok_and(|t| t.is_file()) {
                remove_if_present(&entry.path()).await?;
                removed += 1;
            }
        }
        tracing::info!(
            "Purged edge cache at {} ({} records)",
            self.root.display(),
            removed
        );
        Ok(())
    }

    async fn close(&self) -> CacheStoreResult<()> {
        self.closed.store(true, Ordering::Release);
        tracing::info!("Closed edge cache at {}", self.root.display());
        Ok(())
    }
}
