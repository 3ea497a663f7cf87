//! Local on-disk cache of verified bundle bytes.
//!
//! Files are named `{deployment_hash}_{bundle_hash}`, where the bundle hash
//! covers the bundle's ID, URI and checksum. A replaced bundle therefore
//! never overwrites the bytes of the one currently served, and everything a
//! deployment cached can be evicted by prefix.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use gatesync_state::Bundle;

use crate::error::CacheError;

/// Directory holding verified bundle bytes.
#[derive(Debug, Clone)]
pub struct BundleCache {
    dir: PathBuf,
}

impl BundleCache {
    /// Create the cache directory if needed and resolve it to an absolute path.
    pub async fn create(dir: &Path) -> Result<Self, CacheError> {
        let io_err = |source| CacheError {
            path: dir.display().to_string(),
            source,
        };
        tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
        let dir = tokio::fs::canonicalize(dir).await.map_err(io_err)?;
        debug!(?dir, "bundle cache ready");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path the bundle's verified bytes are cached at.
    pub fn path_for(&self, bundle: &Bundle) -> PathBuf {
        let content = format!("{}\0{}\0{}", bundle.id, bundle.uri, bundle.checksum);
        self.dir.join(format!(
            "{}_{}",
            deployment_hash(&bundle.deployment_id),
            short_hash(&content)
        ))
    }

    /// Write verified bytes into the cache, returning their `file://` URI.
    pub async fn store(&self, bundle: &Bundle, bytes: &[u8]) -> Result<String, CacheError> {
        let path = self.path_for(bundle);
        let tmp = path.with_extension("partial");
        let io_err = |source| CacheError {
            path: path.display().to_string(),
            source,
        };
        tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;
        debug!(deployment = %bundle.deployment_id, bundle = %bundle.id, ?path, "bundle cached");
        Ok(format!("file://{}", path.display()))
    }

    /// Remove every cached file of a deployment. Returns how many were removed.
    pub async fn evict_deployment(&self, deployment_id: &str) -> Result<usize, CacheError> {
        let removed = self.evict_where(deployment_id, |_| true).await?;
        debug!(%deployment_id, removed, "bundle cache evicted");
        Ok(removed)
    }

    /// Remove cached files of a deployment that belong to none of its
    /// `current` bundles. Returns how many were removed.
    pub async fn evict_replaced(&self, deployment_id: &str, current: &[Bundle]) -> Result<usize, CacheError> {
        let keep: Vec<PathBuf> = current.iter().map(|b| self.path_for(b)).collect();
        let removed = self.evict_where(deployment_id, |path| !keep.iter().any(|k| k.as_path() == path)).await?;
        if removed > 0 {
            debug!(%deployment_id, removed, "replaced bundles evicted");
        }
        Ok(removed)
    }

    async fn evict_where(&self, deployment_id: &str, evict: impl Fn(&Path) -> bool) -> Result<usize, CacheError> {
        let io_err = |source| CacheError {
            path: self.dir.display().to_string(),
            source,
        };
        let prefix = format!("{}_", deployment_hash(deployment_id));
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(io_err)?;
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if entry.file_name().to_string_lossy().starts_with(&prefix) && evict(&path) {
                tokio::fs::remove_file(&path).await.map_err(io_err)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn deployment_hash(deployment_id: &str) -> String {
    short_hash(deployment_id)
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..16])
}
