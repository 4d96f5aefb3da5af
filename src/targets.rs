//! Build target state
//!
//! Every artifact the pipeline writes is a target with a persisted record of
//! the digest of its declared inputs and the digest of the output it produced.
//! A target is up to date when both still match, in which case it is skipped.

use crate::cache::PersistentCache;
use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

/// Compute SHA-256 hash of content.
#[must_use]
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Incremental digest over labelled inputs
pub struct InputDigest {
    hasher: Sha256,
}

impl Default for InputDigest {
    fn default() -> Self {
        Self::new()
    }
}

impl InputDigest {
    #[must_use]
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// Add one input; labels and lengths are hashed too so boundaries stay unambiguous
    #[must_use]
    pub fn input(mut self, label: &str, content: &[u8]) -> Self {
        self.hasher.update((label.len() as u64).to_le_bytes());
        self.hasher.update(label.as_bytes());
        self.hasher.update((content.len() as u64).to_le_bytes());
        self.hasher.update(content);
        self
    }

    #[must_use]
    pub fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub inputs_digest: String,
    pub output_digest: String,
}

/// Persisted up-to-date records, one per target
#[derive(Clone)]
pub struct TargetState {
    cache: PersistentCache,
    force: bool,
}

impl TargetState {
    #[must_use]
    pub fn new(cache: PersistentCache) -> Self {
        Self {
            cache,
            force: false,
        }
    }

    /// Treat every target as stale
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    fn key(target: &str) -> String {
        format!("target:{target}")
    }

    pub async fn record_for(&self, target: &str) -> Result<Option<TargetRecord>> {
        self.cache.get(&Self::key(target)).await
    }

    /// Whether `output` was produced from inputs hashing to `inputs_digest`
    /// and has not changed since.
    pub async fn is_up_to_date(
        &self,
        target: &str,
        inputs_digest: &str,
        output: &Path,
    ) -> Result<bool> {
        if self.force {
            return Ok(false);
        }
        let Some(record) = self.record_for(target).await? else {
            debug!("{} has never been built", target);
            return Ok(false);
        };
        if record.inputs_digest != inputs_digest {
            debug!("{} inputs changed", target);
            return Ok(false);
        }
        let content = match tokio::fs::read(output).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} output {} is missing", target, output.display());
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        if compute_hash(&content) != record.output_digest {
            debug!("{} output {} was modified", target, output.display());
            return Ok(false);
        }
        Ok(true)
    }

    /// Remember that `output_content` was produced from `inputs_digest`
    pub async fn record(&self, target: &str, inputs_digest: &str, output_content: &[u8]) -> Result<()> {
        let record = TargetRecord {
            inputs_digest: inputs_digest.to_string(),
            output_digest: compute_hash(output_content),
        };
        self.cache.put(&Self::key(target), record, None).await
    }

    pub async fn forget(&self, target: &str) -> Result<()> {
        self.cache.remove(&Self::key(target)).await
    }

    pub async fn persist(&self) -> Result<()> {
        self.cache.persist().await
    }
}

/// Write an artifact through a temporary file and an atomic rename
pub async fn write_artifact(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    tokio::fs::write(&temp, content).await?;
    tokio::fs::rename(&temp, path).await?;
    Ok(())
}
