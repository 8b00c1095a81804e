use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::config::Config;

/// Last pushed message bundle, persisted as a JSON array of strings.
///
/// Checks through one `PushState` are serialized; separate processes sharing
/// the same file are not coordinated.
#[derive(Debug)]
pub struct PushState {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PushState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.pushed_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored bundle; a missing file is an empty bundle.
    pub async fn load(&self) -> Result<Vec<String>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", self.path.display()))
            }
        };
        serde_json::from_str(&content)
            .with_context(|| format!("invalid push state in {}", self.path.display()))
    }

    /// Returns true and persists `candidate` when it differs from the stored
    /// bundle; returns false without touching the file otherwise.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn should_push(&self, candidate: &[String]) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let last = self.load().await?;
        if last == candidate {
            debug!("bundle unchanged, no push needed");
            return Ok(false);
        }
        self.store(candidate).await?;
        info!(blocks = candidate.len(), "bundle changed, push state updated");
        Ok(true)
    }

    /// Write to a sibling temp file then rename over the target.
    async fn store(&self, bundle: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(bundle).context("failed to encode push state")?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, body)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}
