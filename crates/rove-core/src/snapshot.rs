//! Snapshot cache.
//!
//! A snapshot is the cleaned capture of one page for one (address, entry
//! action) pair. Each key has a raw and a cleaned artifact on disk, kept in
//! a subdirectory per capture mode; only the cleaned one is read back.

use anyhow::{Context, Result};
use rove_config::CaptureMode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub step_index: usize,
    pub url: String,
    pub entry_action: String,
    pub cache_key: String,
    pub content: String,
}

impl Snapshot {
    /// The same capture attributed to another step
    pub fn for_step(&self, step_index: usize) -> Self {
        Self {
            step_index,
            ..self.clone()
        }
    }
}

/// Hex SHA-256 of `url + "\n" + entry_action`
pub fn cache_key(url: &str, entry_action: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"\n");
    hasher.update(entry_action.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct SnapshotCache {
    root: PathBuf,
}

impl SnapshotCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn mode_dir(&self, mode: CaptureMode) -> PathBuf {
        self.root.join(mode.as_str())
    }

    fn raw_path(&self, mode: CaptureMode, key: &str) -> PathBuf {
        self.mode_dir(mode).join(format!("{}.raw.txt", key))
    }

    fn cleaned_path(&self, mode: CaptureMode, key: &str) -> PathBuf {
        self.mode_dir(mode).join(format!("{}.clean.txt", key))
    }

    /// Cached snapshot for the pair, attributed to `step_index`
    pub fn get(
        &self,
        mode: CaptureMode,
        step_index: usize,
        url: &str,
        entry_action: &str,
    ) -> Result<Option<Snapshot>> {
        let key = cache_key(url, entry_action);
        let path = self.cleaned_path(mode, &key);
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        debug!("Snapshot cache hit for {} ({})", url, &key[..12]);
        Ok(Some(Snapshot {
            step_index,
            url: url.to_string(),
            entry_action: entry_action.to_string(),
            cache_key: key,
            content,
        }))
    }

    /// Persist both artifacts and return the cleaned snapshot
    pub fn put(
        &self,
        mode: CaptureMode,
        step_index: usize,
        url: &str,
        entry_action: &str,
        raw: &str,
        cleaned: &str,
    ) -> Result<Snapshot> {
        let key = cache_key(url, entry_action);
        let dir = self.mode_dir(mode);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;

        let raw_path = self.raw_path(mode, &key);
        std::fs::write(&raw_path, raw)
            .with_context(|| format!("Failed to write {}", raw_path.display()))?;
        // Written last: its presence marks a complete entry
        let cleaned_path = self.cleaned_path(mode, &key);
        std::fs::write(&cleaned_path, cleaned)
            .with_context(|| format!("Failed to write {}", cleaned_path.display()))?;

        Ok(Snapshot {
            step_index,
            url: url.to_string(),
            entry_action: entry_action.to_string(),
            cache_key: key,
            content: cleaned.to_string(),
        })
    }

    /// Remove every cached artifact of every mode
    pub fn clear(&self) -> Result<()> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)
                .with_context(|| format!("Failed to clear cache {}", self.root.display()))?;
        }
        Ok(())
    }
}

/// First snapshot per address within one capture batch
#[derive(Debug, Default)]
pub struct BatchDedup {
    by_url: HashMap<String, Snapshot>,
}

impl BatchDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// An earlier capture of `url`, re-attributed to `step_index`
    pub fn lookup(&self, url: &str, step_index: usize) -> Option<Snapshot> {
        self.by_url.get(url).map(|s| s.for_step(step_index))
    }

    pub fn remember(&mut self, snapshot: &Snapshot) {
        self.by_url
            .entry(snapshot.url.clone())
            .or_insert_with(|| snapshot.clone());
    }
}
