//! On-disk cache of derived companion metadata. Never holds live process state.
use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{error::HarnessError, resolver::Companion};

/// Entries not written for this long are removed on the next write.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Companion metadata keyed by a hash of everything it was derived from.
#[derive(Debug, Clone)]
pub struct CompanionCache {
    dir: PathBuf,
    max_age: Duration,
}

impl CompanionCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_age: DEFAULT_MAX_AGE,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Cache under the system scratch directory.
    pub fn in_scratch_dir() -> Self {
        Self::new(std::env::temp_dir().join("cyfire").join("companions"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// SHA-256 over the requesting project, the companion root and the raw bytes of its
    /// `firebase.json`, so a hit skips parsing the document.
    pub fn key(&self, project: &str, companion_root: &Path, config: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(project.as_bytes());
        hasher.update([0]);
        hasher.update(companion_root.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(config);
        format!("{:x}", hasher.finalize())
    }

    fn entry(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Cached companion for `key`. Unreadable entries are discarded.
    pub fn get(&self, key: &str) -> Option<Companion> {
        let path = self.entry(key);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(companion) => Some(companion),
            Err(err) => {
                warn!("Discarding corrupt cache entry {}: {err}", path.display());
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    pub fn put(&self, key: &str, companion: &Companion) -> Result<(), HarnessError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.entry(key);
        fs::write(&path, serde_json::to_vec_pretty(companion)?)?;
        debug!("Cached companion metadata at {}", path.display());
        self.prune();
        Ok(())
    }

    /// Removes entries older than the maximum age. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let stale = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > self.max_age);
            if stale && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Pruned {removed} stale cache entries from {}", self.dir.display());
        }
        removed
    }
}
