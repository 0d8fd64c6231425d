//! State store: the in-memory map of sealed run results plus best-effort
//! JSON snapshots under `out/arena-state/<run_id>.json`.
//!
//! Snapshots are written atomically (temp file + rename) so a crashed or
//! cancelled suite leaves only complete files behind; a later invocation
//! can restore them for review or resumption.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use pk_domain::result::RunResult;
use pk_domain::Result;

pub struct StateStore {
    inner: RwLock<HashMap<String, RunResult>>,
    /// Snapshot directory; `None` disables persistence.
    dir: Option<PathBuf>,
}

impl StateStore {
    /// In-memory only.
    pub fn ephemeral() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            dir: None,
        }
    }

    /// Snapshotting store rooted at `<out>/arena-state`.
    pub fn at(out_dir: &Path) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            dir: Some(out_dir.join("arena-state")),
        }
    }

    /// Load whatever snapshots exist on disk into a new store.
    pub fn restore(out_dir: &Path) -> Self {
        let store = Self::at(out_dir);
        let Some(dir) = &store.dir else {
            return store;
        };
        let Ok(entries) = std::fs::read_dir(dir) else {
            return store;
        };
        let mut restored = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match std::fs::read_to_string(&path)
                    .map_err(|e| e.to_string())
                    .and_then(|raw| serde_json::from_str::<RunResult>(&raw).map_err(|e| e.to_string()))
                {
                    Ok(result) => {
                        store.inner.write().insert(result.run_id.clone(), result);
                        restored += 1;
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable snapshot");
                    }
                }
            }
        }
        if restored > 0 {
            tracing::info!(restored, "restored run snapshots");
        }
        store
    }

    /// Record a sealed result and snapshot it. Snapshot failures are
    /// logged, never fatal.
    pub fn insert(&self, result: RunResult) {
        if let Some(dir) = &self.dir {
            if let Err(e) = snapshot(dir, &result) {
                tracing::warn!(run_id = %result.run_id, error = %e, "snapshot failed");
            }
        }
        self.inner.write().insert(result.run_id.clone(), result);
    }

    pub fn get(&self, run_id: &str) -> Option<RunResult> {
        self.inner.read().get(run_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// All results in run-id order (the deterministic matrix order).
    pub fn list(&self) -> Vec<RunResult> {
        let mut results: Vec<RunResult> = self.inner.read().values().cloned().collect();
        results.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        results
    }
}

fn snapshot(dir: &Path, result: &RunResult) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", result.run_id));
    let tmp = path.with_extension("json.tmp");
    let mut body = serde_json::to_string_pretty(result)?;
    body.push('\n');
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}
