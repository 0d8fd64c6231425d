//! JSON writer/reader: `results.json` + `summary.json`.

use std::path::PathBuf;
use std::sync::Mutex;

use pk_domain::result::{RunResult, Summary};
use pk_domain::{Error, Result};

use crate::{write_atomic, ResultRepository};

pub struct JsonRepository {
    out_dir: PathBuf,
    /// Results received incrementally via `save_result`, rewritten to disk
    /// on every append.
    streamed: Mutex<Vec<RunResult>>,
}

impl JsonRepository {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            streamed: Mutex::new(Vec::new()),
        }
    }

    fn results_path(&self) -> PathBuf {
        self.out_dir.join("results.json")
    }

    fn write_results(&self, results: &[RunResult]) -> Result<()> {
        let mut body = serde_json::to_string_pretty(results)?;
        body.push('\n');
        write_atomic(&self.results_path(), &body)
    }
}

impl ResultRepository for JsonRepository {
    fn name(&self) -> &str {
        "json"
    }

    fn save_results(&self, results: &[RunResult]) -> Result<()> {
        self.write_results(results)
    }

    fn save_summary(&self, summary: &Summary) -> Result<()> {
        let mut body = serde_json::to_string_pretty(summary)?;
        body.push('\n');
        write_atomic(&self.out_dir.join("summary.json"), &body)
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn save_result(&self, result: &RunResult) -> Result<()> {
        let mut streamed = self.streamed.lock().unwrap_or_else(|p| p.into_inner());
        streamed.push(result.clone());
        self.write_results(&streamed)
    }

    fn supports_load(&self) -> bool {
        true
    }

    fn load_results(&self) -> Result<Vec<RunResult>> {
        let path = self.results_path();
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            Error::Internal(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}
