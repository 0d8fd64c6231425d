//! Result repositories: pluggable writers for run results.
//!
//! Every writer is a pure function of its input — byte-identical input
//! produces byte-identical output, which the golden tests rely on. Writers
//! are invoked serially from the scheduler's completion handler, so
//! implementations may assume single-writer semantics.

pub mod composite;
pub mod html;
pub mod json;
pub mod junit;
pub mod markdown;
pub mod reader;

pub use composite::CompositeResultRepository;
pub use html::HtmlRepository;
pub use json::JsonRepository;
pub use junit::JunitRepository;
pub use markdown::{MarkdownRepository, MarkdownSections};
pub use reader::ResultReader;

use std::path::Path;

use pk_domain::result::{RunResult, Summary};
use pk_domain::{Error, Result};

/// A sink (and optionally source) for run results.
pub trait ResultRepository: Send + Sync {
    fn name(&self) -> &str;

    fn save_results(&self, results: &[RunResult]) -> Result<()>;

    fn save_summary(&self, summary: &Summary) -> Result<()>;

    /// Writers that can append results as runs complete opt in here.
    fn supports_streaming(&self) -> bool {
        false
    }

    fn save_result(&self, _result: &RunResult) -> Result<()> {
        Err(Error::Internal(format!(
            "{}: incremental writes not supported",
            self.name()
        )))
    }

    /// Readers opt in here; the composite tries children in order and
    /// returns the first supported load.
    fn supports_load(&self) -> bool {
        false
    }

    fn load_results(&self) -> Result<Vec<RunResult>> {
        Err(Error::Internal(format!(
            "{}: load not supported",
            self.name()
        )))
    }
}

/// Write a file atomically: temp file in the same directory, then rename.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_creates_parents_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.txt");
        write_atomic(&path, "first").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first");
        write_atomic(&path, "second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
    }
}
