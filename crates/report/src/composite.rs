//! Composite repository: fan out every call, aggregate the failures.

use pk_domain::result::{RunResult, Summary};
use pk_domain::{Error, Result};

use crate::ResultRepository;

/// Wraps a list of repositories. A failing child never aborts the others;
/// the returned error names each failed child so the caller can report
/// exactly which sinks missed the data.
pub struct CompositeResultRepository {
    children: Vec<Box<dyn ResultRepository>>,
}

impl CompositeResultRepository {
    pub fn new(children: Vec<Box<dyn ResultRepository>>) -> Self {
        Self { children }
    }

    fn aggregate(failures: Vec<(String, Error)>) -> Result<()> {
        if failures.is_empty() {
            return Ok(());
        }
        let parts: Vec<String> = failures
            .iter()
            .map(|(name, error)| format!("{name}: {error}"))
            .collect();
        Err(Error::Internal(format!(
            "{} repository write(s) failed: {}",
            failures.len(),
            parts.join("; ")
        )))
    }
}

impl ResultRepository for CompositeResultRepository {
    fn name(&self) -> &str {
        "composite"
    }

    fn save_results(&self, results: &[RunResult]) -> Result<()> {
        let mut failures = Vec::new();
        for child in &self.children {
            if let Err(e) = child.save_results(results) {
                tracing::warn!(repository = child.name(), error = %e, "repository write failed");
                failures.push((child.name().to_string(), e));
            }
        }
        Self::aggregate(failures)
    }

    fn save_summary(&self, summary: &Summary) -> Result<()> {
        let mut failures = Vec::new();
        for child in &self.children {
            if let Err(e) = child.save_summary(summary) {
                failures.push((child.name().to_string(), e));
            }
        }
        Self::aggregate(failures)
    }

    fn supports_streaming(&self) -> bool {
        self.children.iter().any(|c| c.supports_streaming())
    }

    fn save_result(&self, result: &RunResult) -> Result<()> {
        let mut failures = Vec::new();
        for child in self.children.iter().filter(|c| c.supports_streaming()) {
            if let Err(e) = child.save_result(result) {
                failures.push((child.name().to_string(), e));
            }
        }
        Self::aggregate(failures)
    }

    fn supports_load(&self) -> bool {
        self.children.iter().any(|c| c.supports_load())
    }

    fn load_results(&self) -> Result<Vec<RunResult>> {
        for child in self.children.iter().filter(|c| c.supports_load()) {
            match child.load_results() {
                Ok(results) => return Ok(results),
                Err(e) => {
                    tracing::debug!(repository = child.name(), error = %e, "load failed, trying next");
                }
            }
        }
        Err(Error::Internal("no repository could load results".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Records calls; optionally fails every write.
    struct Probe {
        name: String,
        fail: bool,
        saves: Arc<AtomicUsize>,
    }

    impl Probe {
        fn new(name: &str, fail: bool) -> (Box<dyn ResultRepository>, Arc<AtomicUsize>) {
            let saves = Arc::new(AtomicUsize::new(0));
            (
                Box::new(Self {
                    name: name.into(),
                    fail,
                    saves: saves.clone(),
                }),
                saves,
            )
        }
    }

    impl ResultRepository for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        fn save_results(&self, _results: &[RunResult]) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::Internal("disk full".into()))
            } else {
                Ok(())
            }
        }

        fn save_summary(&self, _summary: &Summary) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failures_name_exactly_the_failed_children() {
        let (ok_a, saves_a) = Probe::new("alpha", false);
        let (bad, _) = Probe::new("beta", true);
        let (ok_c, saves_c) = Probe::new("gamma", false);
        let composite = CompositeResultRepository::new(vec![ok_a, bad, ok_c]);

        let err = composite
            .save_results(&[RunResult::new("run-0001", "s", "p", None)])
            .unwrap_err()
            .to_string();

        assert!(err.contains("beta"));
        assert!(!err.contains("alpha"));
        assert!(!err.contains("gamma"));
        // Healthy children still received the full input.
        assert_eq!(saves_a.load(Ordering::SeqCst), 1);
        assert_eq!(saves_c.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn all_ok_is_ok() {
        let (a, _) = Probe::new("alpha", false);
        let (b, _) = Probe::new("beta", false);
        let composite = CompositeResultRepository::new(vec![a, b]);
        assert!(composite
            .save_results(&[RunResult::new("run-0001", "s", "p", None)])
            .is_ok());
    }

    #[test]
    fn load_falls_through_to_first_supporting_child() {
        let dir = tempfile::tempdir().unwrap();
        let json = crate::JsonRepository::new(dir.path());
        json.save_results(&[RunResult::new("run-0001", "s", "p", None)])
            .unwrap();

        let (markdownish, _) = Probe::new("no-load", false);
        let composite = CompositeResultRepository::new(vec![
            markdownish,
            Box::new(crate::JsonRepository::new(dir.path())),
        ]);
        let loaded = composite.load_results().unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn load_with_no_readers_errors() {
        let (a, _) = Probe::new("alpha", false);
        let composite = CompositeResultRepository::new(vec![a]);
        assert!(composite.load_results().is_err());
    }
}
