//! Reader side: browse previously written results by id or metadata.

use pk_domain::result::RunResult;
use pk_domain::Result;

use crate::ResultRepository;

/// Loads prior results from any repository that supports reading and
/// answers simple inspection queries.
pub struct ResultReader<'a> {
    repository: &'a dyn ResultRepository,
}

impl<'a> ResultReader<'a> {
    pub fn new(repository: &'a dyn ResultRepository) -> Self {
        Self { repository }
    }

    pub fn all(&self) -> Result<Vec<RunResult>> {
        self.repository.load_results()
    }

    pub fn by_id(&self, run_id: &str) -> Result<Option<RunResult>> {
        Ok(self
            .all()?
            .into_iter()
            .find(|r| r.run_id == run_id))
    }

    pub fn by_scenario(&self, scenario_id: &str) -> Result<Vec<RunResult>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|r| r.scenario_id == scenario_id)
            .collect())
    }

    pub fn failed(&self) -> Result<Vec<RunResult>> {
        Ok(self.all()?.into_iter().filter(|r| !r.passed()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JsonRepository;

    fn seed(dir: &std::path::Path) -> JsonRepository {
        let repo = JsonRepository::new(dir);
        let ok = RunResult::new("run-0001-greet-mock", "greet", "mock", None);
        let mut bad = RunResult::new("run-0002-order-mock", "order", "mock", None);
        bad.error = Some("boom".into());
        repo.save_results(&[ok, bad]).unwrap();
        repo
    }

    #[test]
    fn finds_by_id_and_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let repo = seed(dir.path());
        let reader = ResultReader::new(&repo);

        assert!(reader.by_id("run-0001-greet-mock").unwrap().is_some());
        assert!(reader.by_id("run-9999").unwrap().is_none());
        assert_eq!(reader.by_scenario("order").unwrap().len(), 1);
    }

    #[test]
    fn failed_filter() {
        let dir = tempfile::tempdir().unwrap();
        let repo = seed(dir.path());
        let reader = ResultReader::new(&repo);
        let failed = reader.failed().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].scenario_id, "order");
    }
}
