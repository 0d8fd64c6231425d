//! Markdown report writer: `results.md`.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::PathBuf;

use pk_domain::duration::format_go;
use pk_domain::result::{RunResult, Summary};
use pk_domain::Result;

use crate::{write_atomic, ResultRepository};

/// Which sections the report includes.
#[derive(Debug, Clone, Copy)]
pub struct MarkdownSections {
    pub overview: bool,
    pub matrix: bool,
    pub conversation_assertions: bool,
    pub failed_tests: bool,
    pub cost: bool,
}

impl Default for MarkdownSections {
    fn default() -> Self {
        Self {
            overview: true,
            matrix: true,
            conversation_assertions: true,
            failed_tests: true,
            cost: true,
        }
    }
}

pub struct MarkdownRepository {
    out_dir: PathBuf,
    sections: MarkdownSections,
}

impl MarkdownRepository {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            sections: MarkdownSections::default(),
        }
    }

    pub fn with_sections(mut self, sections: MarkdownSections) -> Self {
        self.sections = sections;
        self
    }

    fn render(&self, results: &[RunResult]) -> String {
        let mut out = String::from("# Arena Results\n");

        if self.sections.overview {
            let passed = results.iter().filter(|r| r.passed()).count();
            let _ = write!(
                out,
                "\n## Overview\n\n- Runs: {}\n- Passed: {}\n- Failed: {}\n",
                results.len(),
                passed,
                results.len() - passed,
            );
        }

        if self.sections.matrix {
            out.push_str(&render_matrix(results));
        }

        if self.sections.conversation_assertions {
            out.push_str("\n## Conversation Assertions\n\n");
            let mut any = false;
            for result in results {
                if let Some(summary) = &result.conversation_assertions {
                    any = true;
                    let _ = writeln!(
                        out,
                        "- `{}`: {}/{} passed{}",
                        result.run_id,
                        summary.total - summary.failed,
                        summary.total,
                        if summary.passed { "" } else { " ❌" },
                    );
                }
            }
            if !any {
                out.push_str("_none configured_\n");
            }
        }

        if self.sections.failed_tests {
            out.push_str("\n## Failures\n\n");
            let mut any = false;
            for result in results.iter().filter(|r| !r.passed()) {
                any = true;
                let _ = writeln!(out, "### {}\n", result.run_id);
                if let Some(error) = &result.error {
                    let _ = writeln!(out, "- error: {error}");
                }
                for violation in &result.violations {
                    let _ = writeln!(
                        out,
                        "- turn {}: `{}` — {}",
                        violation
                            .turn_index
                            .map(|i| i.to_string())
                            .unwrap_or_else(|| "-".into()),
                        violation.assertion,
                        violation.message,
                    );
                }
            }
            if !any {
                out.push_str("_no failures_\n");
            }
        }

        if self.sections.cost {
            out.push_str("\n## Cost\n\n| Run | Input tokens | Output tokens | Total USD |\n|---|---|---|---|\n");
            for result in results {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | ${:.4} |",
                    result.run_id,
                    result.cost.input_tokens,
                    result.cost.output_tokens,
                    result.cost.total_cost_usd,
                );
            }
            let total: f64 = results.iter().map(|r| r.cost.total_cost_usd).sum();
            let _ = writeln!(out, "\nTotal: ${total:.4}");
        }

        out
    }
}

/// Scenario-by-provider pass/fail grid.
fn render_matrix(results: &[RunResult]) -> String {
    let scenarios: BTreeSet<&str> = results.iter().map(|r| r.scenario_id.as_str()).collect();
    let providers: BTreeSet<&str> = results.iter().map(|r| r.provider_id.as_str()).collect();

    let mut out = String::from("\n## Results Matrix\n\n| Scenario |");
    for provider in &providers {
        let _ = write!(out, " {provider} |");
    }
    out.push_str("\n|---|");
    for _ in &providers {
        out.push_str("---|");
    }
    out.push('\n');

    for scenario in &scenarios {
        let _ = write!(out, "| {scenario} |");
        for provider in &providers {
            let cells: Vec<&RunResult> = results
                .iter()
                .filter(|r| r.scenario_id == *scenario && r.provider_id == *provider)
                .collect();
            let mark = if cells.is_empty() {
                "—"
            } else if cells.iter().all(|r| r.passed()) {
                "✅"
            } else {
                "❌"
            };
            let _ = write!(out, " {mark} |");
        }
        out.push('\n');
    }
    out
}

impl ResultRepository for MarkdownRepository {
    fn name(&self) -> &str {
        "markdown"
    }

    fn save_results(&self, results: &[RunResult]) -> Result<()> {
        write_atomic(&self.out_dir.join("results.md"), &self.render(results))
    }

    fn save_summary(&self, summary: &Summary) -> Result<()> {
        let body = format!(
            "# Arena Summary\n\n- Runs: {}\n- Passed: {}\n- Failed: {}\n- Duration: {}\n- Cost: ${:.4}\n",
            summary.total_runs,
            summary.passed_runs,
            summary.failed_runs,
            format_go(summary.duration),
            summary.total_cost_usd,
        );
        write_atomic(&self.out_dir.join("summary.md"), &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pk_domain::validation::ValidationError;
    use std::time::Duration;

    fn results() -> Vec<RunResult> {
        let mut passing = RunResult::new("run-0001", "greet", "mock", None);
        passing.duration = Duration::from_secs(1);

        let mut failing = RunResult::new("run-0002", "order", "mock", None);
        failing.violations.push(ValidationError {
            turn_index: Some(0),
            assertion: "content_includes".into(),
            message: "pattern missing".into(),
        });
        vec![passing, failing]
    }

    #[test]
    fn renders_all_sections() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MarkdownRepository::new(dir.path());
        repo.save_results(&results()).unwrap();
        let body = std::fs::read_to_string(dir.path().join("results.md")).unwrap();
        assert!(body.contains("## Overview"));
        assert!(body.contains("## Results Matrix"));
        assert!(body.contains("## Failures"));
        assert!(body.contains("## Cost"));
        assert!(body.contains("content_includes"));
        assert!(body.contains("✅"));
        assert!(body.contains("❌"));
    }

    #[test]
    fn sections_are_configurable() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MarkdownRepository::new(dir.path()).with_sections(MarkdownSections {
            overview: true,
            matrix: false,
            conversation_assertions: false,
            failed_tests: false,
            cost: false,
        });
        repo.save_results(&results()).unwrap();
        let body = std::fs::read_to_string(dir.path().join("results.md")).unwrap();
        assert!(body.contains("## Overview"));
        assert!(!body.contains("## Results Matrix"));
        assert!(!body.contains("## Cost"));
    }

    #[test]
    fn deterministic_output() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MarkdownRepository::new(dir.path());
        let input = results();
        repo.save_results(&input).unwrap();
        let first = std::fs::read(dir.path().join("results.md")).unwrap();
        repo.save_results(&input).unwrap();
        let second = std::fs::read(dir.path().join("results.md")).unwrap();
        assert_eq!(first, second);
    }
}
