//! JUnit XML writer: `junit.xml`, one `<testcase>` per run.

use std::fmt::Write as _;
use std::path::PathBuf;

use pk_domain::result::{RunResult, Summary};
use pk_domain::Result;

use crate::{write_atomic, ResultRepository};

pub struct JunitRepository {
    out_dir: PathBuf,
}

impl JunitRepository {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// First violation message, or the run error, for the `<failure>` element.
fn failure_message(result: &RunResult) -> Option<String> {
    if let Some(violation) = result.violations.first() {
        return Some(format!("{}: {}", violation.assertion, violation.message));
    }
    if let Some(summary) = &result.conversation_assertions {
        if !summary.passed {
            if let Some(failed) = summary.results.iter().find(|r| !r.passed) {
                return Some(format!("{}: {}", failed.kind, failed.message));
            }
        }
    }
    result.error.clone()
}

fn render(results: &[RunResult]) -> String {
    let failures = results.iter().filter(|r| !r.passed()).count();
    let total_secs: f64 = results.iter().map(|r| r.duration.as_secs_f64()).sum();

    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        out,
        "<testsuite name=\"arena\" tests=\"{}\" failures=\"{}\" time=\"{:.3}\">",
        results.len(),
        failures,
        total_secs,
    );

    for result in results {
        let name = match &result.region {
            Some(region) => format!("{}/{}/{}", result.scenario_id, result.provider_id, region),
            None => format!("{}/{}", result.scenario_id, result.provider_id),
        };
        let _ = write!(
            out,
            "  <testcase name=\"{}\" classname=\"{}\" time=\"{:.3}\"",
            xml_escape(&name),
            xml_escape(&result.provider_id),
            result.duration.as_secs_f64(),
        );
        match failure_message(result) {
            Some(message) if !result.passed() => {
                let _ = writeln!(out, ">");
                let _ = writeln!(
                    out,
                    "    <failure message=\"{}\"/>",
                    xml_escape(&message)
                );
                let _ = writeln!(out, "  </testcase>");
            }
            _ => {
                let _ = writeln!(out, "/>");
            }
        }
    }

    out.push_str("</testsuite>\n");
    out
}

impl ResultRepository for JunitRepository {
    fn name(&self) -> &str {
        "junit"
    }

    fn save_results(&self, results: &[RunResult]) -> Result<()> {
        write_atomic(&self.out_dir.join("junit.xml"), &render(results))
    }

    fn save_summary(&self, _summary: &Summary) -> Result<()> {
        // The testsuite element already carries the aggregate counts.
        Ok(())
    }
}
