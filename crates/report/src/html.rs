//! Self-contained HTML report writer: `report.html`.

use std::fmt::Write as _;
use std::path::PathBuf;

use pk_domain::duration::format_go;
use pk_domain::result::{RunResult, Summary};
use pk_domain::Result;

use crate::{write_atomic, ResultRepository};

const STYLE: &str = "body{font-family:system-ui,sans-serif;margin:2rem;color:#222}\
table{border-collapse:collapse;width:100%;margin:1rem 0}\
th,td{border:1px solid #ddd;padding:.4rem .6rem;text-align:left}\
th{background:#f5f5f5}\
.pass{color:#1a7f37}.fail{color:#cf222e}\
details{margin:.5rem 0}pre{background:#f6f8fa;padding:.6rem;overflow-x:auto}";

pub struct HtmlRepository {
    out_dir: PathBuf,
}

impl HtmlRepository {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }
}

fn html_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn render(results: &[RunResult]) -> String {
    let passed = results.iter().filter(|r| r.passed()).count();

    let mut out = String::new();
    let _ = write!(
        out,
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Arena Report</title>\n<style>{STYLE}</style>\n</head>\n<body>\n<h1>Arena Report</h1>\n<p>{} runs, <span class=\"pass\">{passed} passed</span>, <span class=\"fail\">{} failed</span></p>\n",
        results.len(),
        results.len() - passed,
    );

    out.push_str("<table>\n<tr><th>Run</th><th>Scenario</th><th>Provider</th><th>Region</th><th>Duration</th><th>Cost</th><th>Status</th></tr>\n");
    for result in results {
        let status = if result.passed() {
            "<span class=\"pass\">passed</span>"
        } else {
            "<span class=\"fail\">failed</span>"
        };
        let _ = writeln!(
            out,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>${:.4}</td><td>{status}</td></tr>",
            html_escape(&result.run_id),
            html_escape(&result.scenario_id),
            html_escape(&result.provider_id),
            html_escape(result.region.as_deref().unwrap_or("—")),
            format_go(result.duration),
            result.cost.total_cost_usd,
        );
    }
    out.push_str("</table>\n");

    for result in results {
        let _ = writeln!(
            out,
            "<details>\n<summary>{}</summary>",
            html_escape(&result.run_id)
        );
        if let Some(error) = &result.error {
            let _ = writeln!(
                out,
                "<p class=\"fail\">error: {}</p>",
                html_escape(error)
            );
        }
        for message in &result.messages {
            let role = match message.role {
                pk_domain::message::Role::System => "system",
                pk_domain::message::Role::User => "user",
                pk_domain::message::Role::Assistant => "assistant",
                pk_domain::message::Role::Tool => "tool",
            };
            let _ = writeln!(
                out,
                "<pre><b>{role}</b>: {}</pre>",
                html_escape(&message.get_content())
            );
        }
        out.push_str("</details>\n");
    }

    out.push_str("</body>\n</html>\n");
    out
}

impl ResultRepository for HtmlRepository {
    fn name(&self) -> &str {
        "html"
    }

    fn save_results(&self, results: &[RunResult]) -> Result<()> {
        write_atomic(&self.out_dir.join("report.html"), &render(results))
    }

    fn save_summary(&self, _summary: &Summary) -> Result<()> {
        // The report header already shows the aggregate.
        Ok(())
    }
}
