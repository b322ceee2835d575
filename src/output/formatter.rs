//! Console reporter
//!
//! Prints live progress and result lines to stderr and renders the final
//! report as a table, JSON, CSV or a one-line summary.

use anyhow::Result;
use std::str::FromStr;
use std::time::Duration;

use super::{CaseRecord, CheckRecord, Reporter, RunSummary};
use crate::models::{Outcome, TestCase};
use crate::runnable::Runnable;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Ok(OutputFormat::JsonPretty),
            "csv" => Ok(OutputFormat::Csv),
            "summary" => Ok(OutputFormat::Summary),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// Reporter writing to the terminal
pub struct ConsoleReporter {
    format: OutputFormat,
    colorize: bool,
    live: bool,
}

impl ConsoleReporter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
            live: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Suppress per-test lines, keep only the final report
    pub fn quiet(mut self) -> Self {
        self.live = false;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    fn paint(&self, outcome: Outcome, text: &str) -> String {
        if !self.colorize {
            return text.to_string();
        }
        let code = match outcome {
            Outcome::Ok => "32",
            Outcome::Skip => "33",
            Outcome::Diff | Outcome::Fatal => "31",
            Outcome::Timeout => "35",
        };
        format!("\x1b[{code}m{text}\x1b[0m")
    }

    pub fn format_progress_line<R>(&self, case: &TestCase<R>) -> String {
        format!(
            "[RUNNING] {} ({:.1}s)",
            case.full_name(),
            case.elapsed().as_secs_f64()
        )
    }

    pub fn format_result_line<R>(&self, case: &TestCase<R>) -> String {
        match CaseRecord::from_case(case) {
            Some(record) => self.format_record(&record),
            None => format!("[{}] {}", case.progress(), case.full_name()),
        }
    }

    fn format_record(&self, record: &CaseRecord) -> String {
        let status = self.paint(
            record.outcome,
            &format!("{} {:7}", record.outcome.symbol(), record.outcome.name()),
        );
        let mut line = format!(
            "{} {}/{} [{:>6}ms]",
            status, record.group, record.name, record.duration_ms
        );
        if let Some(msg) = &record.message {
            line.push_str(&format!(" - {msg}"));
        }
        line
    }

    /// One line per check; failing checks are followed by their captured output
    pub fn format_checks(&self, record: &CaseRecord) -> Vec<String> {
        let mut lines = Vec::new();
        for check in &record.checks {
            lines.push(self.format_check(check));
            if check.outcome == Outcome::Ok {
                continue;
            }
            for (label, text) in [("stdout", &check.stdout), ("stderr", &check.stderr)] {
                if text.trim().is_empty() {
                    continue;
                }
                lines.push(format!("      {label}:"));
                lines.extend(text.trim_end().lines().map(|l| format!("        {l}")));
            }
        }
        lines
    }

    fn format_check(&self, check: &CheckRecord) -> String {
        let status = self.paint(
            check.outcome,
            &format!("{} {:7}", check.outcome.symbol(), check.outcome.name()),
        );
        format!("    {} {} (exit {})", status, check.name, check.exit_code)
    }

    /// Render a completed run in the configured format
    pub fn render(&self, summary: &RunSummary) -> Result<String> {
        Ok(match self.format {
            OutputFormat::Table => self.format_table(summary),
            OutputFormat::Json => serde_json::to_string(summary)?,
            OutputFormat::JsonPretty => serde_json::to_string_pretty(summary)?,
            OutputFormat::Csv => format_csv(summary)?,
            OutputFormat::Summary => self.format_brief(summary),
        })
    }

    fn format_table(&self, summary: &RunSummary) -> String {
        let mut output = String::new();

        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!("║  {:<60}║\n", "Test Run Results"));
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        for record in &summary.cases {
            output.push_str(&format!("║  {}\n", self.format_record(record)));
        }

        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        let ok_str = self.paint(Outcome::Ok, &summary.ok.to_string());
        let failed = summary.diff + summary.timeout + summary.fatal;
        let fail_str = if failed > 0 {
            self.paint(Outcome::Fatal, &failed.to_string())
        } else {
            failed.to_string()
        };

        output.push_str(&format!(
            "║  Total: {:3} | OK: {} | Failed: {} | Skip: {:3}\n",
            summary.total, ok_str, fail_str, summary.skipped
        ));
        output.push_str(&format!(
            "║  Diff: {:3} | Timeout: {:3} | Fatal: {:3}\n",
            summary.diff, summary.timeout, summary.fatal
        ));
        output.push_str(&format!(
            "║  Pass Rate: {:5.1}% | Duration: {:.2}s\n",
            summary.pass_rate(),
            summary.duration_ms as f64 / 1000.0
        ));
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");

        output
    }

    fn format_brief(&self, summary: &RunSummary) -> String {
        format!(
            "{}/{} ok, {} skipped, {} diff, {} timeout, {} fatal in {:.2}s",
            summary.ok,
            summary.total,
            summary.skipped,
            summary.diff,
            summary.timeout,
            summary.fatal,
            summary.duration_ms as f64 / 1000.0
        )
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

fn format_csv(summary: &RunSummary) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "id",
        "group",
        "name",
        "outcome",
        "duration_ms",
        "message",
    ])?;
    for record in &summary.cases {
        writer.write_record([
            record.id.to_string(),
            record.group.clone(),
            record.name.clone(),
            record.outcome.to_string(),
            record.duration_ms.to_string(),
            record.message.clone().unwrap_or_default(),
        ])?;
    }
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

impl Reporter for ConsoleReporter {
    type Report = String;

    fn report_progress<R: Runnable>(&mut self, case: &TestCase<R>) {
        if self.live {
            eprintln!("{}", self.format_progress_line(case));
        }
    }

    fn report_result<R: Runnable>(&mut self, case: &TestCase<R>) {
        if !self.live {
            return;
        }
        eprintln!("{}", self.format_result_line(case));
        if let Some(record) = CaseRecord::from_case(case) {
            for line in self.format_checks(&record) {
                eprintln!("{line}");
            }
        }
    }

    fn format_complete<R: Runnable>(
        &mut self,
        cases: &[TestCase<R>],
        duration: Duration,
    ) -> Self::Report {
        let summary = RunSummary::from_cases(cases, duration);
        match self.render(&summary) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Failed to render {:?} report: {e}", self.format);
                self.format_table(&summary)
            }
        }
    }
}
