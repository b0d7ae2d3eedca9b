//! Output sinks for target reports.
//!
//! Reports are rendered as text blocks, one-line table rows, or JSON Lines,
//! and written to any [`io::Write`] ([`WriterSink`]) or to files laid out
//! by [`FileSink`].

use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::{debug, info};

use crate::runner::{TargetOutcome, TargetReport};

/// Timestamp format used in file names and the `{date_time}` placeholder.
pub const FILE_DATE_FORMAT: &str = "%Y-%m-%d_%Hh%Mm%S";

/// Timestamp format used in text report headers.
pub const REPORT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Receives reports as targets finish.
pub trait OutputSink {
    /// Write one report.
    fn write_report(&mut self, report: &TargetReport) -> io::Result<()>;

    /// Flush anything buffered. Called once after the last report.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn write_report(&mut self, report: &TargetReport) -> io::Result<()> {
        (**self).write_report(report)
    }

    fn finish(&mut self) -> io::Result<()> {
        (**self).finish()
    }
}

/// How reports are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// A header line and the output block for every command.
    #[default]
    Text,

    /// One tab-separated line per command, newlines removed.
    Table,

    /// One JSON object per target.
    Json,
}

/// Render `report` in `format`.
pub fn format_report(report: &TargetReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => format_text(report),
        OutputFormat::Table => format_table(report),
        OutputFormat::Json => format_json(report),
    }
}

fn format_text(report: &TargetReport) -> String {
    let mut out = String::new();
    let when = report.started_at.format(REPORT_DATE_FORMAT);
    let host = report.hostname.as_deref().unwrap_or("?");

    if let TargetOutcome::Degraded { warning, .. } = &report.outcome {
        let _ = writeln!(out, "[!] {}: {}", report.target, warning);
    }

    if let Some(output) = report.outcome.output() {
        if let Some(banner) = output.banner() {
            let _ = write!(
                out,
                "\n[{}] {} ({}): Banner\n{}\n\n",
                when,
                report.target,
                host,
                normalize_newlines(banner)
            );
        }
        for response in output.responses() {
            let _ = write!(
                out,
                "\n[{}] {} ({}): Output of command '{}'\n{}\n\n",
                when,
                report.target,
                host,
                response.command,
                normalize_newlines(&response.result)
            );
        }
    }

    if let Some(problem) = problem_line(&report.outcome) {
        let _ = writeln!(out, "[!] {}: {}", report.target, problem);
    }
    out
}

fn format_table(report: &TargetReport) -> String {
    let mut out = String::new();
    let host = report.hostname.as_deref().unwrap_or("");

    if let Some(output) = report.outcome.output() {
        if let Some(banner) = output.banner() {
            let _ = writeln!(
                out,
                "{}\t{}\t[banner] {}",
                report.target,
                host,
                flatten(banner)
            );
        }
        for response in output.responses() {
            let _ = writeln!(
                out,
                "{}\t{}\t{}",
                report.target,
                host,
                flatten(&response.result)
            );
        }
    }

    if let Some(problem) = problem_line(&report.outcome) {
        let _ = writeln!(out, "{}\t{}\t[!] {}", report.target, host, problem);
    }
    out
}

fn format_json(report: &TargetReport) -> String {
    match serde_json::to_string(report) {
        Ok(mut line) => {
            line.push('\n');
            line
        }
        Err(e) => json_error_line(report, &e.to_string()),
    }
}

fn json_error_line(report: &TargetReport, error: &str) -> String {
    let line = serde_json::json!({
        "target": report.target.address(),
        "error": error,
    });
    format!("{line}\n")
}

/// Why a target did not finish normally, for one-line display.
fn problem_line(outcome: &TargetOutcome) -> Option<String> {
    match outcome {
        TargetOutcome::Success { .. } | TargetOutcome::Degraded { .. } => None,
        TargetOutcome::Unreachable { message } => Some(format!("unreachable: {message}")),
        TargetOutcome::AllCredentialsExhausted { attempted } => Some(format!(
            "all credentials rejected (tried {})",
            attempted.join(", ")
        )),
        TargetOutcome::PromptTimeout { message, .. }
        | TargetOutcome::TimedOut { message, .. }
        | TargetOutcome::Disconnected { message, .. } => {
            Some(format!("{}: {}", outcome.status(), message))
        }
        TargetOutcome::Cancelled { .. } => Some("cancelled".to_string()),
        TargetOutcome::Skipped { reason } => Some(format!("skipped: {reason}")),
    }
}

fn flatten(text: &str) -> String {
    text.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

fn normalize_newlines(text: &str) -> String {
    text.lines().collect::<Vec<_>>().join("\n")
}

/// Writes reports to any writer (stdout, a buffer, an open file).
pub struct WriterSink<W: Write> {
    writer: W,
    format: OutputFormat,
}

impl<W: Write> WriterSink<W> {
    /// Create a sink rendering in `format`.
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self { writer, format }
    }

    /// Get the writer back.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl WriterSink<io::Stdout> {
    /// Sink that prints to standard output.
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(io::stdout(), format)
    }
}

impl<W: Write> OutputSink for WriterSink<W> {
    fn write_report(&mut self, report: &TargetReport) -> io::Result<()> {
        self.writer
            .write_all(format_report(report, self.format).as_bytes())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Path template with `{date_time}`, `{ip_address}`, `{hostname}` and
/// `{username}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTemplate(String);

impl OutputTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    /// Substitute the placeholders. Unknown values expand to `unknown`.
    pub fn expand(&self, date_time: &str, report: &TargetReport) -> String {
        self.0
            .replace("{date_time}", date_time)
            .replace("{ip_address}", report.target.address())
            .replace("{hostname}", report.hostname.as_deref().unwrap_or("unknown"))
            .replace("{username}", report.username.as_deref().unwrap_or("unknown"))
    }
}

/// How file output is split.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileLayout {
    /// Every report appended to `ferritel_output_{date_time}.txt`.
    #[default]
    Combined,

    /// One `ferritel_output_{hostname}_{ip}_{date_time}.txt` per device.
    PerDevice,
}

/// Appends reports to files under a (templated) directory.
pub struct FileSink {
    directory: OutputTemplate,
    layout: FileLayout,
    format: OutputFormat,
    date_time: String,
    written: Vec<PathBuf>,
}

impl FileSink {
    /// Create a sink; `directory` may contain placeholders.
    pub fn new(directory: OutputTemplate, layout: FileLayout, format: OutputFormat) -> Self {
        Self::with_timestamp(directory, layout, format, Local::now())
    }

    /// Create a sink stamping file names with `now`.
    pub fn with_timestamp(
        directory: OutputTemplate,
        layout: FileLayout,
        format: OutputFormat,
        now: DateTime<Local>,
    ) -> Self {
        Self {
            directory,
            layout,
            format,
            date_time: now.format(FILE_DATE_FORMAT).to_string(),
            written: Vec::new(),
        }
    }

    /// File a report goes to.
    pub fn path_for(&self, report: &TargetReport) -> PathBuf {
        let directory = PathBuf::from(self.directory.expand(&self.date_time, report));
        let name = match self.layout {
            FileLayout::Combined => format!("ferritel_output_{}.txt", self.date_time),
            FileLayout::PerDevice => format!(
                "ferritel_output_{}_{}_{}.txt",
                report.hostname.as_deref().unwrap_or("unknown"),
                report.target.address(),
                self.date_time
            ),
        };
        directory.join(name)
    }

    /// Files written so far, in first-write order.
    pub fn files(&self) -> &[PathBuf] {
        &self.written
    }

    fn append(&mut self, path: &Path, text: &str) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(text.as_bytes())?;

        if !self.written.iter().any(|p| p == path) {
            info!("saving output to {}", path.display());
            self.written.push(path.to_path_buf());
        }
        Ok(())
    }
}

impl OutputSink for FileSink {
    fn write_report(&mut self, report: &TargetReport) -> io::Result<()> {
        let path = self.path_for(report);
        debug!("{}: writing report to {}", report.target, path.display());
        let text = format_report(report, self.format);
        self.append(&path, &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Target;
    use crate::session::{CapturedOutput, Response};
    use chrono::TimeZone;
    use std::time::Duration;

    fn report(outcome: TargetOutcome) -> TargetReport {
        TargetReport {
            target: Target::new("10.0.0.1"),
            hostname: Some("core1".to_string()),
            username: Some("admin".to_string()),
            started_at: Local.with_ymd_and_hms(2024, 3, 1, 9, 30, 5).unwrap(),
            outcome,
        }
    }

    fn success() -> TargetReport {
        let mut output = CapturedOutput::new();
        output.insert(
            0,
            Response::new(
                "show clock",
                "12:00:00 UTC\r\nMon Mar 1\r\n",
                "",
                "core1#",
                Duration::ZERO,
            ),
        );
        report(TargetOutcome::Success { output })
    }

    #[test]
    fn test_text_format() {
        let text = format_report(&success(), OutputFormat::Text);
        assert_eq!(
            text,
            "\n[2024-03-01 09:30:05] 10.0.0.1 (core1): Output of command 'show clock'\n12:00:00 UTC\nMon Mar 1\n\n"
        );
    }

    #[test]
    fn test_table_format() {
        let text = format_report(&success(), OutputFormat::Table);
        assert_eq!(text, "10.0.0.1\tcore1\t12:00:00 UTCMon Mar 1\n");
    }

    #[test]
    fn test_banner_is_printed() {
        let mut output = CapturedOutput::new();
        output.set_banner("Authorized access only\r\n\r\nUser Access Verification");
        output.insert(
            0,
            Response::new("show clock", "12:00\r\n", "", "core1#", Duration::ZERO),
        );
        let report = report(TargetOutcome::Success { output });

        let text = format_report(&report, OutputFormat::Text);
        assert!(text.starts_with(
            "\n[2024-03-01 09:30:05] 10.0.0.1 (core1): Banner\nAuthorized access only\n\nUser Access Verification\n\n"
        ));
        assert!(text.ends_with("Output of command 'show clock'\n12:00\n\n"));

        let table = format_report(&report, OutputFormat::Table);
        assert_eq!(
            table,
            "10.0.0.1\tcore1\t[banner] Authorized access onlyUser Access Verification\n10.0.0.1\tcore1\t12:00\n"
        );
    }

    #[test]
    fn test_failure_lines() {
        let text = format_report(
            &report(TargetOutcome::AllCredentialsExhausted {
                attempted: vec!["dave".to_string(), "bill".to_string()],
            }),
            OutputFormat::Text,
        );
        assert_eq!(
            text,
            "[!] 10.0.0.1: all credentials rejected (tried dave, bill)\n"
        );
    }

    #[test]
    fn test_json_lines() {
        let line = format_report(&success(), OutputFormat::Json);
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["output"]["commands"][0]["command"], "show clock");
    }

    #[test]
    fn test_json_error_line_is_escaped() {
        let line = json_error_line(&success(), "bad \"value\"\nat line 1");
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["target"], "10.0.0.1");
        assert_eq!(value["error"], "bad \"value\"\nat line 1");
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_writer_sink() {
        let mut sink = WriterSink::new(Vec::new(), OutputFormat::Table);
        sink.write_report(&success()).unwrap();
        sink.finish().unwrap();
        assert!(String::from_utf8(sink.into_inner()).unwrap().starts_with("10.0.0.1\t"));
    }

    #[test]
    fn test_template_expansion() {
        let template = OutputTemplate::new("out/{date_time}/{hostname}-{ip_address}-{username}");
        assert_eq!(
            template.expand("2024-03-01_09h30m05", &success()),
            "out/2024-03-01_09h30m05/core1-10.0.0.1-admin"
        );
    }

    #[test]
    fn test_file_names() {
        let now = Local.with_ymd_and_hms(2024, 3, 1, 9, 30, 5).unwrap();
        let combined = FileSink::with_timestamp(
            OutputTemplate::new("out"),
            FileLayout::Combined,
            OutputFormat::Text,
            now,
        );
        assert_eq!(
            combined.path_for(&success()),
            PathBuf::from("out/ferritel_output_2024-03-01_09h30m05.txt")
        );

        let per_device = FileSink::with_timestamp(
            OutputTemplate::new("out"),
            FileLayout::PerDevice,
            OutputFormat::Text,
            now,
        );
        assert_eq!(
            per_device.path_for(&success()),
            PathBuf::from("out/ferritel_output_core1_10.0.0.1_2024-03-01_09h30m05.txt")
        );
    }

    #[test]
    fn test_file_sink_appends() {
        let dir = std::env::temp_dir().join(format!("ferritel-sink-{}", std::process::id()));
        let mut sink = FileSink::new(
            OutputTemplate::new(dir.join("{hostname}").to_string_lossy()),
            FileLayout::Combined,
            OutputFormat::Table,
        );

        sink.write_report(&success()).unwrap();
        sink.write_report(&success()).unwrap();
        sink.finish().unwrap();

        assert_eq!(sink.files().len(), 1);
        let written = fs::read_to_string(&sink.files()[0]).unwrap();
        assert_eq!(written.lines().count(), 2);
        fs::remove_dir_all(&dir).unwrap();
    }
}
