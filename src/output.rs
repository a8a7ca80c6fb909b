use std::fmt::Write as _;
use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    DownloadResult, InitResult, ListResult, ProgressEvent, ProgressSink, RegisterResult,
    RemoveResult,
};
use crate::domain::FileKind;
use crate::download::{FetchReport, FileOutcome};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_init(result: &InitResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_register(result: &RegisterResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_remove(result: &RemoveResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_report(report: &FetchReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct TextOutput;

impl TextOutput {
    pub fn print(text: &str) -> io::Result<()> {
        let mut stdout = io::stdout();
        stdout.write_all(text.as_bytes())?;
        Ok(())
    }

    pub fn render_list(result: &ListResult) -> String {
        let mut out = String::new();
        let scope = if result.location.is_global {
            "global"
        } else {
            "local"
        };
        let _ = writeln!(out, "Registry: {} ({scope})", result.location.path);
        if let Some(title) = &result.title {
            let _ = writeln!(out, "Title: {title}");
        }
        if let Some(description) = &result.description {
            let _ = writeln!(out, "Description: {description}");
        }

        if result.datasets.is_empty() {
            let _ = writeln!(out, "\nNo datasets registered.");
            return out;
        }

        let width = FileKind::ALL
            .iter()
            .map(|kind| kind.as_str().len())
            .max()
            .unwrap_or(0);
        for dataset in &result.datasets {
            let _ = writeln!(out, "\n{}", dataset.label);
            for (kind, source) in dataset.files() {
                let _ = writeln!(out, "  {:<width$}  {source}", kind.as_str());
            }
        }
        out
    }

    pub fn render_report(report: &FetchReport) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{}/{} files available in {}",
            report.succeeded(),
            report.len(),
            report.destination
        );
        for file in &report.files {
            let line = match &file.outcome {
                FileOutcome::Downloaded { path } => format!("downloaded  {path}"),
                FileOutcome::AlreadyPresent { path } => format!("present     {path}"),
                FileOutcome::Failed { reason } => format!("failed      {} ({reason})", file.source),
            };
            let _ = writeln!(out, "  {} {:<7} {line}", file.label, file.kind.as_str());
        }
        out
    }
}
