use std::io::{self, Write};

use serde::Serialize;

use crate::app::{BatchReport, ProgressEvent, ProgressSink, ReportStatus};
use crate::domain::Locator;
use crate::sample::SampleRecord;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &BatchReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_samples(samples: &[SampleRecord]) -> io::Result<()> {
        Self::print_json(&samples)
    }

    pub fn print_locators(locators: &[Locator]) -> io::Result<()> {
        let keys = locators.iter().map(Locator::to_string).collect::<Vec<_>>();
        Self::print_json(&keys)
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

/// Writes progress lines to stderr for interactive runs.
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => eprintln!("{}", event.message),
        }
    }
}

pub fn print_report_summary(report: &BatchReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}mmit summary{reset}");
    println!(
        "{green}succeeded: {}{reset}  {yellow}skipped: {}{reset}  {red}failed: {}{reset}",
        report.count(ReportStatus::Success),
        report.count(ReportStatus::Skipped),
        report.count(ReportStatus::Failed),
    );

    for entry in &report.entries {
        let (icon, color) = match entry.status {
            ReportStatus::Success => ("+", green),
            ReportStatus::Skipped => ("~", yellow),
            ReportStatus::Failed => ("x", red),
        };
        println!(
            "{color}{icon} {} {}{reset}",
            entry.operation, entry.sample_key
        );
        if let Some(detail) = &entry.detail {
            println!("{color}   {detail}{reset}");
        }
    }
}

pub fn print_samples_summary(samples: &[SampleRecord]) {
    for (index, sample) in samples.iter().enumerate() {
        println!(
            "{index}: {} ({}; PI {} {}; submitter {} {})",
            sample.dataset_name,
            sample.institution,
            sample.principal_investigator.first_name,
            sample.principal_investigator.surname,
            sample.submitter.first_name,
            sample.submitter.surname,
        );
        for (kind, path) in &sample.artifact_paths {
            println!("   {kind}: {path}");
        }
    }
}
