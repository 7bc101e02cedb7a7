//! Run Summary reports
//!
//! The JSON document and the CSV table are both rendered from the same `RunSummary`;
//! nothing here recomputes an outcome.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::aggregator::RunSummary;
use crate::core::error::{ExecutionError, ExecutionErrorKind};
use crate::core::record::{SubmissionRecord, ValidationOutcome};
use crate::core::verdict::{Failure, Stage};

/// Longest diagnostic kept in a CSV remark
const REMARK_LIMIT: usize = 100;
const PASS_REMARK: &str = "All tests passed";

#[derive(Debug, Serialize)]
struct ReportDocument<'a> {
    started_at: String,
    generated_at: String,
    total: usize,
    passed: usize,
    failed: usize,
    submissions: Vec<SubmissionEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct SubmissionEntry<'a> {
    owner: &'a str,
    overall_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    archive: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    archive_sha256: Option<&'a str>,
    stage_reached: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_kind: Option<&'static str>,
    extraction: ExtractionEntry,
    assembly: AssemblyEntry<'a>,
    compilation: CompilationEntry,
    execution: ExecutionEntry<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_validation: Option<ValidationEntry>,
}

#[derive(Debug, Serialize)]
struct ExtractionEntry {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sources: Option<usize>,
}

#[derive(Debug, Serialize)]
struct AssemblyEntry<'a> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entry_point: Option<&'a str>,
    #[serde(skip_serializing_if = "no_paths")]
    sources: &'a [String],
    #[serde(skip_serializing_if = "no_paths")]
    evicted: &'a [String],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    renamed: Vec<String>,
    #[serde(skip_serializing_if = "no_paths")]
    stripped: &'a [String],
}

#[derive(Debug, Serialize)]
struct CompilationEntry {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostic: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExecutionEntry<'a> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdout: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<ExecutionErrorKind>,
}

#[derive(Debug, Serialize)]
struct ValidationEntry {
    success: bool,
    skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

fn no_paths(paths: &&[String]) -> bool {
    paths.is_empty()
}

fn entry(record: &SubmissionRecord) -> SubmissionEntry<'_> {
    let failure = record.failure();
    let failed_at = failure.map(Failure::stage);
    let error_at = |stage: Stage| match failure {
        Some(f) if f.stage() == stage => Some(f.to_string()),
        _ => None,
    };
    let reached = |stage: Stage| record.stage >= stage;

    let compilation = CompilationEntry {
        success: reached(Stage::Compiled),
        diagnostic: match failure {
            Some(Failure::Compilation(err)) => Some(err.diagnostic()),
            Some(f) if f.stage() == Stage::Compiled => Some(f.to_string()),
            _ => record.compile_diagnostics.clone(),
        },
    };

    let execution = match failure {
        Some(Failure::Execution(err)) => ExecutionEntry {
            success: false,
            stdout: err.partial_stdout(),
            stderr: match err {
                ExecutionError::NonZeroExit { stderr, .. } => Some(stderr.as_str()),
                _ => None,
            },
            elapsed_ms: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        },
        _ => ExecutionEntry {
            success: reached(Stage::Executed),
            stdout: record.execution.as_ref().map(|e| e.stdout.as_str()),
            stderr: record
                .execution
                .as_ref()
                .map(|e| e.stderr.as_str())
                .filter(|s| !s.is_empty()),
            elapsed_ms: record.execution.as_ref().map(|e| e.elapsed_ms),
            error: error_at(Stage::Executed),
            error_kind: None,
        },
    };

    let output_validation = match (failure, record.validation) {
        (Some(f), _) if f.stage() == Stage::Validated => Some(ValidationEntry {
            success: false,
            skipped: false,
            message: Some(f.to_string()),
        }),
        (_, Some(ValidationOutcome::Matched { lines })) => Some(ValidationEntry {
            success: true,
            skipped: false,
            message: Some(format!("{} lines matched", lines)),
        }),
        (_, Some(ValidationOutcome::Skipped)) => Some(ValidationEntry {
            success: true,
            skipped: true,
            message: Some("no expected output configured".to_string()),
        }),
        _ => None,
    };

    SubmissionEntry {
        owner: &record.owner,
        overall_status: record.verdict.to_string(),
        archive: record.archive.as_deref(),
        archive_sha256: record.archive_sha256.as_deref(),
        stage_reached: record.stage,
        failed_stage: failed_at,
        failure_kind: failure.map(Failure::kind),
        extraction: ExtractionEntry {
            success: reached(Stage::Extracted),
            error: error_at(Stage::Extracted),
            files: record.extraction.as_ref().map(|e| e.files),
            sources: record.extraction.as_ref().map(|e| e.sources),
        },
        assembly: AssemblyEntry {
            success: reached(Stage::Assembled),
            error: error_at(Stage::Assembled),
            entry_point: record.assembly.as_ref().map(|a| a.entry_point.as_str()),
            sources: record.assembly.as_ref().map(|a| &a.sources[..]).unwrap_or(&[]),
            evicted: record.assembly.as_ref().map(|a| &a.evicted[..]).unwrap_or(&[]),
            renamed: record
                .assembly
                .as_ref()
                .map(|a| {
                    a.renamed
                        .iter()
                        .map(|(from, to)| format!("{} -> {}", from, to))
                        .collect()
                })
                .unwrap_or_default(),
            stripped: record.assembly.as_ref().map(|a| &a.stripped[..]).unwrap_or(&[]),
        },
        compilation,
        execution,
        output_validation,
    }
}

/// Detailed structured report
pub fn render_json(summary: &RunSummary) -> Result<String> {
    let document = ReportDocument {
        started_at: summary.started_at.to_rfc3339(),
        generated_at: summary.finished_at.to_rfc3339(),
        total: summary.total,
        passed: summary.passed,
        failed: summary.failed,
        submissions: summary.records.iter().map(entry).collect(),
    };
    serde_json::to_string_pretty(&document).context("Failed to serialize JSON report")
}

/// Flat `Owner,Status,Remark` table
pub fn render_csv(summary: &RunSummary) -> String {
    let mut out = String::from("Owner,Status,Remark\n");
    for record in &summary.records {
        out.push_str(&csv_field(&record.owner));
        out.push(',');
        out.push_str(&csv_field(&record.verdict.to_string()));
        out.push(',');
        out.push_str(&csv_field(&remark(record)));
        out.push('\n');
    }
    out
}

/// First failing stage's diagnostic, or a pass confirmation
pub fn remark(record: &SubmissionRecord) -> String {
    let Some(failure) = record.failure() else {
        return PASS_REMARK.to_string();
    };
    let (label, message) = match failure {
        Failure::Compilation(err) => ("Compilation", err.diagnostic()),
        other => {
            let label = match other.stage() {
                Stage::Pending | Stage::Extracted => "Extraction",
                Stage::Assembled => "Assembly",
                Stage::Compiled => "Compilation",
                Stage::Executed => "Execution",
                _ => "Output",
            };
            (label, other.to_string())
        }
    };
    format!("{}: {}", label, truncate(&message, REMARK_LIMIT))
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        let mut short: String = text.chars().take(limit).collect();
        short.push_str("...");
        short
    } else {
        text.to_string()
    }
}

/// Quote a CSV field when it contains a delimiter, quote or line break
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Human-readable summary for the terminal
pub fn render_console(summary: &RunSummary) -> String {
    let width = summary
        .records
        .iter()
        .map(|r| r.owner.chars().count())
        .max()
        .unwrap_or(0)
        .max(5);
    let rule = "=".repeat(60);

    let mut out = format!(
        "{}\nGrading summary: {} total, {} passed, {} failed\n{}\n",
        rule, summary.total, summary.passed, summary.failed, rule
    );
    for record in &summary.records {
        let remark = remark(record);
        let first = remark.lines().next().unwrap_or("");
        out.push_str(&format!(
            "{:<width$}  {:<6}  {}\n",
            record.owner,
            record.verdict.to_string(),
            first,
            width = width
        ));
    }
    out
}

/// Paths of the files written for one run
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub json: PathBuf,
    pub csv: PathBuf,
}

/// Write `results_<timestamp>.json` and `.csv` into `results_dir`
pub fn write_reports(results_dir: &Path, summary: &RunSummary) -> Result<ReportPaths> {
    fs::create_dir_all(results_dir).with_context(|| {
        format!("Failed to create results directory {}", results_dir.display())
    })?;
    let stamp = summary.finished_at.format("%Y%m%d_%H%M%S");
    let paths = ReportPaths {
        json: results_dir.join(format!("results_{}.json", stamp)),
        csv: results_dir.join(format!("results_{}.csv", stamp)),
    };

    fs::write(&paths.json, render_json(summary)?)
        .with_context(|| format!("Failed to write {}", paths.json.display()))?;
    fs::write(&paths.csv, render_csv(summary))
        .with_context(|| format!("Failed to write {}", paths.csv.display()))?;

    info!("JSON report saved to {}", paths.json.display());
    info!("CSV report saved to {}", paths.csv.display());
    Ok(paths)
}
