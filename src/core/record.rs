//! Per-owner submission records
//!
//! A `SubmissionProgress` is filled in stage by stage while one submission moves through
//! the pipeline, then frozen into a `SubmissionRecord` with exactly one verdict.

use serde::Serialize;

use super::verdict::{Failure, Stage, Verdict};

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionSummary {
    pub files: usize,
    pub sources: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssemblySummary {
    pub sources: Vec<String>,
    pub entry_point: String,
    pub evicted: Vec<String>,
    pub renamed: Vec<(String, String)>,
    pub stripped: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ValidationOutcome {
    /// Every line matched
    Matched { lines: usize },
    /// No expected transcript was configured
    Skipped,
}

/// Final, immutable outcome for one owner
#[derive(Debug)]
pub struct SubmissionRecord {
    pub owner: String,
    /// Archive (or loose files) that was graded
    pub archive: Option<String>,
    pub archive_sha256: Option<String>,
    /// Last stage completed successfully
    pub stage: Stage,
    pub extraction: Option<ExtractionSummary>,
    pub assembly: Option<AssemblySummary>,
    /// Compiler warnings on a successful compile
    pub compile_diagnostics: Option<String>,
    pub execution: Option<ExecutionSummary>,
    pub validation: Option<ValidationOutcome>,
    pub verdict: Verdict,
}

impl SubmissionRecord {
    pub fn is_passed(&self) -> bool {
        self.verdict.is_passed()
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.verdict.failure()
    }
}

/// Builder for a `SubmissionRecord`
#[derive(Debug)]
pub struct SubmissionProgress {
    owner: String,
    archive: Option<String>,
    archive_sha256: Option<String>,
    stage: Stage,
    extraction: Option<ExtractionSummary>,
    assembly: Option<AssemblySummary>,
    compile_diagnostics: Option<String>,
    execution: Option<ExecutionSummary>,
    validation: Option<ValidationOutcome>,
}

impl SubmissionProgress {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            archive: None,
            archive_sha256: None,
            stage: Stage::Pending,
            extraction: None,
            assembly: None,
            compile_diagnostics: None,
            execution: None,
            validation: None,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(next > self.stage, "stage moved from {} to {}", self.stage, next);
        self.stage = next;
    }

    pub fn set_archive(&mut self, archive: String) {
        self.archive = Some(archive);
    }

    pub fn record_extraction(&mut self, summary: ExtractionSummary, sha256: String) {
        self.archive_sha256 = Some(sha256);
        self.extraction = Some(summary);
        self.advance(Stage::Extracted);
    }

    pub fn record_assembly(&mut self, summary: AssemblySummary) {
        self.assembly = Some(summary);
        self.advance(Stage::Assembled);
    }

    pub fn record_compilation(&mut self, diagnostics: String) {
        if !diagnostics.is_empty() {
            self.compile_diagnostics = Some(diagnostics);
        }
        self.advance(Stage::Compiled);
    }

    pub fn record_execution(&mut self, summary: ExecutionSummary) {
        self.execution = Some(summary);
        self.advance(Stage::Executed);
    }

    pub fn record_validation(&mut self, outcome: ValidationOutcome) {
        self.validation = Some(outcome);
        self.advance(match outcome {
            ValidationOutcome::Matched { .. } => Stage::Validated,
            ValidationOutcome::Skipped => Stage::SkippedValidation,
        });
    }

    /// Freeze the record. On success the stage becomes `Passed`.
    pub fn finish(mut self, result: Result<(), Failure>) -> SubmissionRecord {
        let verdict = match result {
            Ok(()) => {
                self.advance(Stage::Passed);
                Verdict::Passed
            }
            Err(failure) => Verdict::Failed(failure),
        };
        SubmissionRecord {
            owner: self.owner,
            archive: self.archive,
            archive_sha256: self.archive_sha256,
            stage: self.stage,
            extraction: self.extraction,
            assembly: self.assembly,
            compile_diagnostics: self.compile_diagnostics,
            execution: self.execution,
            validation: self.validation,
            verdict,
        }
    }
}
