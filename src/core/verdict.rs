use serde::Serialize;
use std::fmt;
use thiserror::Error;

use super::error::{
    AssemblyError, CompilationError, ExecutionError, ExtractionError, ValidationMismatch,
};

/// Pipeline stage reached by a submission, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Pending,
    Extracted,
    Assembled,
    Compiled,
    Executed,
    Validated,
    SkippedValidation,
    Passed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Pending => "PENDING",
            Stage::Extracted => "EXTRACTED",
            Stage::Assembled => "ASSEMBLED",
            Stage::Compiled => "COMPILED",
            Stage::Executed => "EXECUTED",
            Stage::Validated => "VALIDATED",
            Stage::SkippedValidation => "SKIPPED_VALIDATION",
            Stage::Passed => "PASSED",
        };
        write!(f, "{}", s)
    }
}

/// The single cause of a failed submission
#[derive(Debug, Error)]
pub enum Failure {
    #[error("no submission archive found for this owner")]
    OwnerNotFound,
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error(transparent)]
    Compilation(#[from] CompilationError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Validation(#[from] ValidationMismatch),
    /// The grader itself broke while handling this submission
    #[error("internal grader error: {message}")]
    Internal { stage: Stage, message: String },
}

impl Failure {
    /// The stage whose transition failed
    pub fn stage(&self) -> Stage {
        match self {
            Failure::OwnerNotFound | Failure::Extraction(_) => Stage::Extracted,
            Failure::Assembly(_) => Stage::Assembled,
            Failure::Compilation(_) => Stage::Compiled,
            Failure::Execution(_) => Stage::Executed,
            Failure::Validation(_) => Stage::Validated,
            Failure::Internal { stage, .. } => *stage,
        }
    }

    /// Short machine-readable tag for reports
    pub fn kind(&self) -> &'static str {
        match self {
            Failure::OwnerNotFound => "owner_not_found",
            Failure::Extraction(_) => "extraction_error",
            Failure::Assembly(_) => "assembly_error",
            Failure::Compilation(_) => "compilation_error",
            Failure::Execution(_) => "execution_error",
            Failure::Validation(_) => "validation_mismatch",
            Failure::Internal { .. } => "internal_error",
        }
    }
}

/// Final outcome for one owner
#[derive(Debug)]
pub enum Verdict {
    Passed,
    Failed(Failure),
}

impl Verdict {
    pub fn is_passed(&self) -> bool {
        matches!(self, Verdict::Passed)
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Verdict::Passed => None,
            Verdict::Failed(failure) => Some(failure),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Passed => write!(f, "PASSED"),
            Verdict::Failed(_) => write!(f, "FAILED"),
        }
    }
}
