//! Error taxonomy for the grading pipeline
//!
//! `LocatorError`, `ReferenceError` and `ConfigError` are run-scoped and abort the run
//! before any submission is processed. Every other error is scoped to one submission and
//! ends up as the terminal failure of its `SubmissionRecord`.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("submissions root {0} does not exist")]
    MissingRoot(PathBuf),
    #[error("submissions root {path} is not readable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("owner `{owner}` appears in both {first} and {second}")]
    DuplicateOwner {
        owner: String,
        first: PathBuf,
        second: PathBuf,
    },
}

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("reference directory {0} does not exist")]
    MissingDir(PathBuf),
    #[error("reference directory {0} contains no source files")]
    NoSources(PathBuf),
    #[error("entry point `{0}` not found among reference sources")]
    EntryPointNotFound(String),
    #[error("cannot tell which reference file is the entry point: {0:?}")]
    AmbiguousEntryPoint(Vec<String>),
    #[error("failed to read reference sources: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown toolchain `{name}` (available: {available})")]
    UnknownToolchain { name: String, available: String },
    #[error("expected output file {path} could not be read: {source}")]
    ExpectedOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("worker pool size must be at least 1")]
    NoWorkers,
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("archive is unreadable: {0}")]
    Unreadable(String),
    #[error("archive entry `{entry}` escapes the workspace")]
    UnsafeEntry { entry: String },
    #[error("submission contains no source files")]
    NoSources,
    #[error("archive `{entry}` is nested too deeply")]
    NestedTooDeep { entry: String },
    #[error("workspace I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("reference entry point `{0}` is missing from the merged source set")]
    MissingEntryPoint(String),
    #[error("merged source set is empty")]
    EmptySourceSet,
    #[error("source assembly I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CompilationError {
    /// Compiler exited non-zero; the diagnostic is the tool's output verbatim
    #[error("{diagnostic}")]
    Failed { exit_code: i32, diagnostic: String },
    #[error("compilation timed out after {}ms", .timeout.as_millis())]
    TimedOut { timeout: Duration },
    #[error("compiler could not be started: {0}")]
    LaunchFailure(String),
}

impl CompilationError {
    /// Text recorded for grading review
    pub fn diagnostic(&self) -> String {
        match self {
            CompilationError::Failed { diagnostic, .. } => diagnostic.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    Timeout,
    NonZeroExit,
    LaunchFailure,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("execution timed out after {}ms", .timeout.as_millis())]
    Timeout { timeout: Duration, stdout: String },
    /// A signal death is reported as exit code 128 + signal
    #[error("program exited with status {exit_code}: {stderr}")]
    NonZeroExit {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    #[error("program could not be started: {0}")]
    LaunchFailure(String),
}

impl ExecutionError {
    pub fn kind(&self) -> ExecutionErrorKind {
        match self {
            ExecutionError::Timeout { .. } => ExecutionErrorKind::Timeout,
            ExecutionError::NonZeroExit { .. } => ExecutionErrorKind::NonZeroExit,
            ExecutionError::LaunchFailure(_) => ExecutionErrorKind::LaunchFailure,
        }
    }

    /// Whatever the program printed before failing
    pub fn partial_stdout(&self) -> Option<&str> {
        match self {
            ExecutionError::Timeout { stdout, .. } | ExecutionError::NonZeroExit { stdout, .. } => {
                Some(stdout.as_str())
            }
            ExecutionError::LaunchFailure(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationMismatch {
    #[error("expected {expected} lines, got {actual} lines")]
    LineCountMismatch { expected: usize, actual: usize },
    /// `line` is 1-based
    #[error("mismatch at line {line}: expected \"{expected}\", actual \"{actual}\"")]
    ContentMismatch {
        line: usize,
        expected: String,
        actual: String,
    },
}
