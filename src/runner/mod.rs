//! Runner module - Execution abstraction layer
//!
//! Both the compile and execute stages go through a `Runner`:
//! - `ProcessRunner`: spawns the external tool in its own process group with a deadline
//!
//! The runner module does NOT:
//! - Compare outputs or determine verdicts
//! - Know which pipeline stage it is serving

pub mod process;

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command specification for execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program path or name
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
    /// Working directory
    pub work_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Create from a command vector (first element is program, rest are args)
    pub fn from_vec(cmd: &[String]) -> Self {
        let mut iter = cmd.iter();
        let program = iter.next().cloned().unwrap_or_default();
        Self::new(program).with_args(iter.cloned())
    }

    /// Convert to a vector of strings (program + args)
    pub fn to_vec(&self) -> Vec<String> {
        let mut v = vec![self.program.clone()];
        v.extend(self.args.iter().cloned());
        v
    }
}

/// Limits for one invocation
#[derive(Debug, Clone)]
pub struct RunLimits {
    /// Wall-clock deadline
    pub timeout: Duration,
    /// Bytes kept per output stream; the rest is drained and dropped
    pub output_limit: usize,
}

impl RunLimits {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            output_limit: 4 * 1024 * 1024,
        }
    }
}

/// Execution status (raw, no verdict interpretation)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Program exited normally with given exit code
    Exited(i32),
    /// Deadline passed; the process group was killed
    TimedOut,
    /// Killed by signal
    Signaled(i32),
}

impl RunStatus {
    /// Check if execution was successful (exited with code 0)
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Exited(0))
    }

    /// Shell-style exit code: signal deaths map to 128 + signal
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunStatus::Exited(code) => Some(*code),
            RunStatus::Signaled(sig) => Some(128 + sig),
            RunStatus::TimedOut => None,
        }
    }
}

/// Outcome of running a program
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Stdout content (lossy UTF-8)
    pub stdout: String,
    /// Stderr content (lossy UTF-8)
    pub stderr: String,
    /// Wall-clock time
    pub elapsed: Duration,
}

/// Runner trait for executing programs
///
/// `Err` means the program could not be launched at all; anything the program itself
/// does (exit codes, signals, running too long) is reported through `RunOutcome`.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, cmd: &CommandSpec, limits: &RunLimits) -> Result<RunOutcome>;
}

pub use process::ProcessRunner;
