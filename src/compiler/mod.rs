//! Compiler module - Source Set compilation
//!
//! Hands the whole Source Set to the toolchain's compiler in one invocation, with the
//! workspace root as working directory. Diagnostics are kept verbatim for grading review.

use std::time::Duration;

use tracing::{debug, info};

use crate::assembler::SourceSet;
use crate::core::error::CompilationError;
use crate::runner::{CommandSpec, RunLimits, RunStatus, Runner};
use crate::toolchains::Toolchain;
use crate::workspace::Workspace;

/// Result of a successful compilation
#[derive(Debug, Clone)]
pub struct CompileOutput {
    /// Warnings the compiler printed, if any
    pub diagnostics: String,
}

/// Compile every file of `sources` into the workspace output directory
pub async fn compile_source_set(
    runner: &dyn Runner,
    toolchain: &Toolchain,
    ws: &Workspace,
    sources: &SourceSet,
    entry_point: &str,
    timeout: Duration,
) -> Result<CompileOutput, CompilationError> {
    let argv = toolchain.compile_argv(&sources.paths(), entry_point);
    debug!("{}: compiling with {:?}", ws.owner(), argv);

    let spec = CommandSpec::from_vec(&argv).with_work_dir(ws.root());
    let result = runner
        .run(&spec, &RunLimits::new(timeout))
        .await
        .map_err(|e| CompilationError::LaunchFailure(format!("{:#}", e)))?;

    match result.status {
        RunStatus::Exited(0) => {
            info!(
                "{}: compiled {} sources in {}ms",
                ws.owner(),
                sources.len(),
                result.elapsed.as_millis()
            );
            Ok(CompileOutput {
                diagnostics: pick_diagnostic(&result.stderr, &result.stdout).to_string(),
            })
        }
        RunStatus::TimedOut => Err(CompilationError::TimedOut { timeout }),
        status => {
            let exit_code = status.exit_code().unwrap_or(-1);
            let diagnostic = match pick_diagnostic(&result.stderr, &result.stdout) {
                "" if matches!(status, RunStatus::Signaled(_)) => "Compiler crashed".to_string(),
                "" => format!("Compilation failed with exit code {}", exit_code),
                text => text.to_string(),
            };
            Err(CompilationError::Failed {
                exit_code,
                diagnostic,
            })
        }
    }
}

/// stderr verbatim, or stdout for compilers that report there
fn pick_diagnostic<'a>(stderr: &'a str, stdout: &'a str) -> &'a str {
    if !stderr.trim().is_empty() {
        stderr
    } else if !stdout.trim().is_empty() {
        stdout
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::SourceOrigin;
    use crate::runner::RunOutcome;
    use crate::toolchains::java;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        outcome: RunOutcome,
        seen: Mutex<Vec<CommandSpec>>,
    }

    #[async_trait]
    impl Runner for Scripted {
        async fn run(&self, cmd: &CommandSpec, _limits: &RunLimits) -> anyhow::Result<RunOutcome> {
            self.seen.lock().unwrap().push(cmd.clone());
            Ok(self.outcome.clone())
        }
    }

    fn scripted(status: RunStatus, stdout: &str, stderr: &str) -> Scripted {
        Scripted {
            outcome: RunOutcome {
                status,
                stdout: stdout.into(),
                stderr: stderr.into(),
                elapsed: Duration::from_millis(5),
            },
            seen: Mutex::new(Vec::new()),
        }
    }

    fn source_set() -> SourceSet {
        let mut set = SourceSet::default();
        set.insert("submission/Doll.java".into(), SourceOrigin::Owner);
        set.insert("reference/App.java".into(), SourceOrigin::Reference);
        set
    }

    #[tokio::test]
    async fn test_invokes_compiler_over_whole_set() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::create(tmp.path(), "alice", "classes").unwrap();
        let runner = scripted(RunStatus::Exited(0), "", "");

        compile_source_set(&runner, &java(), &ws, &source_set(), "App", Duration::from_secs(5))
            .await
            .unwrap();

        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen[0].program, "javac");
        assert_eq!(
            &seen[0].args[seen[0].args.len() - 2..],
            &["reference/App.java", "submission/Doll.java"]
        );
        assert_eq!(seen[0].work_dir.as_deref(), Some(ws.root()));
    }

    #[tokio::test]
    async fn test_diagnostic_is_stderr_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::create(tmp.path(), "alice", "classes").unwrap();
        let stderr = "submission/Doll.java:3: error: ';' expected\n        int x = 1\n                 ^\n1 error\n";
        let runner = scripted(RunStatus::Exited(1), "", stderr);

        let err = compile_source_set(&runner, &java(), &ws, &source_set(), "App", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.diagnostic(), stderr);
        assert_eq!(err.to_string(), stderr);
    }

    #[tokio::test]
    async fn test_timeout_and_crash() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::create(tmp.path(), "alice", "classes").unwrap();

        let timed_out = scripted(RunStatus::TimedOut, "", "");
        let err = compile_source_set(&timed_out, &java(), &ws, &source_set(), "App", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CompilationError::TimedOut { .. }));

        let crashed = scripted(RunStatus::Signaled(11), "", "");
        let err = compile_source_set(&crashed, &java(), &ws, &source_set(), "App", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CompilationError::Failed { exit_code: 139, .. }));
        assert_eq!(err.diagnostic(), "Compiler crashed");
    }
}
