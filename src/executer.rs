use std::time::Duration;

use tracing::{debug, info};

use crate::core::error::ExecutionError;
use crate::runner::{CommandSpec, RunLimits, RunStatus, Runner};
use crate::toolchains::Toolchain;
use crate::workspace::Workspace;

/// Output of a run that exited cleanly
#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Launch the compiled entry point with no stdin, bounded by `timeout`
pub async fn execute_entry_point(
    runner: &dyn Runner,
    toolchain: &Toolchain,
    ws: &Workspace,
    entry_point: &str,
    timeout: Duration,
) -> Result<ExecutionOutput, ExecutionError> {
    // Relative resource paths resolve against the owner's own files
    let argv = toolchain.run_argv(entry_point, &ws.output_dir(&toolchain.output_dir));
    debug!("{}: running {:?}", ws.owner(), argv);

    let spec = CommandSpec::from_vec(&argv).with_work_dir(ws.submission_dir());
    let result = runner
        .run(&spec, &RunLimits::new(timeout))
        .await
        .map_err(|e| ExecutionError::LaunchFailure(format!("{:#}", e)))?;

    match result.status {
        RunStatus::Exited(0) => {
            info!(
                "{}: {} exited cleanly in {}ms",
                ws.owner(),
                entry_point,
                result.elapsed.as_millis()
            );
            Ok(ExecutionOutput {
                stdout: result.stdout,
                stderr: result.stderr,
                elapsed: result.elapsed,
            })
        }
        RunStatus::TimedOut => Err(ExecutionError::Timeout {
            timeout,
            stdout: result.stdout,
        }),
        status => Err(ExecutionError::NonZeroExit {
            exit_code: status.exit_code().unwrap_or(-1),
            stdout: result.stdout,
            stderr: result.stderr,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ExecutionErrorKind;
    use crate::runner::ProcessRunner;
    use crate::toolchains::ToolchainTable;

    /// A toolchain whose "program" is a shell script, so tests need no JDK
    fn shell_toolchain(run: &str) -> Toolchain {
        let table = ToolchainTable::from_toml_str(&format!(
            r#"
[sh]
source_extension = "sh"
output_dir = "out"
compile_command = "true"
run_command = "{}"
unit_pattern = 'x'
namespace_pattern = 'x'
entry_pattern = 'x'
"#,
            run
        ))
        .unwrap();
        table.get("sh").unwrap()
    }

    #[tokio::test]
    async fn test_clean_exit_returns_stdout() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::create(tmp.path(), "alice", "out").unwrap();
        std::fs::write(ws.submission_dir().join("App.sh"), "echo 'Barbie doll'\n").unwrap();

        let output = execute_entry_point(
            &ProcessRunner::new(),
            &shell_toolchain("sh {entry}.sh"),
            &ws,
            "App",
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(output.stdout, "Barbie doll\n");
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out_with_partial_output() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::create(tmp.path(), "alice", "out").unwrap();
        std::fs::write(ws.submission_dir().join("App.sh"), "echo first\nwhile true; do :; done\n").unwrap();

        let err = execute_entry_point(
            &ProcessRunner::new(),
            &shell_toolchain("sh {entry}.sh"),
            &ws,
            "App",
            Duration::from_millis(300),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ExecutionErrorKind::Timeout);
        assert_eq!(err.partial_stdout(), Some("first\n"));
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::create(tmp.path(), "alice", "out").unwrap();
        std::fs::write(ws.submission_dir().join("App.sh"), "echo partial\necho boom >&2\nexit 2\n").unwrap();

        let err = execute_entry_point(
            &ProcessRunner::new(),
            &shell_toolchain("sh {entry}.sh"),
            &ws,
            "App",
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        match err {
            ExecutionError::NonZeroExit {
                exit_code,
                stdout,
                stderr,
            } => {
                assert_eq!(exit_code, 2);
                assert_eq!(stdout, "partial\n");
                assert_eq!(stderr, "boom\n");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_runs_beside_owner_files_with_absolute_output_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::create(tmp.path(), "alice", "out").unwrap();
        std::fs::write(ws.submission_dir().join("data.txt"), "Barbie\n").unwrap();
        std::fs::write(ws.root().join("out").join("App.sh"), "cat data.txt\n").unwrap();

        let output = execute_entry_point(
            &ProcessRunner::new(),
            &shell_toolchain("sh {out}/{entry}.sh"),
            &ws,
            "App",
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(output.stdout, "Barbie\n");
    }

    #[tokio::test]
    async fn test_missing_runtime_is_launch_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::create(tmp.path(), "alice", "out").unwrap();
        let err = execute_entry_point(
            &ProcessRunner::new(),
            &shell_toolchain("/definitely/not/java {entry}"),
            &ws,
            "App",
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ExecutionErrorKind::LaunchFailure);
    }
}
