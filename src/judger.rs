//! Judger module for grading one submission
//!
//! Drives a located submission through extract → assemble → compile → execute →
//! validate. Every stage error is caught here and becomes the terminal failure of the
//! owner's record; nothing escapes to abort sibling submissions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::assembler::{assemble, AssemblyOptions, ReferenceImpl};
use crate::compiler::compile_source_set;
use crate::core::error::ExtractionError;
use crate::core::record::{
    AssemblySummary, ExecutionSummary, ExtractionSummary, SubmissionProgress, SubmissionRecord,
    ValidationOutcome,
};
use crate::core::verdict::{Failure, Stage};
use crate::executer::execute_entry_point;
use crate::extractor::extract_submission;
use crate::locator::{ArchiveRef, LocatedSubmission};
use crate::runner::Runner;
use crate::toolchains::Toolchain;
use crate::validator::{validate_output, ValidationOptions};
use crate::workspace::Workspace;

/// Everything a submission needs from the run, shared read-only between workers
pub struct JudgeContext {
    pub toolchain: Toolchain,
    pub reference: ReferenceImpl,
    /// Expected transcript; `None` skips validation
    pub expected_output: Option<String>,
    pub assembly: AssemblyOptions,
    pub validation: ValidationOptions,
    /// Parent of every per-owner workspace
    pub work_root: PathBuf,
    pub compile_timeout: Duration,
    pub execution_timeout: Duration,
    pub runner: Arc<dyn Runner>,
}

/// Grade one located submission. Always returns a record.
pub async fn judge_submission(
    ctx: Arc<JudgeContext>,
    located: LocatedSubmission,
) -> SubmissionRecord {
    let mut progress = SubmissionProgress::new(located.owner());

    let result = match located {
        LocatedSubmission::NotFound { .. } => Err(Failure::OwnerNotFound),
        LocatedSubmission::Found(archive) => {
            progress.set_archive(archive.source.display_path());
            run_pipeline(&ctx, archive, &mut progress).await
        }
    };

    match &result {
        Ok(()) => info!("{}: PASSED", progress.owner()),
        Err(failure) => warn!(
            "{}: FAILED at {} ({}): {}",
            progress.owner(),
            failure.stage(),
            failure.kind(),
            first_line(&failure.to_string())
        ),
    }
    progress.finish(result)
}

async fn run_pipeline(
    ctx: &Arc<JudgeContext>,
    archive: ArchiveRef,
    progress: &mut SubmissionProgress,
) -> Result<(), Failure> {
    // Extract
    let (ws, extracted) = {
        let ctx = Arc::clone(ctx);
        tokio::task::spawn_blocking(move || {
            let ws = Workspace::create(&ctx.work_root, &archive.owner, &ctx.toolchain.output_dir)
                .map_err(ExtractionError::Io)?;
            let report = extract_submission(&archive.source, &ws.submission_dir(), &ctx.toolchain)?;
            Ok::<_, ExtractionError>((ws, report))
        })
        .await
        .map_err(|e| internal(Stage::Extracted, e))??
    };
    info!(
        "{}: extracted {} files ({} sources)",
        ws.owner(),
        extracted.files,
        extracted.sources
    );
    progress.record_extraction(
        ExtractionSummary {
            files: extracted.files,
            sources: extracted.sources,
        },
        extracted.sha256,
    );

    // Assemble
    let assembled = {
        let ctx = Arc::clone(ctx);
        let ws = ws.clone();
        tokio::task::spawn_blocking(move || {
            assemble(&ws, &ctx.reference, &ctx.toolchain, ctx.assembly)
        })
        .await
        .map_err(|e| internal(Stage::Assembled, e))??
    };
    progress.record_assembly(AssemblySummary {
        sources: assembled.source_set.paths(),
        entry_point: assembled.entry_point.clone(),
        evicted: assembled.evicted.clone(),
        renamed: assembled.renamed.clone(),
        stripped: assembled.stripped.clone(),
    });

    // Compile
    let compiled = compile_source_set(
        ctx.runner.as_ref(),
        &ctx.toolchain,
        &ws,
        &assembled.source_set,
        &assembled.entry_point,
        ctx.compile_timeout,
    )
    .await?;
    progress.record_compilation(compiled.diagnostics);

    // Execute
    let output = execute_entry_point(
        ctx.runner.as_ref(),
        &ctx.toolchain,
        &ws,
        &assembled.entry_point,
        ctx.execution_timeout,
    )
    .await?;
    let stdout = output.stdout.clone();
    progress.record_execution(ExecutionSummary {
        stdout: output.stdout,
        stderr: output.stderr,
        elapsed_ms: output.elapsed.as_millis() as u64,
    });

    // Validate
    let outcome = match &ctx.expected_output {
        Some(expected) => ValidationOutcome::Matched {
            lines: validate_output(&stdout, expected, ctx.validation)?,
        },
        None => ValidationOutcome::Skipped,
    };
    progress.record_validation(outcome);

    Ok(())
}

fn internal(stage: Stage, err: tokio::task::JoinError) -> Failure {
    Failure::Internal {
        stage,
        message: err.to_string(),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}


#[cfg(test)]
mod tests {
    use std::fs;

    use super::fixtures::*;
    use super::*;
    use crate::core::error::{
        CompilationError, ExecutionError, ExecutionErrorKind, ValidationMismatch,
    };
    use crate::runner::{ProcessRunner, RunStatus};
    use crate::toolchains::ToolchainTable;

    #[tokio::test]
    async fn test_clean_submission_passes_without_transcript() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::passing("Barbie\n"));
        let ctx = context(tmp.path(), runner.clone(), None);
        let located = submission(tmp.path(), "alice", &[("Lab02/Doll.java", DOLL)]);

        let record = judge_submission(ctx, located).await;
        assert!(record.is_passed(), "{:?}", record.failure());
        assert_eq!(record.stage, Stage::Passed);
        assert_eq!(record.validation, Some(ValidationOutcome::Skipped));
        assert_eq!(record.execution.as_ref().map(|e| e.stdout.as_str()), Some("Barbie\n"));
        assert_eq!(record.archive_sha256.as_ref().map(String::len), Some(64));

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        let ws_root = tmp.path().join("temp_extracts").canonicalize().unwrap().join("alice");
        assert_eq!(calls[0].work_dir.as_deref(), Some(ws_root.as_path()));
        assert_eq!(
            calls[1].to_vec(),
            vec![
                "java".to_string(),
                "-cp".to_string(),
                ws_root.join("classes").display().to_string(),
                "App".to_string()
            ]
        );
        assert_eq!(calls[1].work_dir, Some(ws_root.join("submission")));
    }

    #[tokio::test]
    async fn test_syntax_error_fails_at_compile_with_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let stderr = "submission/Doll.java:2: error: ';' expected\n1 error\n";
        let runner = Arc::new(FakeRunner::new(
            outcome(RunStatus::Exited(1), "", stderr),
            outcome(RunStatus::Exited(0), "", ""),
        ));
        let ctx = context(tmp.path(), runner.clone(), None);
        let located = submission(tmp.path(), "bob", &[("Doll.java", "public class Doll { int x = 1 }")]);

        let record = judge_submission(ctx, located).await;
        let failure = record.failure().unwrap();
        assert_eq!(failure.stage(), Stage::Compiled);
        assert_eq!(record.stage, Stage::Assembled);
        match failure {
            Failure::Compilation(err @ CompilationError::Failed { .. }) => {
                assert_eq!(err.diagnostic(), stderr)
            }
            other => panic!("unexpected {:?}", other),
        }
        // Never executed
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_fails_at_execution() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new(
            outcome(RunStatus::Exited(0), "", ""),
            outcome(RunStatus::TimedOut, "partial\n", ""),
        ));
        let ctx = context(tmp.path(), runner, Some("Barbie\n"));
        let located = submission(tmp.path(), "carol", &[("Doll.java", DOLL)]);

        let record = judge_submission(ctx, located).await;
        match record.failure() {
            Some(Failure::Execution(err)) => {
                assert_eq!(err.kind(), ExecutionErrorKind::Timeout);
                assert_eq!(err.partial_stdout(), Some("partial\n"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(record.stage, Stage::Compiled);
        assert_eq!(record.validation, None);
    }

    /// Real processes with `sh` standing in for the toolchain; `App.sh` sources the
    /// owner's `Worker.sh` from the working directory.
    fn shell_context(root: &std::path::Path, timeout: Duration) -> Arc<JudgeContext> {
        let toolchain = ToolchainTable::from_toml_str(
            r#"
[sh]
source_extension = "sh"
output_dir = "out"
compile_command = "true {sources}"
run_command = "sh ../reference/{entry}.sh"
unit_pattern = '(?m)^#\s*(public\s+)?unit\s+(\w+)'
namespace_pattern = '^#\s*ns\b'
entry_pattern = '(?m)^#\s*main'
"#,
        )
        .unwrap()
        .get("sh")
        .unwrap();

        let reference_dir = root.join("default_code");
        fs::create_dir_all(&reference_dir).unwrap();
        fs::write(reference_dir.join("App.sh"), "# main\n. ./Worker.sh\n").unwrap();
        let reference = ReferenceImpl::load(&reference_dir, &toolchain, None).unwrap();

        Arc::new(JudgeContext {
            toolchain,
            reference,
            expected_output: None,
            assembly: AssemblyOptions::default(),
            validation: ValidationOptions::default(),
            work_root: root.join("temp_extracts"),
            compile_timeout: Duration::from_secs(5),
            execution_timeout: timeout,
            runner: Arc::new(ProcessRunner::new()),
        })
    }

    #[tokio::test]
    async fn test_real_infinite_loop_leaves_no_orphans() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = shell_context(tmp.path(), Duration::from_millis(500));
        let located = submission(
            tmp.path(),
            "dave",
            &[("Worker.sh", "sleep 30 &\necho $!\nwhile true; do :; done\n")],
        );

        let record = judge_submission(ctx, located).await;
        let stdout = match record.failure() {
            Some(Failure::Execution(ExecutionError::Timeout { stdout, .. })) => stdout.clone(),
            other => panic!("unexpected {:?}", other),
        };
        let pid: i32 = stdout.trim().parse().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let alive = fs::read_to_string(format!("/proc/{}/stat", pid))
            .map(|stat| {
                !stat
                    .rsplit_once(')')
                    .map(|(_, rest)| rest.trim_start().starts_with('Z'))
                    .unwrap_or(false)
            })
            .unwrap_or(false);
        assert!(!alive, "background process {} outlived the run", pid);
    }

    #[tokio::test]
    async fn test_program_reads_resource_shipped_in_wrapper_folder() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = shell_context(tmp.path(), Duration::from_secs(5));
        let located = submission(
            tmp.path(),
            "ivy",
            &[
                ("Lab02/", ""),
                ("Lab02/Worker.sh", "cat data.txt\n"),
                ("Lab02/data.txt", "Barbie\nKen\n"),
            ],
        );

        let record = judge_submission(ctx, located).await;
        assert!(record.is_passed(), "{:?}", record.failure());
        assert_eq!(
            record.execution.as_ref().map(|e| e.stdout.as_str()),
            Some("Barbie\nKen\n")
        );
    }

    #[tokio::test]
    async fn test_zip_slip_is_an_extraction_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::passing(""));
        let ctx = context(tmp.path(), runner.clone(), None);
        let located = submission(
            tmp.path(),
            "eve",
            &[("Doll.java", DOLL), ("../../evil.java", "class Evil {}")],
        );

        let record = judge_submission(ctx, located).await;
        assert!(matches!(
            record.failure(),
            Some(Failure::Extraction(ExtractionError::UnsafeEntry { .. }))
        ));
        assert_eq!(record.stage, Stage::Pending);
        assert!(!tmp.path().join("evil.java").exists());
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reference_entry_point_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::passing("Barbie\n"));
        let ctx = context(tmp.path(), runner.clone(), None);
        let located = submission(
            tmp.path(),
            "frank",
            &[
                ("src/App.java", "public class App { public static void main(String[] a) { System.out.println(\"hacked\"); } }"),
                ("src/Doll.java", DOLL),
            ],
        );

        let record = judge_submission(ctx, located).await;
        assert!(record.is_passed());
        let compile = &runner.calls.lock().unwrap()[0];
        assert!(compile.args.contains(&"reference/App.java".to_string()));
        assert!(!compile.args.contains(&"submission/App.java".to_string()));
        let assembly = record.assembly.unwrap();
        // `src/` was the lone wrapper folder, so its files sit at the top
        assert_eq!(assembly.evicted, vec!["submission/App.java"]);
    }

    #[tokio::test]
    async fn test_output_mismatch_fails_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::passing("Barbie\n"));
        let ctx = context(tmp.path(), runner, Some("Barbie\nKen\n"));
        let located = submission(tmp.path(), "gina", &[("Doll.java", DOLL)]);

        let record = judge_submission(ctx, located).await;
        assert!(matches!(
            record.failure(),
            Some(Failure::Validation(ValidationMismatch::LineCountMismatch {
                expected: 2,
                actual: 1
            }))
        ));
        assert_eq!(record.stage, Stage::Executed);
    }

    #[tokio::test]
    async fn test_matching_transcript_passes() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::passing("Barbie\r\n"));
        let ctx = context(tmp.path(), runner, Some("Barbie\n"));
        let located = submission(tmp.path(), "hana", &[("Doll.java", DOLL)]);

        let record = judge_submission(ctx, located).await;
        assert!(record.is_passed());
        assert_eq!(record.validation, Some(ValidationOutcome::Matched { lines: 1 }));
    }

    #[tokio::test]
    async fn test_owner_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), Arc::new(FakeRunner::passing("")), None);
        let record = judge_submission(
            ctx,
            LocatedSubmission::NotFound {
                owner: "ghost".into(),
            },
        )
        .await;
        assert!(matches!(record.failure(), Some(Failure::OwnerNotFound)));
        assert_eq!(record.archive, None);
    }
}
