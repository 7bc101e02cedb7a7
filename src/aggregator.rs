//! Result aggregator
//!
//! Fans submissions out over a bounded worker pool and collects exactly one record per
//! located submission, in locator order regardless of which finishes first.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::record::{SubmissionProgress, SubmissionRecord};
use crate::core::verdict::{Failure, Stage};
use crate::judger::{judge_submission, JudgeContext};
use crate::locator::LocatedSubmission;
use crate::workspace::is_valid_owner;

/// Every record of one run plus the counts derived from them
#[derive(Debug)]
pub struct RunSummary {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub records: Vec<SubmissionRecord>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn from_records(started_at: DateTime<Local>, records: Vec<SubmissionRecord>) -> Self {
        let passed = records.iter().filter(|r| r.is_passed()).count();
        Self {
            started_at,
            finished_at: Local::now(),
            total: records.len(),
            passed,
            failed: records.len() - passed,
            records,
        }
    }
}

/// Grade every submission with at most `workers` in flight
pub async fn grade_all(
    ctx: Arc<JudgeContext>,
    submissions: Vec<LocatedSubmission>,
    workers: usize,
) -> RunSummary {
    let started_at = Local::now();
    let workers = workers.max(1);
    info!(
        "Grading {} submissions with {} workers",
        submissions.len(),
        workers
    );

    let sem = Arc::new(Semaphore::new(workers));
    let mut tasks: Vec<(String, JoinHandle<SubmissionRecord>)> =
        Vec::with_capacity(submissions.len());

    for located in submissions {
        let owner = located.owner().to_string();
        let ctx = Arc::clone(&ctx);
        let sem = Arc::clone(&sem);
        let task = tokio::spawn(async move {
            let _permit = sem.acquire_owned().await.ok();
            judge_submission(ctx, located).await
        });
        tasks.push((owner, task));
    }

    // Await in discovery order so the report order never depends on timing
    let mut records = Vec::with_capacity(tasks.len());
    for (owner, task) in tasks {
        let record = match task.await {
            Ok(record) => record,
            Err(e) => {
                warn!("{}: grading task failed: {}", owner, e);
                SubmissionProgress::new(owner).finish(Err(Failure::Internal {
                    stage: Stage::Extracted,
                    message: e.to_string(),
                }))
            }
        };
        records.push(record);
    }

    let summary = RunSummary::from_records(started_at, records);
    info!(
        "Run finished: {} total, {} passed, {} failed",
        summary.total, summary.passed, summary.failed
    );
    summary
}

/// Remove every owner workspace of this run, then the root if nothing else is left.
///
/// Only directories directly under the canonical work root are touched. Owners that never
/// got a workspace (allow-list names with no submission) are skipped.
pub fn cleanup_workspaces(work_root: &Path, summary: &RunSummary) {
    let root = match work_root.canonicalize() {
        Ok(root) => root,
        Err(e) => {
            debug!("Nothing to clean under {}: {}", work_root.display(), e);
            return;
        }
    };

    for record in &summary.records {
        if record.archive.is_none() || !is_valid_owner(&record.owner) {
            continue;
        }
        let Ok(dir) = root.join(&record.owner).canonicalize() else {
            continue;
        };
        if dir.parent() != Some(root.as_path()) {
            warn!(
                "Not removing {}: outside {}",
                dir.display(),
                root.display()
            );
            continue;
        }
        if let Err(e) = fs::remove_dir_all(&dir) {
            warn!("Failed to remove workspace {}: {}", dir.display(), e);
        }
    }

    let empty = fs::read_dir(&root)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if empty {
        if let Err(e) = fs::remove_dir(&root) {
            debug!("Leaving {}: {}", root.display(), e);
        }
    }
    info!("Cleaned up workspaces under {}", root.display());
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::judger::fixtures::{context, submission, FakeRunner, DOLL};

    #[tokio::test]
    async fn test_records_keep_locator_order() {
        let tmp = tempfile::tempdir().unwrap();
        let mut runner = FakeRunner::passing("Barbie\n");
        runner.delays.insert("alice".into(), Duration::from_millis(300));
        runner.delays.insert("carol".into(), Duration::from_millis(100));
        let ctx = context(tmp.path(), Arc::new(runner), None);

        let submissions = vec![
            submission(tmp.path(), "alice", &[("Doll.java", DOLL)]),
            submission(tmp.path(), "bob", &[("Doll.java", DOLL)]),
            submission(tmp.path(), "carol", &[("Doll.java", DOLL)]),
            LocatedSubmission::NotFound {
                owner: "dave".into(),
            },
        ];

        let summary = grade_all(ctx, submissions, 4).await;
        let owners: Vec<&str> = summary.records.iter().map(|r| r.owner.as_str()).collect();
        assert_eq!(owners, vec!["alice", "bob", "carol", "dave"]);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.passed, 3);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_failures_do_not_affect_siblings() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), Arc::new(FakeRunner::passing("")), None);
        let submissions = vec![
            submission(tmp.path(), "alice", &[("README.txt", "no sources")]),
            submission(tmp.path(), "bob", &[("Doll.java", DOLL)]),
        ];

        let summary = grade_all(ctx, submissions, 1).await;
        assert!(!summary.records[0].is_passed());
        assert!(summary.records[1].is_passed());
    }

    #[tokio::test]
    async fn test_empty_run() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), Arc::new(FakeRunner::passing("")), None);
        let summary = grade_all(ctx, Vec::new(), 2).await;
        assert_eq!((summary.total, summary.passed, summary.failed), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_cleanup_removes_workspaces() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), Arc::new(FakeRunner::passing("")), None);
        let work_root = ctx.work_root.clone();
        let summary = grade_all(
            ctx,
            vec![submission(tmp.path(), "alice", &[("Doll.java", DOLL)])],
            1,
        )
        .await;
        assert!(work_root.join("alice").is_dir());

        cleanup_workspaces(&work_root, &summary);
        assert!(!work_root.exists());
    }

    #[tokio::test]
    async fn test_cleanup_never_leaves_the_work_root() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), Arc::new(FakeRunner::passing("")), None);
        let work_root = ctx.work_root.clone();
        let summary = grade_all(
            ctx,
            vec![
                submission(tmp.path(), "alice", &[("Doll.java", DOLL)]),
                LocatedSubmission::NotFound { owner: "..".into() },
                LocatedSubmission::NotFound {
                    owner: outside.path().display().to_string(),
                },
            ],
            1,
        )
        .await;

        cleanup_workspaces(&work_root, &summary);
        assert!(!work_root.join("alice").exists());
        assert!(tmp.path().join("submissions").is_dir());
        assert!(tmp.path().join("default_code").is_dir());
        assert!(outside.path().is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cleanup_skips_symlinked_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("keep.txt"), "keep").unwrap();
        let ctx = context(tmp.path(), Arc::new(FakeRunner::passing("")), None);
        let work_root = ctx.work_root.clone();
        let summary = grade_all(
            ctx,
            vec![submission(tmp.path(), "alice", &[("Doll.java", DOLL)])],
            1,
        )
        .await;

        std::fs::remove_dir_all(work_root.join("alice")).unwrap();
        std::os::unix::fs::symlink(outside.path(), work_root.join("alice")).unwrap();

        cleanup_workspaces(&work_root, &summary);
        assert!(outside.path().join("keep.txt").is_file());
    }
}
