//! Process runner implementation
//!
//! Runs an external tool directly on the host. Each child leads its own process group so
//! the whole tree can be killed at once, both when the deadline passes and after a normal
//! exit (programs that fork background helpers must not outlive their stage).

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{CommandSpec, RunLimits, RunOutcome, RunStatus, Runner};

/// How long to wait for the output readers once the process is gone
const READER_GRACE: Duration = Duration::from_secs(2);

/// Runner that spawns host processes under a wall-clock deadline
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec, limits: &RunLimits) -> Result<RunOutcome> {
        if spec.program.is_empty() {
            anyhow::bail!("No command specified for execution");
        }
        debug!("Running {:?} in {:?}", spec.to_vec(), spec.work_dir);

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);
        if let Some(dir) = &spec.work_dir {
            cmd.current_dir(dir);
        }

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn `{}`", spec.program))?;
        let group = child.id().map(|id| Pid::from_raw(id as i32));

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;
        let stdout_handle = tokio::spawn(read_stream_limited(stdout, limits.output_limit));
        let stderr_handle = tokio::spawn(read_stream_limited(stderr, limits.output_limit));

        let waited = tokio::time::timeout(limits.timeout, child.wait()).await;

        // Sweep the group either way: the whole tree on timeout, leftovers otherwise
        if let Some(group) = group {
            kill_group(group);
        }

        let status = match waited {
            Ok(status) => status_of(status.context("Failed to wait for process")?),
            Err(_) => {
                warn!(
                    "{} exceeded {}ms, killed",
                    spec.program,
                    limits.timeout.as_millis()
                );
                if let Err(e) = child.kill().await {
                    debug!("kill after timeout: {}", e);
                }
                RunStatus::TimedOut
            }
        };
        let elapsed = started.elapsed();

        let (stdout, stdout_truncated) = join_output(stdout_handle, "stdout").await;
        let (stderr, stderr_truncated) = join_output(stderr_handle, "stderr").await;
        if stdout_truncated > 0 || stderr_truncated > 0 {
            warn!(
                "{} output truncated (stdout: {} bytes, stderr: {} bytes dropped)",
                spec.program, stdout_truncated, stderr_truncated
            );
        }

        debug!("{} finished: {:?} in {:?}", spec.program, status, elapsed);
        Ok(RunOutcome {
            status,
            stdout,
            stderr,
            elapsed,
        })
    }
}

fn status_of(status: ExitStatus) -> RunStatus {
    match (status.code(), status.signal()) {
        (Some(code), _) => RunStatus::Exited(code),
        (None, Some(sig)) => RunStatus::Signaled(sig),
        (None, None) => RunStatus::Exited(-1),
    }
}

fn kill_group(group: Pid) {
    match killpg(group, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", group, e),
    }
}

async fn read_stream_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
) -> io::Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        let keep = n.min(remaining);
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}

async fn join_output(
    mut handle: JoinHandle<io::Result<(Vec<u8>, usize)>>,
    stream: &str,
) -> (String, usize) {
    match tokio::time::timeout(READER_GRACE, &mut handle).await {
        Ok(Ok(Ok((buf, truncated)))) => (String::from_utf8_lossy(&buf).into_owned(), truncated),
        Ok(Ok(Err(e))) => {
            warn!("Failed to read {}: {}", stream, e);
            (String::new(), 0)
        }
        Ok(Err(e)) => {
            warn!("{} reader task failed: {}", stream, e);
            (String::new(), 0)
        }
        Err(_) => {
            // Something outside the group still holds the pipe open
            warn!("{} still open after the process exited, giving up", stream);
            handle.abort();
            (String::new(), 0)
        }
    }
}
