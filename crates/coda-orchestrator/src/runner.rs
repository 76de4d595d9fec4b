//! Build and test command runner
//!
//! Runs a shell command in its own process group with stderr merged into
//! stdout. The run ends on exit, on the success marker appearing in the
//! output, or on timeout. A timeout is not an error: it is reported through
//! `timed_out` and an annotation appended to the captured output.

use coda_core::{CodaError, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

/// How long to keep collecting output after the command itself exits
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How long to wait for a killed command to be reaped
const REAP_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8192;

/// Captured result of one command run
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// stdout and stderr interleaved in arrival order
    pub output: String,
    /// `None` when the command was killed or never reported a code
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub marker_seen: bool,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

/// Annotation appended to the output of a command that ran out of time
pub fn timeout_annotation(timeout: Duration) -> String {
    format!("\n[timed out after {:.1}s]", timeout.as_secs_f64())
}

/// Run `command` through `sh -c`
///
/// With `success_marker` set, the process group is killed as soon as the
/// marker shows up in the accumulated output and the output so far is
/// returned. The process group is always killed before returning, so stray
/// grandchildren (test harnesses, servers) do not outlive the run.
#[instrument(skip(cwd, success_marker), fields(timeout_secs = timeout.as_secs()))]
pub async fn run_command(
    command: &str,
    cwd: Option<&Path>,
    timeout: Duration,
    success_marker: Option<&str>,
) -> Result<CommandOutput> {
    let started = Instant::now();
    let marker = success_marker.filter(|m| !m.is_empty()).map(str::as_bytes);

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| CodaError::Process(format!("Failed to start `{}`: {}", command, e)))?;
    let mut group = ProcessGroup::new(child.id());
    debug!("Started `{}` (pid {:?})", command, child.id());

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump(stderr, tx.clone()));
    }
    drop(tx);

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut bytes: Vec<u8> = Vec::new();
    let mut exit_code: Option<i32> = None;
    let mut exited = false;
    let mut pipes_closed = false;
    let mut drain_until: Option<tokio::time::Instant> = None;
    let mut timed_out = false;
    let mut marker_seen = false;

    loop {
        let drain_deadline = drain_until.unwrap_or_else(|| tokio::time::Instant::now() + timeout);

        tokio::select! {
            chunk = rx.recv(), if !pipes_closed => match chunk {
                Some(chunk) => {
                    let searched_from = bytes.len();
                    bytes.extend_from_slice(&chunk);
                    if let Some(marker) = marker {
                        if contains_since(&bytes, marker, searched_from) {
                            marker_seen = true;
                            break;
                        }
                    }
                }
                None => {
                    pipes_closed = true;
                    if exited {
                        break;
                    }
                }
            },
            status = child.wait(), if !exited => {
                exited = true;
                exit_code = status
                    .map_err(|e| warn!("Failed to wait for `{}`: {}", command, e))
                    .ok()
                    .and_then(|s| s.code());
                if pipes_closed {
                    break;
                }
                drain_until = Some(tokio::time::Instant::now() + DRAIN_GRACE);
            },
            _ = tokio::time::sleep_until(drain_deadline), if drain_until.is_some() => {
                debug!("Stopped collecting output: pipes still open after exit");
                break;
            },
            _ = &mut deadline => {
                timed_out = !exited;
                break;
            },
        }
    }

    group.kill();
    if !exited {
        if let Err(e) = child.start_kill() {
            debug!("start_kill: {}", e);
        }
        match tokio::time::timeout(REAP_GRACE, child.wait()).await {
            Ok(Ok(status)) if !marker_seen && !timed_out => exit_code = status.code(),
            Ok(_) => {}
            Err(_) => warn!("`{}` did not exit after kill", command),
        }
    }

    while let Ok(chunk) = rx.try_recv() {
        bytes.extend_from_slice(&chunk);
    }

    let mut output = String::from_utf8_lossy(&bytes).into_owned();
    if timed_out {
        output.push_str(&timeout_annotation(timeout));
    }

    let duration = started.elapsed();
    debug!(
        "`{}` finished in {:.2}s (exit {:?}, timed out: {}, marker: {})",
        command,
        duration.as_secs_f64(),
        exit_code,
        timed_out,
        marker_seen
    );

    Ok(CommandOutput {
        output,
        exit_code,
        timed_out,
        marker_seen,
        duration,
    })
}

/// A build that needs no collaborator review
///
/// Clean means exit code zero and no diagnostic line, where a diagnostic line
/// is any line mentioning `warning` or `error` in any case.
pub fn is_clean_build(build: &CommandOutput) -> bool {
    build.success() && !has_diagnostics(&build.output)
}

/// Exit code zero and no timeout, diagnostics allowed
pub fn is_warning_only_build(build: &CommandOutput) -> bool {
    build.success() && has_diagnostics(&build.output)
}

fn has_diagnostics(output: &str) -> bool {
    output.lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.contains("warning") || line.contains("error")
    })
}

async fn pump<R>(mut reader: R, tx: mpsc::Sender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Whether `needle` occurs in `haystack` in a window that includes bytes
/// appended at or after `from`
fn contains_since(haystack: &[u8], needle: &[u8], from: usize) -> bool {
    let start = from.saturating_sub(needle.len().saturating_sub(1));
    haystack[start..]
        .windows(needle.len())
        .any(|window| window == needle)
}

/// Kills the whole process group exactly once, at the latest on drop
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_process_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}
