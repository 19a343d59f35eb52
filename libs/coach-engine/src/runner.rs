/// Process Runner - Sandboxed Python Execution
///
/// **Core Responsibility:**
/// Run one program in a child process, feed it input, enforce a deadline,
/// and report a raw `ExecutionOutcome`.
///
/// **Sandbox Rules:**
/// 1. Fresh temporary working directory, removed afterwards
/// 2. Cleared environment, isolated interpreter mode (`-I`)
/// 3. Own process group, so the whole tree can be killed at once
/// 4. Resource limits applied before exec (core dumps, file size, memory)
/// 5. stdin written in full and then closed
/// 6. stdout/stderr captured separately, each capped
///
/// **Cleanup Guarantee:**
/// Every process of the run is killed on every exit path: normal exit,
/// deadline, caller cancellation, and the runner future being dropped.
/// Processes that left the group are found by `sweep`.
///
/// **Boundary:**
/// The runner does not explain anything. It only decides `Busy` vs
/// `WaitingForInput` for timeouts, via `probe`.

use crate::error::SandboxError;
use crate::probe::{self, TimeoutSignals};
use crate::sweep::{self, SANDBOX_MARKER_VAR};
use coach_common::config::SandboxConfig;
use coach_common::types::{ExecutionOutcome, ExecutionRequest, TimeoutKind};
use std::collections::{HashSet, VecDeque};
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const MAX_FILE_SIZE_BYTES: u64 = 16 * 1024 * 1024;
const READ_CHUNK_BYTES: usize = 8192;

/// Upper bound on stop-and-rescan passes when sweeping a run's processes
const MAX_SWEEP_ROUNDS: usize = 8;

/// How long to wait for output pipes to drain once the group is dead
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How long to wait for the kernel to let us reap a SIGKILLed leader
const REAP_GRACE: Duration = Duration::from_secs(2);

pub struct ProcessRunner {
    config: SandboxConfig,
}

/// How the wait on the child ended
enum Finish {
    Exited(ExitStatus),
    TimedOut(TimeoutKind),
}

impl ProcessRunner {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn build_command(&self, code: &str, workdir: &Path, marker: &str) -> Command {
        let mut cmd = Command::new(&self.config.python_bin);
        cmd.arg("-I")
            .arg("-c")
            .arg(code)
            .current_dir(workdir)
            .env_clear()
            .env("PATH", SANDBOX_PATH)
            .env("HOME", workdir)
            .env("LANG", "C.UTF-8")
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env(SANDBOX_MARKER_VAR, marker)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            cmd.process_group(0);
            apply_resource_limits(&mut cmd, self.config.memory_limit_mb);
        }

        cmd
    }

    /// Execute a request to completion, deadline, or cancellation.
    ///
    /// ## Returns
    /// - `Ok(outcome)` for success, user-code failure and timeouts
    /// - `Err(SandboxError)` when the sandbox itself failed or the caller
    ///   cancelled; no process from this run is alive either way
    pub async fn run(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let workdir = tempfile::Builder::new()
            .prefix("codecoach-")
            .tempdir()
            .map_err(SandboxError::Workspace)?;

        let marker = Uuid::new_v4().to_string();
        let mut child = self
            .build_command(&request.code, workdir.path(), &marker)
            .spawn()
            .map_err(|source| SandboxError::Spawn {
                program: self.config.python_bin.clone(),
                source,
            })?;

        let start = Instant::now();
        let pid = child.id().ok_or(SandboxError::MissingPid)?;
        let mut group = SandboxGuard::new(pid, marker);

        info!(
            pid = pid,
            timeout_s = request.timeout_seconds(),
            stdin_bytes = request.stdin.len(),
            source_bytes = request.code.len(),
            "Sandbox started"
        );

        let stdin_delivered = Arc::new(AtomicBool::new(false));
        let writer = spawn_stdin_writer(&mut child, request.stdin.clone(), stdin_delivered.clone());
        let cap = self.config.max_output_bytes;
        let mut stdout_reader = spawn_capture(child.stdout.take(), cap, Keep::Head);
        // The final exception line is at the end, so stderr keeps its tail
        let mut stderr_reader = spawn_capture(child.stderr.take(), cap, Keep::Tail);

        let deadline = start + request.timeout();

        let finish = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Finish::Exited(status),
                Err(e) => {
                    group.kill();
                    return Err(SandboxError::Wait(e));
                }
            },
            _ = tokio::time::sleep_until(deadline) => {
                // Sample before killing; a dead process has nothing to say
                let signals = TimeoutSignals {
                    reads_input: probe::reads_input(&request.code),
                    stdin_delivered: stdin_delivered.load(Ordering::Acquire),
                    sample: probe::sample_process(pid),
                    elapsed: start.elapsed(),
                };
                let kind = probe::classify_timeout(&signals);

                warn!(
                    pid = pid,
                    timeout_kind = %kind,
                    stdin_delivered = signals.stdin_delivered,
                    cpu_seconds = signals.sample.map(|s| s.cpu_seconds),
                    "Execution timed out - killing process group"
                );

                group.kill();
                reap(&mut child, pid).await;
                Finish::TimedOut(kind)
            }
            _ = cancel.cancelled() => {
                warn!(pid = pid, "Execution cancelled - killing process group");
                group.kill();
                reap(&mut child, pid).await;
                if let Some(writer) = writer {
                    writer.abort();
                }
                stdout_reader.abort();
                stderr_reader.abort();
                return Err(SandboxError::Cancelled);
            }
        };

        // Descendants may outlive a leader that exited normally
        if matches!(finish, Finish::Exited(_)) {
            group.leader_reaped();
        }
        group.kill();

        let stdout = collect(&mut stdout_reader, "stdout").await;
        let stderr = collect(&mut stderr_reader, "stderr").await;
        if let Some(writer) = writer {
            writer.abort();
        }

        let elapsed_seconds = start.elapsed().as_secs_f64();
        let truncated = stdout.truncated || stderr.truncated;

        let outcome = match finish {
            Finish::Exited(status) if status.success() => {
                ExecutionOutcome::success(stdout.text, stderr.text, elapsed_seconds)
            }
            Finish::Exited(status) => {
                let raw_error = extract_raw_error(&stderr.text).unwrap_or_else(|| describe_exit(status));
                ExecutionOutcome::failure(raw_error, stderr.text, status.code(), elapsed_seconds, TimeoutKind::None)
            }
            Finish::TimedOut(kind) => ExecutionOutcome::failure(
                timeout_message(kind, request.timeout_seconds()),
                stderr.text,
                None,
                elapsed_seconds,
                kind,
            ),
        }
        .with_truncation(truncated);

        debug!(
            pid = pid,
            status = %outcome.status,
            exit_code = ?outcome.exit_code,
            elapsed_ms = (elapsed_seconds * 1000.0) as u64,
            truncated = truncated,
            "Sandbox finished"
        );

        Ok(outcome)
    }
}

/// Kills everything a run started exactly once, at the latest on drop.
/// Dropping covers panics and futures cancelled mid-await.
struct SandboxGuard {
    pgid: u32,
    marker: String,
    leader_alive: bool,
    killed: bool,
}

impl SandboxGuard {
    fn new(pgid: u32, marker: String) -> Self {
        Self {
            pgid,
            marker,
            leader_alive: true,
            killed: false,
        }
    }

    /// The leader pid was reaped and may be reused; stop following it
    fn leader_reaped(&mut self) {
        self.leader_alive = false;
    }

    fn kill(&mut self) {
        if !self.killed {
            let leader = self.leader_alive.then_some(self.pgid);
            kill_sandbox(self.pgid, leader, &self.marker);
            self.killed = true;
        }
    }
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Stop every process of the run, then kill the group and the stopped set.
/// Stopped processes cannot fork, so repeated sweeps converge.
#[cfg(unix)]
fn kill_sandbox(pgid: u32, leader: Option<u32>, marker: &str) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let mut stopped = HashSet::new();
    for _ in 0..MAX_SWEEP_ROUNDS {
        let fresh: Vec<u32> = sweep::sandbox_processes(leader, marker)
            .into_iter()
            .filter(|pid| !stopped.contains(pid))
            .collect();
        if fresh.is_empty() {
            break;
        }
        for pid in fresh {
            signal_process(pid, Signal::SIGSTOP);
            stopped.insert(pid);
        }
    }

    match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pgid = pgid, error = %e, "Failed to kill sandbox process group"),
    }

    if !stopped.is_empty() {
        debug!(pgid = pgid, processes = stopped.len(), "Killing sandbox processes found by sweep");
    }
    for pid in stopped {
        signal_process(pid, Signal::SIGKILL);
    }
}

#[cfg(unix)]
fn signal_process(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pid = pid, signal = ?signal, error = %e, "Failed to signal sandbox process"),
    }
}

#[cfg(not(unix))]
fn kill_sandbox(_pgid: u32, _leader: Option<u32>, _marker: &str) {
    // kill_on_drop still takes the leader down; there is no group to signal
}

#[cfg(unix)]
fn apply_resource_limits(cmd: &mut Command, memory_limit_mb: u64) {
    use nix::sys::resource::{setrlimit, Resource};

    let memory_bytes = memory_limit_mb.saturating_mul(1024 * 1024);

    // SAFETY: runs between fork and exec and only calls setrlimit, which is
    // async-signal-safe; nothing is allocated or locked.
    unsafe {
        cmd.pre_exec(move || {
            setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
            setrlimit(Resource::RLIMIT_FSIZE, MAX_FILE_SIZE_BYTES, MAX_FILE_SIZE_BYTES)?;
            if memory_bytes > 0 {
                setrlimit(Resource::RLIMIT_AS, memory_bytes, memory_bytes)?;
            }
            Ok(())
        });
    }
}

async fn reap(child: &mut Child, pid: u32) {
    match tokio::time::timeout(REAP_GRACE, child.wait()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!(pid = pid, error = %e, "Failed to reap sandbox process"),
        Err(_) => warn!(pid = pid, "Sandbox process not reaped after SIGKILL"),
    }
}

fn spawn_stdin_writer(child: &mut Child, input: String, delivered: Arc<AtomicBool>) -> Option<JoinHandle<()>> {
    let mut stdin = child.stdin.take()?;

    Some(tokio::spawn(async move {
        if !input.is_empty() {
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                // The program exited or closed stdin without reading everything
                debug!(error = %e, "Sandbox stopped accepting stdin");
                return;
            }
        }
        // Closing the pipe turns further reads into end-of-input
        drop(stdin);
        delivered.store(true, Ordering::Release);
    }))
}

#[derive(Debug, Default)]
struct Captured {
    text: String,
    truncated: bool,
}

/// Which end of an over-long stream survives the cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keep {
    Head,
    Tail,
}

fn spawn_capture<R>(pipe: Option<R>, cap: usize, keep: Keep) -> JoinHandle<io::Result<Captured>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        match pipe {
            Some(pipe) => read_capped(pipe, cap, keep).await,
            None => Ok(Captured::default()),
        }
    })
}

/// Read a stream to its end, keeping at most `cap` bytes from the chosen
/// end. Everything is read so the writer never blocks on a full pipe.
async fn read_capped<R>(mut reader: R, cap: usize, keep: Keep) -> io::Result<Captured>
where
    R: AsyncRead + Unpin,
{
    let mut kept: VecDeque<u8> = VecDeque::new();
    let mut truncated = false;
    let mut buf = vec![0u8; READ_CHUNK_BYTES];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        match keep {
            Keep::Head => {
                let room = cap.saturating_sub(kept.len());
                kept.extend(&buf[..n.min(room)]);
                if n > room {
                    truncated = true;
                }
            }
            Keep::Tail => {
                kept.extend(&buf[..n]);
                if kept.len() > cap {
                    let excess = kept.len() - cap;
                    kept.drain(..excess);
                    truncated = true;
                }
            }
        }
    }

    let bytes = kept.make_contiguous();
    Ok(Captured {
        text: String::from_utf8_lossy(bytes).into_owned(),
        truncated,
    })
}

async fn collect(handle: &mut JoinHandle<io::Result<Captured>>, stream: &'static str) -> Captured {
    match tokio::time::timeout(PIPE_DRAIN_GRACE, &mut *handle).await {
        Ok(Ok(Ok(captured))) => captured,
        Ok(Ok(Err(e))) => {
            warn!(stream = stream, error = %e, "Failed to read sandbox output");
            Captured::default()
        }
        Ok(Err(e)) => {
            warn!(stream = stream, error = %e, "Output reader task failed");
            Captured::default()
        }
        Err(_) => {
            // Something outside the group still holds the pipe open
            warn!(stream = stream, "Output pipe still open after process group was killed");
            handle.abort();
            Captured::default()
        }
    }
}

/// The last non-empty stderr line, i.e. the final exception line of a traceback
pub fn extract_raw_error(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

fn describe_exit(status: ExitStatus) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("Process terminated by signal {}", signal);
        }
    }

    match status.code() {
        Some(code) => format!("Process exited with status {}", code),
        None => "Process exited abnormally".to_string(),
    }
}

pub fn timeout_message(kind: TimeoutKind, timeout_seconds: u64) -> String {
    match kind {
        TimeoutKind::WaitingForInput => format!(
            "Your code is waiting for input, but no more input was provided (timed out after {} seconds).",
            timeout_seconds
        ),
        _ => format!("Execution timed out after {} seconds", timeout_seconds),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_raw_error_takes_final_line() {
        let traceback = "Traceback (most recent call last):\n  File \"<string>\", line 1, in <module>\nZeroDivisionError: division by zero\n\n";
        assert_eq!(
            extract_raw_error(traceback).as_deref(),
            Some("ZeroDivisionError: division by zero")
        );
    }

    #[test]
    fn test_extract_raw_error_empty() {
        assert_eq!(extract_raw_error(""), None);
        assert_eq!(extract_raw_error("\n  \n"), None);
    }

    #[test]
    fn test_timeout_messages_differ_by_kind() {
        assert_eq!(timeout_message(TimeoutKind::Busy, 3), "Execution timed out after 3 seconds");
        assert!(timeout_message(TimeoutKind::WaitingForInput, 3).contains("waiting for input"));
    }

    #[tokio::test]
    async fn test_read_capped_truncates_and_drains() {
        let data = vec![b'x'; 20_000];
        let captured = read_capped(&data[..], 1024, Keep::Head).await.unwrap();
        assert_eq!(captured.text.len(), 1024);
        assert!(captured.truncated);

        let captured = read_capped(&b"short"[..], 1024, Keep::Tail).await.unwrap();
        assert_eq!(captured.text, "short");
        assert!(!captured.truncated);
    }

    #[tokio::test]
    async fn test_read_capped_tail_keeps_final_line() {
        let mut data = Vec::new();
        for i in 0..5000 {
            data.extend_from_slice(format!("debug {}\n", i).as_bytes());
        }
        data.extend_from_slice(b"Traceback (most recent call last):\nZeroDivisionError: division by zero\n");

        let captured = read_capped(&data[..], 1024, Keep::Tail).await.unwrap();
        assert_eq!(captured.text.len(), 1024);
        assert!(captured.truncated);
        assert_eq!(
            extract_raw_error(&captured.text).as_deref(),
            Some("ZeroDivisionError: division by zero")
        );
    }
}
