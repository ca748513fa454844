//! Process Runner: child processes with timeouts and bounded output.
//!
//! Every invocation returns a [`ProcessOutcome`] instead of an error. Spawn
//! failures, non-zero exits and timeouts are all ordinary failed outcomes the
//! caller branches on.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Default bound for every subprocess (five minutes).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 100_000;
/// How long pipes are drained after the child has exited or been killed.
pub const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// A command to run: program, arguments, working directory and time bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `program arg1 arg2`, for logs and diagnostics.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Structured result of a finished (or abandoned) child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed, timed out or never started.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ProcessOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: message.into(),
            exit_code: None,
            timed_out: false,
        }
    }

    /// Most useful human-readable text: stderr, falling back to stdout.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        self.stdout.trim().to_string()
    }
}

/// Seam over process execution so adapters can be driven by scripted runners.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> ProcessOutcome;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, spec: &CommandSpec) -> ProcessOutcome {
        (**self).run(spec)
    }
}

/// Runs commands on the host.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    output_limit_bytes: usize,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_LIMIT_BYTES)
    }
}

impl SystemRunner {
    pub fn new(output_limit_bytes: usize) -> Self {
        Self { output_limit_bytes }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> ProcessOutcome {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        match run_command_with_timeout(cmd, spec.timeout, self.output_limit_bytes) {
            Ok(output) => output.into_outcome(spec.timeout),
            Err(err) => {
                warn!(command = %spec.display(), err = %format!("{err:#}"), "command could not run");
                ProcessOutcome::failed(format!("{}: {err:#}", spec.display()))
            }
        }
    }
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    fn into_outcome(self, timeout: Duration) -> ProcessOutcome {
        let mut stdout = String::from_utf8_lossy(&self.stdout).into_owned();
        let mut stderr = String::from_utf8_lossy(&self.stderr).into_owned();
        if self.stdout_truncated > 0 {
            stdout.push_str(&format!(
                "\n[stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        if self.stderr_truncated > 0 {
            stderr.push_str(&format!(
                "\n[stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        if self.timed_out {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!(
                "command timed out after {} seconds",
                timeout.as_secs()
            ));
            return ProcessOutcome {
                success: false,
                stdout,
                stderr,
                exit_code: None,
                timed_out: true,
            };
        }
        ProcessOutcome {
            success: self.status.success(),
            stdout,
            stderr,
            exit_code: self.status.code(),
            timed_out: false,
        }
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
///
/// On Unix the child leads its own process group and a timeout kills the whole group. Pipes
/// still held open by an escaped descendant are drained for at most [`DRAIN_GRACE`]; whatever
/// was captured by then is returned.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (done_tx, done_rx) = mpsc::channel();
    let stdout_buf = spawn_reader(stdout, output_limit_bytes, done_tx.clone());
    let stderr_buf = spawn_reader(stderr, output_limit_bytes, done_tx);

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            kill_process_tree(&mut child);
            child.wait().context("wait command after kill")?
        }
    };

    let deadline = Instant::now() + DRAIN_GRACE;
    for _ in 0..2 {
        match done_rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(result) => result.context("read output")?,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    grace_secs = DRAIN_GRACE.as_secs(),
                    "output pipes still held open, returning partial output"
                );
                break;
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("output reader thread panicked"));
            }
        }
    }

    let Captured {
        buf: stdout,
        truncated: stdout_truncated,
    } = take_captured(&stdout_buf);
    let Captured {
        buf: stderr,
        truncated: stderr_truncated,
    } = take_captured(&stderr_buf);

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Kill the child's process group, then the child itself.
fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        match Command::new("kill")
            .args(["-9", "--", group.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => debug!(pgid = child.id(), "process group killed"),
            Ok(status) => warn!(pgid = child.id(), exit_code = ?status.code(), "kill of process group failed"),
            Err(err) => warn!(pgid = child.id(), err = %err, "could not invoke kill"),
        }
    }
    if let Err(err) = child.kill() {
        debug!(err = %err, "direct kill failed");
    }
}

#[derive(Debug, Default)]
struct Captured {
    buf: Vec<u8>,
    truncated: usize,
}

type SharedCapture = Arc<Mutex<Captured>>;

fn spawn_reader<R: Read + Send + 'static>(
    reader: R,
    limit: usize,
    done: mpsc::Sender<Result<()>>,
) -> SharedCapture {
    let captured = SharedCapture::default();
    let sink = Arc::clone(&captured);
    thread::spawn(move || {
        let result = read_stream_limited(reader, limit, &sink);
        // The receiver is gone once the drain grace has passed.
        let _ = done.send(result);
    });
    captured
}

fn take_captured(captured: &SharedCapture) -> Captured {
    let mut guard = captured
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    std::mem::take(&mut *guard)
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize, sink: &SharedCapture) -> Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let mut captured = sink
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let remaining = limit.saturating_sub(captured.buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            captured.buf.extend_from_slice(&chunk[..keep]);
            captured.truncated += n.saturating_sub(keep);
        } else {
            captured.truncated += n;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec = CommandSpec::new("sh", ["-c", "echo hello; echo oops >&2; exit 3"])
            .cwd(temp.path())
            .timeout(Duration::from_secs(10));
        let outcome = SystemRunner::default().run(&spec);

        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.stdout.trim(), "hello");
        assert_eq!(outcome.diagnostic(), "oops");
        assert!(!outcome.timed_out);
    }

    #[test]
    fn timeout_becomes_failed_outcome() {
        let spec = CommandSpec::new("sh", ["-c", "sleep 5"]).timeout(Duration::from_millis(200));
        let outcome = SystemRunner::default().run(&spec);

        assert!(!outcome.success);
        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_code, None);
        assert!(outcome.stderr.contains("timed out"));
    }

    /// A background grandchild holding the pipes is killed with the group.
    #[test]
    fn timeout_kills_background_descendants() {
        let spec = CommandSpec::new("sh", ["-c", "sleep 6 & wait"]).timeout(Duration::from_millis(300));
        let started = Instant::now();
        let outcome = SystemRunner::default().run(&spec);

        assert!(outcome.timed_out);
        assert!(!outcome.success);
        assert!(
            started.elapsed() < Duration::from_secs(2) + DRAIN_GRACE,
            "took {:?}",
            started.elapsed()
        );
    }

    /// A descendant that outlives a successful child cannot hold the call open.
    #[test]
    fn escaped_descendant_does_not_block_after_exit() {
        let spec = CommandSpec::new("sh", ["-c", "(sleep 6 &); echo started"])
            .timeout(Duration::from_secs(30));
        let started = Instant::now();
        let outcome = SystemRunner::default().run(&spec);

        assert!(outcome.success);
        assert_eq!(outcome.stdout.trim(), "started");
        assert!(
            started.elapsed() < Duration::from_secs(2) + DRAIN_GRACE,
            "took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn missing_program_becomes_failed_outcome() {
        let spec = CommandSpec::new("definitely-not-a-real-program-4821", Vec::<String>::new());
        let outcome = SystemRunner::default().run(&spec);

        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, None);
        assert!(outcome.diagnostic().contains("definitely-not-a-real-program-4821"));
    }

    #[test]
    fn output_beyond_limit_is_truncated() {
        let spec = CommandSpec::new("sh", ["-c", "printf 'abcdefghij'"]);
        let outcome = SystemRunner::new(4).run(&spec);

        assert!(outcome.success);
        assert!(outcome.stdout.starts_with("abcd"));
        assert!(outcome.stdout.contains("[stdout truncated 6 bytes]"));
    }
}
