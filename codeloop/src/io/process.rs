//! Child-process execution with a hard wall clock and bounded output capture.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::cancel::CancelToken;

/// How often the wait loop wakes to check the deadline and the cancel token.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    /// The deadline elapsed and the child was killed.
    pub timed_out: bool,
    /// The cancel token fired and the child was killed.
    pub cancelled: bool,
}

/// Run `cmd`, killing it when `timeout` elapses or `cancel` fires.
///
/// Output is drained concurrently while the child runs so pipes cannot fill;
/// `output_limit_bytes` bounds what is kept in memory per stream (bytes
/// beyond this are discarded while still draining the pipe).
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: &CancelToken,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = cmd.spawn().context("spawn command")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let deadline = Instant::now() + timeout;
    let mut timed_out = false;
    let mut cancelled = false;
    let status = loop {
        if let Some(status) = child.wait_timeout(WAIT_SLICE).context("wait for command")? {
            break status;
        }
        if cancel.is_cancelled() {
            warn!("command cancelled, killing");
            cancelled = true;
        } else if Instant::now() >= deadline {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
        } else {
            continue;
        }
        child.kill().context("kill command")?;
        break child.wait().context("wait command after kill")?;
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, cancelled, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        cancelled,
    })
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_exit_status() {
        let output = run_command_with_timeout(
            sh("echo hello"),
            Duration::from_secs(5),
            1000,
            &CancelToken::new(),
        )
        .expect("run");

        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout), "hello\n");
        assert!(!output.timed_out);
        assert!(!output.cancelled);
    }

    #[test]
    fn kills_the_child_when_the_deadline_elapses() {
        let start = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 5"),
            Duration::from_millis(200),
            1000,
            &CancelToken::new(),
        )
        .expect("run");

        assert!(output.timed_out);
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn kills_the_child_when_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let start = Instant::now();
        let output =
            run_command_with_timeout(sh("sleep 5"), Duration::from_secs(30), 1000, &cancel)
                .expect("run");

        assert!(output.cancelled);
        assert!(!output.timed_out);
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn bounds_captured_output() {
        let output = run_command_with_timeout(
            sh("yes x | head -c 10000"),
            Duration::from_secs(5),
            100,
            &CancelToken::new(),
        )
        .expect("run");

        assert_eq!(output.stdout.len(), 100);
        assert!(output.stdout_truncated > 0);
    }
}
