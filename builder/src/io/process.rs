//! Child process execution with a wall-clock timeout and bounded output capture.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long to wait for the output pipes to close once the child is gone.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Bytes captured from one output stream.
#[derive(Debug, Default)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// Bytes drained from the pipe but not kept.
    pub truncated: usize,
}

impl Captured {
    pub fn lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// The last `max_chars` characters, for error messages.
    pub fn tail(&self, max_chars: usize) -> String {
        let text = self.lossy();
        let trimmed = text.trim_end();
        let count = trimmed.chars().count();
        if count <= max_chars {
            return trimmed.to_string();
        }
        trimmed.chars().skip(count - max_chars).collect()
    }

    fn truncated_notice(&self, label: &str) -> String {
        if self.truncated > 0 {
            format!("\n[{label} truncated {} bytes]\n", self.truncated)
        } else {
            String::new()
        }
    }
}

/// Outcome of a finished (or killed) child process.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

impl ProcessOutput {
    /// Render stdout/stderr as a log document with truncation notices.
    pub fn render_log(&self) -> String {
        let mut buf = String::new();
        buf.push_str("=== stdout ===\n");
        buf.push_str(&self.stdout.lossy());
        buf.push_str(&self.stdout.truncated_notice("stdout"));
        buf.push_str("\n=== stderr ===\n");
        buf.push_str(&self.stderr.lossy());
        buf.push_str(&self.stderr.truncated_notice("stderr"));
        if self.timed_out {
            buf.push_str("\n[process timed out]\n");
        }
        buf
    }
}

/// Run `cmd`, feeding `stdin`, killing it after `timeout`.
///
/// stdin is written and both output pipes are drained on their own threads so
/// a chatty child can't deadlock against a full pipe. At most
/// `output_limit_bytes` per stream are kept in memory.
///
/// On unix the child leads its own process group and a timeout kills the whole
/// group. Output still held open by a stray descendant is abandoned after a
/// short grace period, so the call never outlives `timeout` by much.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_with_timeout(
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<ProcessOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
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

    let stdin_handle = match stdin {
        Some(input) => {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            Some(thread::spawn(move || -> std::io::Result<()> {
                pipe.write_all(&input)?;
                // Dropping the pipe closes the child's stdin.
                Ok(())
            }))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_rx = spawn_reader(stdout, output_limit_bytes);
    let stderr_rx = spawn_reader(stderr, output_limit_bytes);

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            kill_process_group(&child);
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    // A killed child may leave a descendant blocked on stdin; don't wait on it.
    if let Some(handle) = stdin_handle.filter(|_| !timed_out) {
        match handle.join() {
            // A child that exits without reading all input closes the pipe early.
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!("child closed stdin before reading all input");
            }
            Ok(result) => result.context("write stdin")?,
            Err(_) => return Err(anyhow!("stdin writer thread panicked")),
        }
    }

    let stdout = collect_reader(&stdout_rx, "stdout").context("join stdout")?;
    let stderr = collect_reader(&stderr_rx, "stderr").context("join stderr")?;

    if stdout.truncated > 0 || stderr.truncated > 0 {
        warn!(
            stdout_truncated = stdout.truncated,
            stderr_truncated = stderr.truncated,
            "output truncated"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> Receiver<Result<Captured>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(drain_limited(reader, limit));
    });
    rx
}

fn collect_reader(rx: &Receiver<Result<Captured>>, stream: &'static str) -> Result<Captured> {
    match rx.recv_timeout(READER_GRACE) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!(stream, "output pipe still open after exit, abandoning reader");
            Ok(Captured::default())
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Kill every process in the child's group. The child's pid is the group id.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let group = format!("-{}", child.id());
    match Command::new("kill")
        .args(["-KILL", "--", &group])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => debug!(pgid = child.id(), "killed process group"),
        Ok(status) => warn!(pgid = child.id(), code = ?status.code(), "kill of process group failed"),
        Err(e) => warn!(pgid = child.id(), err = %e, "failed to run kill for process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

fn drain_limited<R: Read>(mut reader: R, limit: usize) -> Result<Captured> {
    let mut captured = Captured::default();
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(captured.bytes.len());
        let keep = n.min(remaining);
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.truncated += n - keep;
    }

    Ok(captured)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_stdin() {
        let output = run_with_timeout(
            sh("cat; echo oops >&2"),
            Some(b"hello".to_vec()),
            Duration::from_secs(10),
            1024,
        )
        .expect("run");
        assert!(output.status.success());
        assert_eq!(output.stdout.lossy(), "hello");
        assert_eq!(output.stderr.tail(100), "oops");
        assert!(!output.timed_out);
    }

    #[test]
    fn truncates_beyond_limit() {
        let output = run_with_timeout(
            sh("printf '0123456789'"),
            None,
            Duration::from_secs(10),
            4,
        )
        .expect("run");
        assert_eq!(output.stdout.lossy(), "0123");
        assert_eq!(output.stdout.truncated, 6);
        assert!(output.render_log().contains("[stdout truncated 6 bytes]"));
    }

    #[test]
    fn kills_on_timeout() {
        let output = run_with_timeout(sh("sleep 5"), None, Duration::from_millis(200), 1024)
            .expect("run");
        assert!(output.timed_out);
        assert!(!output.status.success());
    }

    #[test]
    fn timeout_kills_grandchildren_holding_the_pipes() {
        let started = std::time::Instant::now();
        let output = run_with_timeout(
            sh("sleep 8; echo done"),
            None,
            Duration::from_millis(300),
            1024,
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!output.stdout.lossy().contains("done"));
    }

    #[test]
    fn background_descendant_does_not_hold_up_a_finished_child() {
        let started = std::time::Instant::now();
        let output = run_with_timeout(
            sh("sleep 8 & echo started"),
            None,
            Duration::from_secs(30),
            1024,
        )
        .expect("run");
        assert!(output.status.success());
        assert!(!output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn tail_keeps_last_characters() {
        let captured = Captured {
            bytes: b"first line\nlast line\n".to_vec(),
            truncated: 0,
        };
        assert_eq!(captured.tail(9), "last line");
    }
}
