// src/exec.rs
//
// Runs an external command under a wall-clock deadline.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};
use tracing::warn;

/// Both streams are replaced by this marker when a command is killed.
pub const TIMEOUT_SENTINEL: &str = "TIMEOUT";

#[derive(Debug)]
pub enum CommandOutcome {
    Completed {
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },
    TimedOut,
}

impl CommandOutcome {
    pub fn timed_out(&self) -> bool {
        matches!(self, CommandOutcome::TimedOut)
    }

    pub fn into_streams(self) -> (String, String) {
        match self {
            CommandOutcome::Completed { stdout, stderr, .. } => (stdout, stderr),
            CommandOutcome::TimedOut => (TIMEOUT_SENTINEL.to_string(), TIMEOUT_SENTINEL.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pipe {
    Stdout,
    Stderr,
}

/// Spawns `command`, drains both pipes, and kills it once `timeout` elapses.
///
/// `poll` sets how often the child is checked, so enforcement is only as
/// precise as the interval. The command runs in its own process group; the
/// deadline also covers anything it forked that keeps the pipes open, and the
/// whole group is killed when it passes.
pub fn run_with_timeout(
    command: &mut Command,
    timeout: Duration,
    poll: Duration,
) -> io::Result<CommandOutcome> {
    let started = Instant::now();
    isolate(command);
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let pid = child.id();

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stderr not captured"))?;

    let (tx, rx) = bounded::<(Pipe, Vec<u8>)>(2);
    let out_tx = tx.clone();
    thread::spawn(move || {
        let _ = out_tx.send((Pipe::Stdout, drain(stdout)));
    });
    thread::spawn(move || {
        let _ = tx.send((Pipe::Stderr, drain(stderr)));
    });

    let Some(status) = wait_with_deadline(&mut child, timeout, poll)? else {
        kill_group(pid);
        return Ok(CommandOutcome::TimedOut);
    };

    match collect(&rx, timeout.saturating_sub(started.elapsed()).max(poll)) {
        Some((stdout, stderr)) => Ok(CommandOutcome::Completed {
            status,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        }),
        None => {
            warn!(pid, %status, "command exited but its output stayed open past the deadline");
            kill_group(pid);
            Ok(CommandOutcome::TimedOut)
        }
    }
}

/// Waits for `child` until `timeout`; kills and reaps it on expiry and returns `None`.
pub fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
    poll: Duration,
) -> io::Result<Option<ExitStatus>> {
    let started = Instant::now();

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }

        thread::sleep(poll.min(timeout - elapsed));
    }
}

/// Both drained streams, or `None` if they are not closed within `wait`.
fn collect(rx: &Receiver<(Pipe, Vec<u8>)>, wait: Duration) -> Option<(Vec<u8>, Vec<u8>)> {
    let deadline = Instant::now() + wait;
    let mut stdout = None;
    let mut stderr = None;

    while stdout.is_none() || stderr.is_none() {
        let left = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left).ok()? {
            (Pipe::Stdout, bytes) => stdout = Some(bytes),
            (Pipe::Stderr, bytes) => stderr = Some(bytes),
        }
    }

    Some((stdout?, stderr?))
}

fn drain(mut pipe: impl Read) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf);
    buf
}

#[cfg(unix)]
fn isolate(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn isolate(_command: &mut Command) {}

/// Kills every process left in the group led by `pid`, closing the pipes they hold.
#[cfg(unix)]
fn kill_group(pid: u32) {
    let group = format!("-{}", pid);
    let _ = Command::new("kill")
        .args(["-KILL", "--", group.as_str()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    const POLL: Duration = Duration::from_millis(20);

    #[test]
    fn captures_both_streams() {
        let outcome = run_with_timeout(
            Command::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]),
            Duration::from_secs(10),
            POLL,
        )
        .unwrap();

        match outcome {
            CommandOutcome::Completed { status, stdout, stderr } => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stdout, "out\n");
                assert_eq!(stderr, "err\n");
            }
            CommandOutcome::TimedOut => panic!("command should have completed"),
        }
    }

    #[test]
    fn kills_on_timeout_and_reports_sentinel() {
        let started = Instant::now();
        let outcome = run_with_timeout(
            Command::new("sh").args(["-c", "exec sleep 30"]),
            Duration::from_millis(200),
            POLL,
        )
        .unwrap();

        assert!(outcome.timed_out());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(
            outcome.into_streams(),
            (TIMEOUT_SENTINEL.to_string(), TIMEOUT_SENTINEL.to_string())
        );
    }

    #[test]
    fn forked_process_holding_output_does_not_outlive_deadline() {
        let started = Instant::now();
        let outcome = run_with_timeout(
            Command::new("sh").args(["-c", "sleep 6 & echo done"]),
            Duration::from_secs(1),
            POLL,
        )
        .unwrap();

        let took = started.elapsed();
        assert!(took < Duration::from_secs(3), "took {:?}", took);
        assert!(outcome.timed_out());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn timeout_kills_forked_processes_too() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());

        let outcome = run_with_timeout(
            Command::new("sh").args(["-c", script.as_str()]),
            Duration::from_millis(300),
            POLL,
        )
        .unwrap();
        assert!(outcome.timed_out());

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        let stat = format!("/proc/{}/stat", pid);
        let gone = (0..100).any(|_| {
            let alive = std::fs::read_to_string(&stat)
                .map(|s| !s.contains(") Z "))
                .unwrap_or(false);
            if alive {
                thread::sleep(Duration::from_millis(20));
            }
            !alive
        });
        assert!(gone, "forked sleep {} survived the timeout", pid);
    }

    #[test]
    fn quick_command_near_deadline_still_completes() {
        let outcome = run_with_timeout(
            Command::new("sh").args(["-c", "echo hi"]),
            Duration::from_millis(500),
            Duration::from_millis(500),
        )
        .unwrap();
        assert_eq!(outcome.into_streams().0, "hi\n");
    }

    #[test]
    fn missing_binary_is_an_error() {
        let res = run_with_timeout(
            &mut Command::new("/nonexistent/patchbench-tool"),
            Duration::from_secs(1),
            POLL,
        );
        assert!(res.is_err());
    }
}
