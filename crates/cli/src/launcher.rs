#![forbid(unsafe_code)]
//! Child-process launcher: runs a shell command with a hard timeout and
//! captures its output.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const WAIT_SLICE: Duration = Duration::from_millis(50);

/// How long to wait for the pipe readers after the child is gone. A killed
/// `sh` can leave grandchildren holding the pipes open indefinitely; past
/// this grace we snapshot whatever arrived and abandon the reader threads.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Exit code reported when the child died to a signal or was killed on
/// timeout; shells use the same convention for "no exit status".
const NO_EXIT_CODE: i32 = -1;

#[derive(Clone, Debug)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

fn spawn_reader<R: Read + Send + 'static>(
    mut reader: R,
    buffer: Arc<Mutex<Vec<u8>>>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut buffer) = buffer.lock() {
                        buffer.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    })
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> std::io::Result<Option<i32>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status.code().unwrap_or(NO_EXIT_CODE)));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(WAIT_SLICE);
    }
}

fn settle_reader(handle: Option<JoinHandle<()>>, deadline: Instant) {
    let Some(handle) = handle else {
        return;
    };
    while !handle.is_finished() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    if handle.is_finished() {
        let _ = handle.join();
    }
    // Otherwise a straggling grandchild still owns the pipe; the detached
    // thread exits on its own when the pipe finally closes.
}

fn snapshot(buffer: &Arc<Mutex<Vec<u8>>>) -> String {
    match buffer.lock() {
        Ok(buffer) => String::from_utf8_lossy(&buffer).into_owned(),
        Err(_) => String::new(),
    }
}

/// Executes `command` via `sh -c` and waits up to `timeout`. On timeout the
/// child is killed and the outcome is flagged; whatever output was produced
/// before the kill is still returned.
pub fn run(command: &str, timeout: Duration) -> std::io::Result<ExecOutcome> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // Pipes are drained on their own threads so a chatty child can never
    // fill a pipe buffer and wedge against our wait loop.
    let stdout_buffer = Arc::new(Mutex::new(Vec::new()));
    let stderr_buffer = Arc::new(Mutex::new(Vec::new()));
    let stdout_handle = child
        .stdout
        .take()
        .map(|pipe| spawn_reader(pipe, Arc::clone(&stdout_buffer)));
    let stderr_handle = child
        .stderr
        .take()
        .map(|pipe| spawn_reader(pipe, Arc::clone(&stderr_buffer)));

    let exit = wait_with_deadline(&mut child, timeout)?;

    let drain_deadline = Instant::now() + DRAIN_GRACE;
    settle_reader(stdout_handle, drain_deadline);
    settle_reader(stderr_handle, drain_deadline);

    let stdout = snapshot(&stdout_buffer);
    let stderr = snapshot(&stderr_buffer);

    Ok(match exit {
        Some(exit_code) => ExecOutcome {
            exit_code,
            stdout,
            stderr,
            timed_out: false,
        },
        None => ExecOutcome {
            exit_code: NO_EXIT_CODE,
            stdout,
            stderr,
            timed_out: true,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_command_reports_exit_zero_and_stdout() {
        let outcome = run("echo hello", Duration::from_secs(5)).expect("run");
        assert_eq!(outcome.exit_code, 0);
        assert!(!outcome.timed_out);
        assert_eq!(outcome.stdout.trim(), "hello");
    }

    #[test]
    fn failing_command_reports_exit_code_and_stderr() {
        let outcome = run("echo oops >&2; exit 3", Duration::from_secs(5)).expect("run");
        assert_eq!(outcome.exit_code, 3);
        assert!(!outcome.timed_out);
        assert_eq!(outcome.stderr.trim(), "oops");
    }

    #[test]
    fn slow_command_is_killed_on_timeout() {
        let started = Instant::now();
        let outcome = run("sleep 30", Duration::from_millis(300)).expect("run");
        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_code, -1);
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "the child must not be waited to completion"
        );
    }

    #[test]
    fn output_before_timeout_is_preserved() {
        let outcome = run("echo partial; sleep 30", Duration::from_millis(300)).expect("run");
        assert!(outcome.timed_out);
        assert_eq!(outcome.stdout.trim(), "partial");
    }
}
