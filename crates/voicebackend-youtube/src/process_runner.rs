//! Spawns a child process, drains its stdout/stderr on dedicated reader
//! threads, and polls for completion/cancellation/timeout rather than
//! issuing a single blocking wait. A verbose child (the metadata dump in
//! particular) can deadlock a blocking wait against a full pipe buffer.

use crate::error::{PipelineError, ProcessFailureDetails};
use crate::job::CancelHandle;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use voicebackend_common::{log_capture_max_chars, monotonic_secs, truncate_text};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const KILL_GRACE: Duration = Duration::from_secs(5);

pub struct ProcessRunner;

/// Runs `program args...`, returning `(stdout, stderr)` on a zero exit code.
/// Attach/detach hooks are modeled as `cancel.attach`/`cancel.detach`,
/// called before the drain loop and on every exit path.
impl ProcessRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        program: &str,
        args: &[String],
        failure_code: &'static str,
        failure_message: &str,
        timeout_sec: u64,
        cancel: &CancelHandle,
    ) -> Result<(String, String), PipelineError> {
        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut full_command = vec![program.to_string()];
        full_command.extend(args.iter().cloned());

        let mut child = command.spawn().map_err(|e| {
            PipelineError::new(failure_code, format!("{failure_message} Failed to spawn: {e}"))
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_buf = spawn_drain_thread(stdout);
        let stderr_buf = spawn_drain_thread(stderr);

        cancel.attach(child);
        // `cancel` no longer owns a live `Child` reference from here on; it
        // was moved into the handle. All further interaction with the
        // process goes through `cancel`'s own try_wait/kill helpers.
        let start = monotonic_secs();

        let result = loop {
            if cancel.is_cancelled() {
                cancel.kill_attached(KILL_GRACE);
                break Err(PipelineError::job_cancelled());
            }

            if monotonic_secs() - start > timeout_sec as f64 {
                cancel.kill_attached(KILL_GRACE);
                break Err(timeout_failure(
                    failure_code,
                    failure_message,
                    timeout_sec,
                    &full_command,
                    &stdout_buf,
                    &stderr_buf,
                ));
            }

            match cancel.try_wait_attached() {
                Ok(Some(status)) => {
                    break exit_result(status, failure_code, failure_message, &full_command, &stdout_buf, &stderr_buf);
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    break Err(PipelineError::new(
                        failure_code,
                        format!("{failure_message} wait failed: {e}"),
                    ));
                }
            }
        };

        cancel.detach();
        result
    }
}

fn spawn_drain_thread(pipe: Option<impl Read + Send + 'static>) -> Arc<Mutex<Vec<u8>>> {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let Some(mut pipe) = pipe else {
        return buf;
    };
    let buf_clone = buf.clone();
    std::thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => buf_clone.lock().unwrap().extend_from_slice(&chunk[..n]),
            }
        }
    });
    buf
}

fn decode_capped(buf: &Arc<Mutex<Vec<u8>>>) -> (String, bool) {
    let bytes = buf.lock().unwrap().clone();
    let text = String::from_utf8_lossy(&bytes).into_owned();
    truncate_text(&text, log_capture_max_chars() as usize)
}

fn timeout_failure(
    failure_code: &'static str,
    failure_message: &str,
    timeout_sec: u64,
    command: &[String],
    stdout_buf: &Arc<Mutex<Vec<u8>>>,
    stderr_buf: &Arc<Mutex<Vec<u8>>>,
) -> PipelineError {
    let (stdout, stdout_truncated) = decode_capped(stdout_buf);
    let (stderr, stderr_truncated) = decode_capped(stderr_buf);
    let details = ProcessFailureDetails {
        exit_code: None,
        command: command.to_vec(),
        stdout,
        stderr,
        output_truncated: stdout_truncated || stderr_truncated,
        timeout_sec: Some(timeout_sec),
    };
    PipelineError::new(
        failure_code,
        format!("{failure_message} Timeout after {timeout_sec}s."),
    )
    .with_details(serde_json::to_value(details).unwrap_or_default())
}

fn exit_result(
    status: std::process::ExitStatus,
    failure_code: &'static str,
    failure_message: &str,
    command: &[String],
    stdout_buf: &Arc<Mutex<Vec<u8>>>,
    stderr_buf: &Arc<Mutex<Vec<u8>>>,
) -> Result<(String, String), PipelineError> {
    // The reader threads may still be draining the final bytes; give them
    // a brief moment before reading the captured buffers.
    std::thread::sleep(Duration::from_millis(20));
    let (stdout, stdout_truncated) = decode_capped(stdout_buf);
    let (stderr, stderr_truncated) = decode_capped(stderr_buf);

    if status.success() {
        return Ok((stdout, stderr));
    }

    let details = ProcessFailureDetails {
        exit_code: status.code(),
        command: command.to_vec(),
        stdout,
        stderr,
        output_truncated: stdout_truncated || stderr_truncated,
        timeout_sec: None,
    };
    Err(PipelineError::new(
        failure_code,
        format!("{failure_message} Exited with code {:?}.", status.code()),
    )
    .with_details(serde_json::to_value(details).unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::CancelHandle;

    #[test]
    fn succeeds_on_zero_exit_code() {
        let cancel = CancelHandle::default();
        let result = ProcessRunner::run(
            "true",
            &[],
            "TEST_FAILED",
            "command failed.",
            5,
            &cancel,
        );
        assert!(result.is_ok(), "{result:?}");
    }

    #[test]
    fn reports_failure_details_on_nonzero_exit() {
        let cancel = CancelHandle::default();
        let result = ProcessRunner::run(
            "false",
            &[],
            "TEST_FAILED",
            "command failed.",
            5,
            &cancel,
        );
        let err = result.unwrap_err();
        assert_eq!(err.code, "TEST_FAILED");
        assert_eq!(err.details["exitCode"], 1);
    }

    #[test]
    fn captures_stdout() {
        let cancel = CancelHandle::default();
        let (stdout, _stderr) = ProcessRunner::run(
            "sh",
            &["-c".to_string(), "echo hello".to_string()],
            "TEST_FAILED",
            "command failed.",
            5,
            &cancel,
        )
        .unwrap();
        assert_eq!(stdout.trim(), "hello");
    }

    #[test]
    fn times_out_and_kills_sleeper() {
        let cancel = CancelHandle::default();
        let result = ProcessRunner::run(
            "sleep",
            &["5".to_string()],
            "TEST_TIMEOUT",
            "command timed out.",
            0,
            &cancel,
        );
        let err = result.unwrap_err();
        assert_eq!(err.code, "TEST_TIMEOUT");
        assert_eq!(err.details["timeoutSec"], 0);
    }

    #[test]
    fn cancel_signal_short_circuits() {
        let cancel = Arc::new(CancelHandle::default());
        let cancel_clone = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            cancel_clone.signal();
        });
        let result = ProcessRunner::run(
            "sleep",
            &["5".to_string()],
            "TEST_FAILED",
            "command failed.",
            30,
            &cancel,
        );
        assert!(result.unwrap_err().is_cancelled());
    }
}
