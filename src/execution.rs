//! Running submitted code.
//!
//! The executor is an opaque collaborator: it takes source and a language
//! and hands back what the program printed. [`ProcessExecutor`] uses the
//! interpreters installed on the machine and feeds the source on stdin.
//! Runs are bounded by a timeout and can be cancelled from another thread.

use std::io::{ErrorKind, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("no interpreter configured for language {0:?}")]
    UnsupportedLanguage(String),
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("program did not finish within {}s", .0.as_secs_f32())]
    TimedOut(Duration),
    #[error("run cancelled")]
    Cancelled,
    #[error("i/o error while running program: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub language: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecutionOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Shared flag telling a running program to stop
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs one submission to completion.
///
/// Called from a worker thread, so implementations must be shareable.
/// Long-running implementations should give up once `cancel` is set.
pub trait CodeExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: &CancelFlag,
    ) -> Result<ExecutionOutput, ExecutionError>;
}

/// Interpreter command line for a language, reading the program from stdin
pub fn interpreter_for(language: &str) -> Option<(&'static str, &'static [&'static str])> {
    match language.to_lowercase().as_str() {
        "python" | "python3" => Some(("python3", &["-"])),
        "javascript" | "js" | "node" => Some(("node", &[])),
        "ruby" => Some(("ruby", &[])),
        "bash" | "shell" | "sh" => Some(("bash", &["-s"])),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessExecutor {
    timeout: Duration,
}

impl ProcessExecutor {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_RUN_TIMEOUT)
    }
}

impl CodeExecutor for ProcessExecutor {
    fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: &CancelFlag,
    ) -> Result<ExecutionOutput, ExecutionError> {
        let (program, args) = interpreter_for(&request.language)
            .ok_or_else(|| ExecutionError::UnsupportedLanguage(request.language.clone()))?;

        debug!(program, language = %request.language, "running submission");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                program: program.to_string(),
                source,
            })?;

        // Every pipe gets its own thread so a program that ignores stdin or
        // floods stdout can't stall the deadline below.
        if let Some(stdin) = child.stdin.take() {
            feed_stdin(stdin, request.source.clone());
        }
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    kill_and_reap(&mut child);
                    return Err(e.into());
                }
            }
            if cancel.is_cancelled() {
                kill_and_reap(&mut child);
                debug!(program, "submission cancelled");
                return Err(ExecutionError::Cancelled);
            }
            if Instant::now() >= deadline {
                kill_and_reap(&mut child);
                warn!(program, timeout_secs = self.timeout.as_secs_f32(), "submission timed out");
                return Err(ExecutionError::TimedOut(self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        Ok(ExecutionOutput {
            stdout: collect(stdout),
            stderr: collect(stderr),
            exit_code: status.code().unwrap_or(-1),
        })
    }
}

fn feed_stdin<W: Write + Send + 'static>(mut stdin: W, source: String) {
    thread::spawn(move || {
        // Interpreters may exit before reading everything; that's their answer.
        if let Err(e) = stdin.write_all(source.as_bytes()) {
            if e.kind() != ErrorKind::BrokenPipe {
                debug!(error = %e, "could not write submission to stdin");
            }
        }
    });
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    let bytes = reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!(error = %e, "could not kill submission");
    }
    if let Err(e) = child.wait() {
        debug!(error = %e, "could not reap submission");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn bash(source: &str) -> ExecutionRequest {
        ExecutionRequest {
            language: "bash".into(),
            source: source.into(),
        }
    }

    #[test]
    fn known_languages_map_to_interpreters() {
        assert_eq!(interpreter_for("python").map(|i| i.0), Some("python3"));
        assert_eq!(interpreter_for("JavaScript").map(|i| i.0), Some("node"));
        assert_eq!(interpreter_for("bash").map(|i| i.0), Some("bash"));
        assert_eq!(interpreter_for("cobol"), None);
    }

    #[test]
    fn unsupported_language_is_an_error() {
        let request = ExecutionRequest {
            language: "cobol".into(),
            source: "DISPLAY 'HI'.".into(),
        };
        assert_matches!(
            ProcessExecutor::default().execute(&request, &CancelFlag::new()),
            Err(ExecutionError::UnsupportedLanguage(lang)) if lang == "cobol"
        );
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        assert!(other.is_cancelled());
    }

    #[cfg(unix)]
    #[test]
    fn runs_bash_from_stdin() {
        let output = ProcessExecutor::default()
            .execute(&bash("echo hello\necho oops >&2\nexit 3\n"), &CancelFlag::new())
            .unwrap();
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "oops\n");
        assert_eq!(output.exit_code, 3);
        assert!(!output.succeeded());
    }

    #[cfg(unix)]
    #[test]
    fn program_exiting_before_reading_all_input_still_reports() {
        let mut source = String::from("echo early\nexit 0\n");
        for _ in 0..50_000 {
            source.push_str("# padding that is never read by the interpreter\n");
        }

        let output = ProcessExecutor::default()
            .execute(&bash(&source), &CancelFlag::new())
            .unwrap();
        assert_eq!(output.stdout, "early\n");
        assert!(output.succeeded());
    }

    #[cfg(unix)]
    #[test]
    fn runaway_program_is_killed_at_the_timeout() {
        let executor = ProcessExecutor::with_timeout(Duration::from_millis(200));
        let started = Instant::now();

        let result = executor.execute(&bash("exec sleep 30\n"), &CancelFlag::new());

        assert_matches!(result, Err(ExecutionError::TimedOut(t)) if t == Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn cancelling_stops_a_running_program() {
        let flag = CancelFlag::new();
        let canceller = {
            let flag = flag.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                flag.cancel();
            })
        };
        let started = Instant::now();

        let result = ProcessExecutor::default().execute(&bash("exec sleep 30\n"), &flag);
        canceller.join().unwrap();

        assert_matches!(result, Err(ExecutionError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
