//! Non-blocking command execution.
//!
//! Runs a confirmed command through the configured shell. Stdout and stderr
//! are drained concurrently and echoed to the terminal as they arrive, while
//! a copy of each is kept for the fix loop. Ctrl-C kills the child and
//! reports the run as interrupted.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::future::Future;
use std::io::Write;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

#[cfg(unix)]
const SIGINT: i32 = 2;

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Normal exit with a status code.
    Code(i32),
    /// Killed by a signal (Unix).
    Signal(i32),
    /// Stopped by the user with Ctrl-C.
    Interrupted,
}

impl ExitKind {
    pub fn success(&self) -> bool {
        matches!(self, ExitKind::Code(0))
    }

    /// Numeric exit code in shell convention: `128 + n` for signal `n`,
    /// 130 for an interrupt.
    pub fn code(&self) -> i32 {
        match self {
            ExitKind::Code(code) => *code,
            ExitKind::Signal(signal) => 128 + signal,
            ExitKind::Interrupted => 130,
        }
    }

    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitKind::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            // Ctrl-C reaches the child's process group too and may win the
            // race against our own handler.
            if let Some(signal) = status.signal() {
                if signal == SIGINT {
                    return ExitKind::Interrupted;
                }
                return ExitKind::Signal(signal);
            }
        }
        ExitKind::Code(1)
    }
}

impl std::fmt::Display for ExitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitKind::Code(code) => write!(f, "exit code {code}"),
            ExitKind::Signal(signal) => write!(f, "signal {signal}"),
            ExitKind::Interrupted => write!(f, "interrupt"),
        }
    }
}

/// Captured result of one command run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub exit: ExitKind,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionOutcome {
    /// Stdout followed by stderr, as handed to the fix prompt.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

// =============================================================================
// Traits for Dependency Injection
// =============================================================================

/// Trait for running a confirmed command.
///
/// This abstraction lets the session be tested without spawning shells.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command`, streaming its output to the terminal.
    ///
    /// # Errors
    ///
    /// Returns an error only when the shell cannot be started. A command
    /// that runs and fails is reported through [`ExecutionOutcome::exit`].
    async fn run(&self, command: &str) -> Result<ExecutionOutcome>;
}

// =============================================================================
// Executor Implementation
// =============================================================================

/// Runs commands with `<shell> -c <command>`.
///
/// The child's stdin is closed; interactive programs that read from it see
/// end of input.
pub struct Executor {
    shell: String,
}

impl Executor {
    /// Creates an executor for the named shell, falling back to `/bin/sh`
    /// when it cannot be found on PATH.
    pub fn new(shell: &str) -> Self {
        let shell = match which::which(shell) {
            Ok(path) => path.to_string_lossy().to_string(),
            Err(_) => {
                debug!("Shell '{}' not found on PATH, using /bin/sh", shell);
                "/bin/sh".to_string()
            }
        };
        Self { shell }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Runs a command with injected output writers (for testing).
    pub async fn execute_with_io<W1, W2>(
        &self,
        command: &str,
        stdout: &mut W1,
        stderr: &mut W2,
    ) -> Result<ExecutionOutcome>
    where
        W1: Write + Send,
        W2: Write + Send,
    {
        self.execute_until(command, stdout, stderr, tokio::signal::ctrl_c())
            .await
    }

    /// Runs a command until it exits or `interrupt` resolves, whichever
    /// comes first. An interrupt kills the child.
    pub async fn execute_until<W1, W2, F>(
        &self,
        command: &str,
        stdout: &mut W1,
        stderr: &mut W2,
        interrupt: F,
    ) -> Result<ExecutionOutcome>
    where
        W1: Write + Send,
        W2: Write + Send,
        F: Future + Send,
    {
        info!("Executing command: {}", command);

        let mut child = tokio::process::Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.shell))?;

        let mut out_pipe = child.stdout.take().context("child stdout was not piped")?;
        let mut err_pipe = child.stderr.take().context("child stderr was not piped")?;
        let mut stdout_copy = Vec::new();
        let mut stderr_copy = Vec::new();

        let finished = {
            let drain = async {
                tokio::join!(
                    pump(&mut out_pipe, stdout, &mut stdout_copy),
                    pump(&mut err_pipe, stderr, &mut stderr_copy),
                );
                child.wait().await
            };
            tokio::select! {
                biased;
                _ = interrupt => None,
                status = drain => Some(status),
            }
        };

        let exit = match finished {
            Some(status) => ExitKind::from_status(status?),
            None => {
                info!("Interrupted, killing command");
                let _ = child.start_kill();
                let _ = child.wait().await;
                ExitKind::Interrupted
            }
        };
        debug!("Command finished with {}", exit);

        Ok(ExecutionOutcome {
            exit,
            stdout: String::from_utf8_lossy(&stdout_copy).to_string(),
            stderr: String::from_utf8_lossy(&stderr_copy).to_string(),
        })
    }
}

#[async_trait]
impl CommandRunner for Executor {
    async fn run(&self, command: &str) -> Result<ExecutionOutcome> {
        self.execute_with_io(command, &mut std::io::stdout(), &mut std::io::stderr())
            .await
    }
}

/// Copies `reader` to `echo` chunk by chunk until end of stream, keeping a
/// copy in `sink`. Echo failures are ignored so the pipe keeps draining.
async fn pump<R, W>(reader: &mut R, echo: &mut W, sink: &mut Vec<u8>)
where
    R: AsyncRead + Unpin,
    W: Write + Send,
{
    let mut buf = [0u8; 4096];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                debug!("Error reading command output: {}", e);
                return;
            }
        };
        let _ = echo.write_all(&buf[..n]).and_then(|_| echo.flush());
        sink.extend_from_slice(&buf[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Writer that records which stream each chunk came from, in arrival
    /// order.
    #[derive(Clone)]
    struct TaggedWriter {
        tag: &'static str,
        log: Arc<Mutex<Vec<(&'static str, String)>>>,
    }

    impl Write for TaggedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.log
                .lock()
                .unwrap()
                .push((self.tag, String::from_utf8_lossy(buf).to_string()));
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_exit_kind_codes() {
        assert!(ExitKind::Code(0).success());
        assert!(!ExitKind::Code(1).success());
        assert_eq!(ExitKind::Code(2).code(), 2);
        assert_eq!(ExitKind::Signal(9).code(), 137);
        assert_eq!(ExitKind::Interrupted.code(), 130);
        assert_eq!(ExitKind::Code(1).to_string(), "exit code 1");
    }

    #[test]
    fn test_combined_output() {
        let outcome = ExecutionOutcome {
            exit: ExitKind::Code(1),
            stdout: "partial\n".to_string(),
            stderr: "boom\n".to_string(),
        };
        assert_eq!(outcome.combined_output(), "partial\nboom\n");
    }

    #[test]
    fn test_unknown_shell_falls_back_to_sh() {
        let executor = Executor::new("definitely-not-a-shell-xyz");
        assert_eq!(executor.shell(), "/bin/sh");
    }

    #[tokio::test]
    async fn test_execute_captures_both_streams_and_exit_code() {
        let executor = Executor::new("sh");
        let mut stdout: Vec<u8> = Vec::new();
        let mut stderr: Vec<u8> = Vec::new();

        let outcome = executor
            .execute_with_io("echo hello; echo oops >&2; exit 3", &mut stdout, &mut stderr)
            .await
            .unwrap();

        assert_eq!(outcome.exit, ExitKind::Code(3));
        assert_eq!(outcome.stdout, "hello\n");
        assert_eq!(outcome.stderr, "oops\n");
        assert_eq!(stdout, b"hello\n");
        assert_eq!(stderr, b"oops\n");
    }

    #[tokio::test]
    async fn test_execute_echoes_streams_as_they_arrive() {
        let executor = Executor::new("sh");
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut out = TaggedWriter { tag: "out", log: log.clone() };
        let mut err = TaggedWriter { tag: "err", log: log.clone() };

        let outcome = executor
            .execute_with_io(
                "echo one; sleep 0.2; echo two >&2; sleep 0.2; echo three",
                &mut out,
                &mut err,
            )
            .await
            .unwrap();

        assert!(outcome.exit.success());
        let log = log.lock().unwrap();
        let order: Vec<(&str, &str)> = log.iter().map(|(t, s)| (*t, s.as_str())).collect();
        assert_eq!(order, vec![("out", "one\n"), ("err", "two\n"), ("out", "three\n")]);
    }

    #[tokio::test]
    async fn test_execute_reports_signal_exit() {
        let executor = Executor::new("sh");
        let outcome = executor
            .execute_with_io("kill -9 $$", &mut Vec::<u8>::new(), &mut Vec::<u8>::new())
            .await
            .unwrap();
        assert_eq!(outcome.exit, ExitKind::Signal(9));
        assert_eq!(outcome.exit.code(), 137);
    }

    #[cfg(unix)]
    #[test]
    fn test_sigint_death_counts_as_interrupt() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(ExitKind::from_status(ExitStatus::from_raw(SIGINT)), ExitKind::Interrupted);
        assert_eq!(ExitKind::from_status(ExitStatus::from_raw(15)), ExitKind::Signal(15));
        assert_eq!(ExitKind::from_status(ExitStatus::from_raw(3 << 8)), ExitKind::Code(3));
    }

    #[tokio::test]
    async fn test_execute_child_killed_by_sigint_is_interrupted() {
        let executor = Executor::new("sh");
        let outcome = executor
            .execute_with_io("kill -INT $$", &mut Vec::<u8>::new(), &mut Vec::<u8>::new())
            .await
            .unwrap();
        assert_eq!(outcome.exit, ExitKind::Interrupted);
        assert_eq!(outcome.exit.code(), 130);
    }

    #[tokio::test]
    async fn test_interrupt_kills_running_command() {
        let executor = Executor::new("sh");
        let mut stdout: Vec<u8> = Vec::new();
        let started = std::time::Instant::now();

        let outcome = executor
            .execute_until(
                "echo started; sleep 5; echo never",
                &mut stdout,
                &mut Vec::<u8>::new(),
                tokio::time::sleep(std::time::Duration::from_millis(300)),
            )
            .await
            .unwrap();

        assert_eq!(outcome.exit, ExitKind::Interrupted);
        assert!(started.elapsed() < std::time::Duration::from_secs(3));
        assert_eq!(outcome.stdout, "started\n");
        assert!(!outcome.stdout.contains("never"));
    }

    #[tokio::test]
    async fn test_execute_large_output_does_not_block() {
        let executor = Executor::new("sh");
        let mut stdout: Vec<u8> = Vec::new();
        let outcome = executor
            .execute_with_io("head -c 200000 /dev/zero | tr '\\0' 'a'; echo done >&2", &mut stdout, &mut Vec::<u8>::new())
            .await
            .unwrap();
        assert!(outcome.exit.success());
        assert_eq!(stdout.len(), 200_000);
        assert_eq!(outcome.stderr, "done\n");
    }
}
