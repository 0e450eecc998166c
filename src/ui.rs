//! Terminal interaction for the session.
//!
//! Every blocking prompt races the user's answer against Ctrl-C, so an
//! interrupt anywhere in the session surfaces as
//! [`NlshError::SessionCancelled`].

use crate::errors::NlshError;
use crate::executor::ExitKind;
use crate::session::UserChoice;
use async_trait::async_trait;
use std::io::{self, BufRead, BufReader, Stderr, Stdin, Stdout, Write};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Which model call a streamed fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    ToolSelection,
    Generation,
    Fix,
    Explanation,
}

impl StreamSource {
    fn label(&self) -> &'static str {
        match self {
            StreamSource::ToolSelection => "tool selection",
            StreamSource::Generation => "generation",
            StreamSource::Fix => "fix",
            StreamSource::Explanation => "explanation",
        }
    }

    fn progress_label(&self) -> &'static str {
        match self {
            StreamSource::ToolSelection => "Selecting tools",
            StreamSource::Generation => "Thinking",
            StreamSource::Fix => "Fixing",
            StreamSource::Explanation => "Explaining",
        }
    }
}

/// Which kind of streamed text is currently being echoed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Echo {
    Reasoning,
    Answer,
}

/// What to do after a model request failed in follow-up mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureChoice {
    Retry,
    NewPrompt,
    Quit,
}

/// Trait for the user-facing side of a session.
///
/// This abstraction lets the session engine be driven by scripted input in
/// tests.
#[async_trait]
pub trait Interaction: Send {
    /// Shows a suggested command and asks what to do with it. End of input
    /// counts as declining.
    async fn choose(&mut self, command: &str) -> Result<UserChoice, NlshError>;

    /// Asks whether to try fixing a command that failed.
    async fn confirm_fix(&mut self, command: &str, exit: ExitKind) -> Result<bool, NlshError>;

    /// Reads the next prompt in follow-up mode; `None` ends the session.
    async fn next_prompt(&mut self) -> Result<Option<String>, NlshError>;

    /// Asks how to continue after a failed model request.
    async fn after_model_failure(&mut self) -> Result<FailureChoice, NlshError>;

    /// A model call for `source` is about to start.
    fn started(&mut self, _source: StreamSource) {}

    /// Receives a reasoning fragment as it streams in.
    fn reasoning(&mut self, source: StreamSource, fragment: &str);

    /// Receives an answer fragment as it streams in.
    fn answer(&mut self, _source: StreamSource, _fragment: &str) {}

    /// The model call for `source` ended, successfully or not.
    fn finished(&mut self, _source: StreamSource) {}

    fn explanation(&mut self, text: &str);

    fn notice(&mut self, message: &str);

    fn error(&mut self, message: &str);
}

/// Maps an answer to the suggestion prompt. Anything unrecognized declines.
pub fn parse_choice(answer: &str) -> UserChoice {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => UserChoice::Confirm,
        "e" | "edit" => UserChoice::Edit,
        "r" | "regenerate" => UserChoice::Regenerate,
        "x" | "explain" => UserChoice::Explain,
        _ => UserChoice::Decline,
    }
}

/// Interactive terminal UI.
///
/// Prompts and explanations go to `out`. Everything else goes to `err`.
/// When verbose, reasoning and answers stream as they arrive; otherwise a
/// one-line progress message stands in for them while a call runs.
pub struct TerminalUi<R, W, E> {
    input: Arc<Mutex<R>>,
    out: W,
    err: E,
    verbose: bool,
    echo_open: Option<(Echo, StreamSource)>,
    progress_shown: bool,
}

impl TerminalUi<BufReader<Stdin>, Stdout, Stderr> {
    pub fn stdio(verbose: bool) -> Self {
        Self::with_io(BufReader::new(io::stdin()), io::stdout(), io::stderr(), verbose)
    }
}

impl<R, W, E> TerminalUi<R, W, E>
where
    R: BufRead + Send + 'static,
    W: Write + Send,
    E: Write + Send,
{
    /// Creates a UI over custom I/O streams (for testing).
    pub fn with_io(input: R, out: W, err: E, verbose: bool) -> Self {
        Self {
            input: Arc::new(Mutex::new(input)),
            out,
            err,
            verbose,
            echo_open: None,
            progress_shown: false,
        }
    }

    pub fn into_writers(self) -> (W, E) {
        (self.out, self.err)
    }

    /// Writes `prompt` and waits for one line of input. `None` at end of
    /// input.
    async fn ask(&mut self, prompt: &str) -> Result<Option<String>, NlshError> {
        self.close_stream();
        let _ = write!(self.out, "{prompt}");
        let _ = self.out.flush();

        let input = self.input.clone();
        let read = tokio::task::spawn_blocking(move || -> io::Result<Option<String>> {
            let mut reader = input.lock().map_err(|_| io::Error::other("input lock poisoned"))?;
            let mut line = String::new();
            let n = reader.read_line(&mut line)?;
            Ok((n > 0).then(|| line.trim_end_matches(['\n', '\r']).to_string()))
        });

        tokio::select! {
            joined = read => match joined {
                Ok(Ok(line)) => Ok(line),
                Ok(Err(e)) => {
                    warn!("Failed to read input: {}", e);
                    Ok(None)
                }
                Err(e) => {
                    warn!("Input reader stopped: {}", e);
                    Ok(None)
                }
            },
            _ = tokio::signal::ctrl_c() => {
                let _ = writeln!(self.out);
                Err(NlshError::SessionCancelled)
            }
        }
    }

    /// Ends any open echo line and erases the progress message.
    fn close_stream(&mut self) {
        if self.echo_open.take().is_some() {
            let _ = writeln!(self.err);
        }
        if std::mem::take(&mut self.progress_shown) {
            let _ = write!(self.err, "\r\x1b[K");
            let _ = self.err.flush();
        }
    }

    fn echo(&mut self, kind: Echo, source: StreamSource, fragment: &str) {
        if self.echo_open != Some((kind, source)) {
            self.close_stream();
            let heading = match kind {
                Echo::Reasoning => "Reasoning",
                Echo::Answer => "Answer",
            };
            let _ = write!(self.err, "{heading} ({}): ", source.label());
            self.echo_open = Some((kind, source));
        }
        let _ = write!(self.err, "{fragment}");
        let _ = self.err.flush();
    }
}

#[async_trait]
impl<R, W, E> Interaction for TerminalUi<R, W, E>
where
    R: BufRead + Send + 'static,
    W: Write + Send,
    E: Write + Send,
{
    async fn choose(&mut self, command: &str) -> Result<UserChoice, NlshError> {
        self.close_stream();
        let _ = writeln!(self.out, "Suggested: {command}");
        let answer = self.ask("[Confirm] Run this command? (y/N/e/r/x) ").await?;
        let choice = answer.map(|a| parse_choice(&a)).unwrap_or(UserChoice::Decline);
        info!("User chose {:?} for '{}'", choice, command);
        Ok(choice)
    }

    async fn confirm_fix(&mut self, command: &str, exit: ExitKind) -> Result<bool, NlshError> {
        let _ = writeln!(self.err, "Command '{command}' failed with {exit}.");
        let answer = self.ask("Try to fix it? (Y/n) ").await?;
        Ok(match answer {
            Some(a) => !matches!(a.trim().to_lowercase().as_str(), "n" | "no"),
            None => false,
        })
    }

    async fn next_prompt(&mut self) -> Result<Option<String>, NlshError> {
        loop {
            let Some(line) = self.ask("nlsh> ").await? else {
                return Ok(None);
            };
            let line = line.trim();
            match line {
                "" => continue,
                "exit" | "quit" => return Ok(None),
                _ => return Ok(Some(line.to_string())),
            }
        }
    }

    async fn after_model_failure(&mut self) -> Result<FailureChoice, NlshError> {
        loop {
            let Some(answer) = self.ask("[r]etry, [n]ew prompt or [q]uit? ").await? else {
                return Ok(FailureChoice::Quit);
            };
            match answer.trim().to_lowercase().as_str() {
                "r" | "retry" => return Ok(FailureChoice::Retry),
                "n" | "new" => return Ok(FailureChoice::NewPrompt),
                "q" | "quit" => return Ok(FailureChoice::Quit),
                _ => {
                    let _ = writeln!(self.out, "Please enter r, n or q.");
                }
            }
        }
    }

    fn started(&mut self, source: StreamSource) {
        if self.verbose {
            return;
        }
        self.close_stream();
        let _ = write!(self.err, "{}...", source.progress_label());
        let _ = self.err.flush();
        self.progress_shown = true;
    }

    fn reasoning(&mut self, source: StreamSource, fragment: &str) {
        if self.verbose {
            self.echo(Echo::Reasoning, source, fragment);
        }
    }

    fn answer(&mut self, source: StreamSource, fragment: &str) {
        if self.verbose {
            self.echo(Echo::Answer, source, fragment);
        }
    }

    fn finished(&mut self, _source: StreamSource) {
        self.close_stream();
    }

    fn explanation(&mut self, text: &str) {
        self.close_stream();
        let _ = writeln!(self.out, "\n{}", "-".repeat(60));
        let _ = writeln!(self.out, "{}", text.trim());
        let _ = writeln!(self.out, "{}\n", "-".repeat(60));
    }

    fn notice(&mut self, message: &str) {
        self.close_stream();
        let _ = writeln!(self.err, "{message}");
    }

    fn error(&mut self, message: &str) {
        self.close_stream();
        let _ = writeln!(self.err, "Error: {message}");
    }
}
