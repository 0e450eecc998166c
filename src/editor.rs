//! External editor integration for the `e` choice.

use crate::errors::NlshError;
use async_trait::async_trait;
use std::io::Write;
use tracing::debug;

/// Trait for handing a command to the user for editing.
#[async_trait]
pub trait CommandEditor: Send + Sync {
    /// Returns the edited command.
    ///
    /// # Errors
    ///
    /// `EditorAborted` when no editor can be run, the editor exits
    /// unsuccessfully, or the buffer comes back empty.
    async fn edit(&self, command: &str) -> Result<String, NlshError>;
}

/// Opens the command in `$VISUAL`, `$EDITOR`, or the first of nano/vim/vi
/// found on PATH.
pub struct ExternalEditor {
    program: Option<String>,
}

impl ExternalEditor {
    pub fn from_env() -> Self {
        let program = ["VISUAL", "EDITOR"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|v| !v.trim().is_empty())
            .or_else(|| {
                ["nano", "vim", "vi"]
                    .iter()
                    .find(|p| which::which(p).is_ok())
                    .map(|p| p.to_string())
            });
        Self { program }
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }
}

#[async_trait]
impl CommandEditor for ExternalEditor {
    async fn edit(&self, command: &str) -> Result<String, NlshError> {
        let program = self
            .program
            .as_deref()
            .ok_or_else(|| NlshError::EditorAborted("no editor found, set $EDITOR".to_string()))?;

        let aborted = |e: std::io::Error| NlshError::EditorAborted(e.to_string());
        let mut file = tempfile::Builder::new()
            .prefix("nlsh-")
            .suffix(".sh")
            .tempfile()
            .map_err(aborted)?;
        writeln!(file, "{command}").map_err(aborted)?;
        file.flush().map_err(aborted)?;

        // $EDITOR may carry arguments, e.g. "code --wait".
        let mut parts = program.split_whitespace();
        let binary = parts
            .next()
            .ok_or_else(|| NlshError::EditorAborted("empty editor command".to_string()))?;
        debug!("Opening {} in {}", file.path().display(), program);

        let status = tokio::process::Command::new(binary)
            .args(parts)
            .arg(file.path())
            .status()
            .await
            .map_err(|e| NlshError::EditorAborted(format!("could not run {binary}: {e}")))?;
        if !status.success() {
            return Err(NlshError::EditorAborted(format!("{binary} exited with {status}")));
        }

        let edited = tokio::fs::read_to_string(file.path()).await.map_err(aborted)?;
        let edited = edited.trim();
        if edited.is_empty() {
            return Err(NlshError::EditorAborted("empty command".to_string()));
        }
        Ok(edited.to_string())
    }
}
