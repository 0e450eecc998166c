//! Error taxonomy for the session engine.
//!
//! Only failures the engine has to reason about get a typed variant here.
//! Everything around the engine (config files, log files, tool internals)
//! stays on `anyhow::Result`.

use crate::executor::ExitKind;

/// Errors surfaced by the interactive session engine.
#[derive(Debug, thiserror::Error)]
pub enum NlshError {
    /// The requested backend index does not exist (or no backend is configured).
    #[error("backend {index} not found ({available} configured)")]
    BackendNotFound { index: usize, available: usize },

    /// An image was attached but the selected backend cannot accept it.
    #[error("backend '{backend}' does not support image input")]
    BackendNotVisionCapable { backend: String },

    /// The attached image exceeds the backend's size limit.
    #[error("image is {size_mb:.2} MB, backend limit is {limit_mb:.2} MB")]
    ImageTooLarge { size_mb: f64, limit_mb: f64 },

    /// Network or protocol failure while talking to the model backend.
    #[error("model request failed{}: {message}", status_suffix(.status))]
    ModelRequestFailed { status: Option<u16>, message: String },

    /// A context tool failed or timed out. Never fatal; the tool's entry is
    /// simply left out of the bundle.
    #[error("context tool '{tool}' degraded: {reason}")]
    ToolCollectionDegraded { tool: String, reason: String },

    /// The executed command exited unsuccessfully.
    #[error("command failed with {exit}")]
    CommandExecutionFailed { exit: ExitKind },

    /// The external editor was closed without producing a command.
    #[error("edit aborted: {0}")]
    EditorAborted(String),

    /// The user interrupted the session.
    #[error("operation cancelled by user")]
    SessionCancelled,
}

impl NlshError {
    /// Builds a `ModelRequestFailed` with the API key scrubbed from the message.
    pub fn model_request(status: Option<u16>, message: impl Into<String>, api_key: &str) -> Self {
        NlshError::ModelRequestFailed {
            status,
            message: redact(&message.into(), api_key),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

/// Replaces every occurrence of `secret` in `text` with `***`.
pub fn redact(text: &str, secret: &str) -> String {
    if secret.trim().is_empty() {
        return text.to_string();
    }
    text.replace(secret, "***")
}
