//! Structured per-Turn logging.

use crate::backends::BackendConfig;
use crate::context::ContextBundle;
use crate::providers::{SystemTimeProvider, TimeProvider};
use anyhow::{Context, Result};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Kind of model call a log entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Preflight,
    Generation,
    Fix,
    Explanation,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Preflight => "preflight",
            EntryKind::Generation => "generation",
            EntryKind::Fix => "fix",
            EntryKind::Explanation => "explanation",
        }
    }
}

/// One model exchange.
pub struct LogEntry<'a> {
    pub kind: EntryKind,
    pub backend: &'a BackendConfig,
    pub prompt: &'a str,
    pub system_prompt: &'a str,
    pub context: &'a ContextBundle,
    pub response: &'a str,
}

/// Trait for recording model exchanges.
pub trait LogSink: Send + Sync {
    fn record(&self, entry: &LogEntry<'_>) -> Result<()>;
}

/// Appends pretty-printed JSON entries to a file.
///
/// The backend's API key is never written.
pub struct JsonFileLogSink {
    path: PathBuf,
    time_provider: Box<dyn TimeProvider>,
}

impl JsonFileLogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_time_provider(path, Box::new(SystemTimeProvider))
    }

    /// Creates a sink with a custom time provider (for testing).
    pub fn with_time_provider(path: impl Into<PathBuf>, time_provider: Box<dyn TimeProvider>) -> Self {
        Self {
            path: path.into(),
            time_provider,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for JsonFileLogSink {
    fn record(&self, entry: &LogEntry<'_>) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        }

        let value = json!({
            "timestamp": self.time_provider.now().to_rfc3339(),
            "type": entry.kind.as_str(),
            "backend": {
                "name": entry.backend.name,
                "model": entry.backend.model,
                "url": entry.backend.base_url,
            },
            "prompt": entry.prompt,
            "system_prompt": entry.system_prompt,
            "context_bundle": entry.context,
            "response": entry.response,
        });

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open log file {}", self.path.display()))?;
        writeln!(file, "{}", serde_json::to_string_pretty(&value)?)?;
        Ok(())
    }
}
