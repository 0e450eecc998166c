//! Context aggregation.
//!
//! Runs the selected tools concurrently, each under its own timeout, and
//! merges whatever succeeded into a [`ContextBundle`]. A slow or broken tool
//! only costs its own entry.

use crate::errors::NlshError;
use crate::tools::ToolDescriptor;
use futures_util::future::join_all;
use serde::Serialize;
use std::fmt::Write;
use tracing::{debug, warn};

/// One tool's contribution to the prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextEntry {
    pub tool: String,
    pub text: String,
}

/// Tool outputs keyed by tool name, in selection order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ContextBundle {
    entries: Vec<ContextEntry>,
}

impl ContextBundle {
    pub fn new(entries: Vec<ContextEntry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, tool: &str) -> Option<&str> {
        self.entries.iter().find(|e| e.tool == tool).map(|e| e.text.as_str())
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.tool.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the bundle as prompt text, one delimited block per tool.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let _ = writeln!(out, "--- {} ---", entry.tool);
            out.push_str(entry.text.trim_end());
            out.push('\n');
        }
        out
    }
}

/// Result of one aggregation pass.
#[derive(Debug, Default)]
pub struct ContextReport {
    pub bundle: ContextBundle,
    /// One `ToolCollectionDegraded` per tool that failed or timed out.
    pub degraded: Vec<NlshError>,
}

/// Runs every given tool concurrently and collects the results.
///
/// Total wall time is bounded by the largest per-tool timeout, not by the
/// sum of tool run times.
pub async fn collect(tools: &[ToolDescriptor]) -> ContextReport {
    let runs = tools.iter().map(|descriptor| async move {
        let name = descriptor.name();
        let result = tokio::time::timeout(descriptor.timeout, descriptor.tool.collect()).await;
        let outcome = match result {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", descriptor.timeout)),
        };
        (name, outcome)
    });

    let mut report = ContextReport::default();
    for (name, outcome) in join_all(runs).await {
        match outcome {
            Ok(text) if text.trim().is_empty() => {
                debug!("Context tool {} returned no output", name);
            }
            Ok(text) => {
                debug!("Context tool {} returned {} bytes", name, text.len());
                report.bundle.entries.push(ContextEntry {
                    tool: name.to_string(),
                    text,
                });
            }
            Err(reason) => {
                let error = NlshError::ToolCollectionDegraded {
                    tool: name.to_string(),
                    reason,
                };
                warn!("{}", error);
                report.degraded.push(error);
            }
        }
    }
    report
}
