//! Read-only system inspection tools.
//!
//! Each tool gathers one slice of live system context (directory listing,
//! environment, OS details, ...) that is injected into the model prompt.
//! Tools never mutate host state. Tools that shell out spawn their children
//! with `kill_on_drop`, so a tool that times out takes its process with it.

mod directory;
mod environment;
mod git;
mod network;
mod process;
mod shell;
mod system;

pub use directory::DirLister;
pub use environment::EnvInspector;
pub use git::GitRepoInfo;
pub use network::NetworkInfo;
pub use process::ProcessSniffer;
pub use shell::ShellHistoryInspector;
pub use system::SystemInfo;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A source of read-only context for the model.
#[async_trait]
pub trait ContextTool: Send + Sync {
    /// Stable name used in configuration and in the context bundle.
    fn name(&self) -> &'static str;

    /// One-line description shown to the preflight tool selector.
    fn description(&self) -> &'static str;

    /// Gathers the tool's context text.
    async fn collect(&self) -> Result<String>;
}

/// A tool plus the settings that govern running it.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub tool: Arc<dyn ContextTool>,
    pub enabled: bool,
    pub timeout: Duration,
}

impl ToolDescriptor {
    pub fn new(tool: Arc<dyn ContextTool>, timeout: Duration) -> Self {
        Self { tool, enabled: true, timeout }
    }

    pub fn name(&self) -> &'static str {
        self.tool.name()
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name())
            .field("enabled", &self.enabled)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// All tools this build knows about.
pub fn builtin_tools(shell: &str) -> Vec<Arc<dyn ContextTool>> {
    vec![
        Arc::new(DirLister),
        Arc::new(EnvInspector),
        Arc::new(SystemInfo::new(shell)),
        Arc::new(ShellHistoryInspector::new(shell)),
        Arc::new(ProcessSniffer),
        Arc::new(NetworkInfo),
        Arc::new(GitRepoInfo),
    ]
}

/// Builds descriptors for every builtin tool, marking the configured ones
/// as enabled. Unknown names in `enabled` are reported and skipped.
pub fn descriptors(
    shell: &str,
    enabled: &[String],
    default_timeout: Duration,
    timeouts: &HashMap<String, u64>,
) -> Vec<ToolDescriptor> {
    let tools = builtin_tools(shell);
    for name in enabled {
        if !tools.iter().any(|t| t.name() == name) {
            warn!("Unknown context tool '{}' in configuration, ignoring", name);
        }
    }

    // Enabled tools keep their configured order, the rest follow.
    let mut result: Vec<ToolDescriptor> = Vec::with_capacity(tools.len());
    for name in enabled {
        if let Some(tool) = tools.iter().find(|t| t.name() == name) {
            if result.iter().any(|d| d.name() == tool.name()) {
                continue;
            }
            let timeout = timeouts.get(tool.name()).map(|s| Duration::from_secs(*s)).unwrap_or(default_timeout);
            result.push(ToolDescriptor::new(tool.clone(), timeout));
        }
    }
    for tool in tools {
        if !result.iter().any(|d| d.name() == tool.name()) {
            let timeout = timeouts.get(tool.name()).map(|s| Duration::from_secs(*s)).unwrap_or(default_timeout);
            result.push(ToolDescriptor { tool, enabled: false, timeout });
        }
    }
    result
}

/// Runs a program and returns its stdout. Non-zero exits are errors.
pub(crate) async fn command_output(program: &str, args: &[&str]) -> Result<String> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        return Err(anyhow!("{} exited with {}", program, output.status));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptors_follow_enabled_order() {
        let enabled = vec!["SystemInfo".to_string(), "DirLister".to_string()];
        let descriptors = descriptors("bash", &enabled, Duration::from_secs(5), &HashMap::new());

        assert_eq!(descriptors.len(), builtin_tools("bash").len());
        assert_eq!(descriptors[0].name(), "SystemInfo");
        assert_eq!(descriptors[1].name(), "DirLister");
        assert!(descriptors[0].enabled && descriptors[1].enabled);
        assert!(descriptors[2..].iter().all(|d| !d.enabled));
    }

    #[test]
    fn test_descriptors_apply_per_tool_timeouts() {
        let enabled = vec!["GitRepoInfo".to_string()];
        let mut timeouts = HashMap::new();
        timeouts.insert("GitRepoInfo".to_string(), 12);
        let descriptors = descriptors("bash", &enabled, Duration::from_secs(5), &timeouts);

        let git = descriptors.iter().find(|d| d.name() == "GitRepoInfo").unwrap();
        assert_eq!(git.timeout, Duration::from_secs(12));
        let dir = descriptors.iter().find(|d| d.name() == "DirLister").unwrap();
        assert_eq!(dir.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_descriptors_skip_unknown_names() {
        let enabled = vec!["NoSuchTool".to_string()];
        let descriptors = descriptors("bash", &enabled, Duration::from_secs(5), &HashMap::new());
        assert!(descriptors.iter().all(|d| !d.enabled));
    }

    #[tokio::test]
    async fn test_command_output_reports_failure() {
        assert!(command_output("sh", &["-c", "exit 3"]).await.is_err());
        assert_eq!(command_output("sh", &["-c", "echo ok"]).await.unwrap(), "ok\n");
    }
}
