use super::{ContextTool, command_output};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Write;

/// Describes the operating system, architecture and shell commands will
/// run under.
pub struct SystemInfo {
    shell: String,
}

impl SystemInfo {
    pub fn new(shell: &str) -> Self {
        Self { shell: shell.to_string() }
    }
}

#[async_trait]
impl ContextTool for SystemInfo {
    fn name(&self) -> &'static str {
        "SystemInfo"
    }

    fn description(&self) -> &'static str {
        "Reports OS, distribution, kernel, architecture and shell"
    }

    async fn collect(&self) -> Result<String> {
        let mut out = String::new();
        let _ = writeln!(out, "OS: {}", std::env::consts::OS);
        let _ = writeln!(out, "Architecture: {}", std::env::consts::ARCH);

        if let Ok(release) = tokio::fs::read_to_string("/etc/os-release").await {
            if let Some(name) = pretty_name(&release) {
                let _ = writeln!(out, "Distribution: {name}");
            }
        }
        if let Ok(kernel) = command_output("uname", &["-sr"]).await {
            let _ = writeln!(out, "Kernel: {}", kernel.trim());
        }
        let _ = writeln!(out, "Shell: {}", self.shell);
        Ok(out)
    }
}

fn pretty_name(os_release: &str) -> Option<String> {
    os_release
        .lines()
        .find_map(|l| l.strip_prefix("PRETTY_NAME="))
        .map(|v| v.trim_matches('"').to_string())
}
