use super::{ContextTool, command_output};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Write;

const MAX_STATUS_LINES: usize = 20;

/// Describes the git repository containing the working directory, if any.
pub struct GitRepoInfo;

#[async_trait]
impl ContextTool for GitRepoInfo {
    fn name(&self) -> &'static str {
        "GitRepoInfo"
    }

    fn description(&self) -> &'static str {
        "Shows git branch, remotes, recent commits and working tree status"
    }

    async fn collect(&self) -> Result<String> {
        let inside = command_output("git", &["rev-parse", "--is-inside-work-tree"]).await;
        if !matches!(inside.as_deref().map(str::trim), Ok("true")) {
            return Ok("Not inside a git repository\n".to_string());
        }

        let (branch, remotes, log, status) = tokio::join!(
            command_output("git", &["branch", "--show-current"]),
            command_output("git", &["remote", "-v"]),
            command_output("git", &["log", "--oneline", "-5"]),
            command_output("git", &["status", "--porcelain"]),
        );

        let mut out = String::new();
        let branch = branch.unwrap_or_default();
        let branch = branch.trim();
        let _ = writeln!(out, "Branch: {}", if branch.is_empty() { "(detached)" } else { branch });

        let remotes = fetch_remotes(&remotes.unwrap_or_default());
        if !remotes.is_empty() {
            let _ = writeln!(out, "Remotes: {}", remotes.join(", "));
        }

        let log = log.unwrap_or_default();
        if !log.trim().is_empty() {
            out.push_str("Recent commits:\n");
            for line in log.lines() {
                let _ = writeln!(out, "  {line}");
            }
        }

        out.push_str(&summarize_status(&status.unwrap_or_default()));
        Ok(out)
    }
}

/// `name url` pairs from `git remote -v`, fetch side only.
fn fetch_remotes(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|l| l.ends_with("(fetch)"))
        .filter_map(|l| {
            let mut parts = l.split_whitespace();
            Some(format!("{} {}", parts.next()?, parts.next()?))
        })
        .collect()
}

fn summarize_status(porcelain: &str) -> String {
    let lines: Vec<&str> = porcelain.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return "Working tree clean\n".to_string();
    }
    let mut out = format!("Changed files ({}):\n", lines.len());
    for line in lines.iter().take(MAX_STATUS_LINES) {
        let _ = writeln!(out, "  {line}");
    }
    if lines.len() > MAX_STATUS_LINES {
        let _ = writeln!(out, "  ... and {} more", lines.len() - MAX_STATUS_LINES);
    }
    out
}
