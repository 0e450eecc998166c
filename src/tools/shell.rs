use super::ContextTool;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use regex::RegexSet;
use std::path::PathBuf;

const MAX_COMMANDS: usize = 20;

/// Shows the user's most recent shell commands, with anything that looks
/// like a credential filtered out.
pub struct ShellHistoryInspector {
    shell: String,
}

impl ShellHistoryInspector {
    pub fn new(shell: &str) -> Self {
        Self { shell: shell.to_string() }
    }

    fn history_path(&self) -> Option<PathBuf> {
        if let Ok(path) = std::env::var("HISTFILE") {
            return Some(PathBuf::from(path));
        }
        let home = dirs::home_dir()?;
        let path = match self.shell.as_str() {
            "zsh" => home.join(".zsh_history"),
            "fish" => home.join(".local/share/fish/fish_history"),
            _ => home.join(".bash_history"),
        };
        Some(path)
    }
}

#[async_trait]
impl ContextTool for ShellHistoryInspector {
    fn name(&self) -> &'static str {
        "ShellHistoryInspector"
    }

    fn description(&self) -> &'static str {
        "Shows the most recent commands from the shell history"
    }

    async fn collect(&self) -> Result<String> {
        let path = self.history_path().ok_or_else(|| anyhow!("no home directory"))?;
        let bytes = tokio::fs::read(&path).await?;
        let content = String::from_utf8_lossy(&bytes);
        let commands = recent_commands(&self.shell, &content, MAX_COMMANDS)?;
        if commands.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("Recent commands ({}):\n{}\n", self.shell, commands.join("\n")))
    }
}

fn sensitive_patterns() -> Result<RegexSet> {
    let set = RegexSet::new([
        r"(?i)passw(or)?d",
        r"(?i)secret",
        r"(?i)token",
        r"(?i)api[_-]?key",
        r"(?i)authorization:",
        r"(?i)\bexport\s+\w*(KEY|TOKEN|SECRET)\w*=",
        r"://[^/\s:]+:[^@\s]+@",
    ])?;
    Ok(set)
}

fn parse_line(shell: &str, line: &str) -> Option<String> {
    let command = match shell {
        // ": 1700000000:0;ls -la"
        "zsh" if line.starts_with(": ") => line.split_once(';').map(|(_, c)| c)?,
        "fish" => line.strip_prefix("- cmd: ")?,
        _ if line.starts_with('#') => return None,
        _ => line,
    };
    let command = command.trim();
    (!command.is_empty()).then(|| command.to_string())
}

/// Returns up to `limit` of the newest commands, oldest first.
fn recent_commands(shell: &str, content: &str, limit: usize) -> Result<Vec<String>> {
    let filter = sensitive_patterns()?;
    let mut commands: Vec<String> = content
        .lines()
        .rev()
        .filter_map(|l| parse_line(shell, l))
        .filter(|c| !filter.is_match(c))
        .take(limit)
        .collect();
    commands.reverse();
    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_zsh_extended_history() {
        let content = ": 1700000000:0;ls -la\n: 1700000001:0;git status\n";
        assert_eq!(recent_commands("zsh", content, 10).unwrap(), vec!["ls -la", "git status"]);
    }

    #[test]
    fn test_parses_fish_history() {
        let content = "- cmd: cargo build\n  when: 1700000000\n- cmd: cargo test\n  when: 1700000001\n";
        assert_eq!(recent_commands("fish", content, 10).unwrap(), vec!["cargo build", "cargo test"]);
    }

    #[test]
    fn test_keeps_newest_commands_in_order() {
        let content = "one\ntwo\nthree\nfour\n";
        assert_eq!(recent_commands("bash", content, 2).unwrap(), vec!["three", "four"]);
    }

    #[test]
    fn test_filters_sensitive_commands() {
        let content = "export OPENAI_API_KEY=sk-1\n\
                       mysql -u root --password=hunter2\n\
                       curl https://user:pw@example.com\n\
                       curl -H 'Authorization: Bearer x' api\n\
                       ls\n";
        assert_eq!(recent_commands("bash", content, 10).unwrap(), vec!["ls"]);
    }

    #[test]
    fn test_skips_bash_timestamps() {
        let content = "#1700000000\nls\n";
        assert_eq!(recent_commands("bash", content, 10).unwrap(), vec!["ls"]);
    }
}
