use super::{ContextTool, command_output};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Write;

/// Process names worth pointing out: servers, databases, containers and
/// developer daemons the user is likely asking about.
const NOTABLE: [&str; 16] = [
    "docker", "containerd", "podman", "postgres", "mysqld", "mariadbd", "redis", "mongod", "nginx", "httpd",
    "apache2", "node", "python", "java", "sshd", "kubelet",
];

const MAX_ROWS: usize = 25;

/// Summarizes running processes, highlighting well-known services.
pub struct ProcessSniffer;

#[derive(Debug, PartialEq)]
struct ProcessRow {
    pid: u32,
    user: String,
    command: String,
}

#[async_trait]
impl ContextTool for ProcessSniffer {
    fn name(&self) -> &'static str {
        "ProcessSniffer"
    }

    fn description(&self) -> &'static str {
        "Lists running processes, highlighting servers, databases and containers"
    }

    async fn collect(&self) -> Result<String> {
        let table = command_output("ps", &["-eo", "pid=,user=,comm="]).await?;
        Ok(render(&parse_ps(&table)))
    }
}

fn parse_ps(table: &str) -> Vec<ProcessRow> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.parse().ok()?;
            let user = fields.next()?.to_string();
            let command = fields.collect::<Vec<_>>().join(" ");
            (!command.is_empty()).then_some(ProcessRow { pid, user, command })
        })
        .collect()
}

fn is_notable(command: &str) -> bool {
    let base = command.rsplit('/').next().unwrap_or(command);
    NOTABLE.iter().any(|n| base.starts_with(n))
}

fn render(rows: &[ProcessRow]) -> String {
    let mut out = format!("Total processes: {}\n", rows.len());
    let notable: Vec<&ProcessRow> = rows.iter().filter(|r| is_notable(&r.command)).collect();
    if notable.is_empty() {
        out.push_str("No notable services running\n");
        return out;
    }
    out.push_str("Notable processes:\n");
    for row in notable.iter().take(MAX_ROWS) {
        let _ = writeln!(out, "  {:>7} {:<12} {}", row.pid, row.user, row.command);
    }
    if notable.len() > MAX_ROWS {
        let _ = writeln!(out, "  ... and {} more", notable.len() - MAX_ROWS);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PS: &str = "      1 root     systemd\n    812 postgres postgres\n   1044 alice    /usr/bin/node\n   2001 alice    bash\n";

    #[test]
    fn test_parse_ps_rows() {
        let rows = parse_ps(PS);
        assert_eq!(rows.len(), 4);
        assert_eq!(
            rows[1],
            ProcessRow {
                pid: 812,
                user: "postgres".to_string(),
                command: "postgres".to_string()
            }
        );
    }

    #[test]
    fn test_render_highlights_notable_processes() {
        let text = render(&parse_ps(PS));
        assert!(text.starts_with("Total processes: 4\n"));
        assert!(text.contains("postgres"));
        assert!(text.contains("/usr/bin/node"));
        assert!(!text.contains("systemd"));
        assert!(!text.contains("bash"));
    }

    #[test]
    fn test_render_without_notable_processes() {
        let text = render(&parse_ps("1 root init\n"));
        assert!(text.contains("No notable services running"));
    }
}
