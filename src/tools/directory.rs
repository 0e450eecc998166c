use super::ContextTool;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::fmt::Write;
use std::path::Path;

const MAX_ENTRIES: usize = 100;

/// Lists the non-hidden entries of the current working directory.
pub struct DirLister;

#[derive(Debug, PartialEq)]
struct Entry {
    name: String,
    kind: &'static str,
    size: u64,
    modified: Option<DateTime<Local>>,
}

#[async_trait]
impl ContextTool for DirLister {
    fn name(&self) -> &'static str {
        "DirLister"
    }

    fn description(&self) -> &'static str {
        "Lists files and directories in the current working directory"
    }

    async fn collect(&self) -> Result<String> {
        let cwd = std::env::current_dir()?;
        let entries = list_entries(&cwd).await?;
        Ok(render(&cwd, &entries))
    }
}

async fn list_entries(dir: &Path) -> Result<Vec<Entry>> {
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    while let Some(item) = read_dir.next_entry().await? {
        let name = item.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let Ok(meta) = item.metadata().await else {
            continue;
        };
        entries.push(Entry {
            name,
            kind: kind_of(&meta),
            size: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Local>::from),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn kind_of(meta: &std::fs::Metadata) -> &'static str {
    if meta.is_dir() {
        return "dir";
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 != 0 {
            return "exec";
        }
    }
    "file"
}

fn render(cwd: &Path, entries: &[Entry]) -> String {
    let mut out = format!("Current directory: {}\n", cwd.display());
    if entries.is_empty() {
        out.push_str("(empty)\n");
        return out;
    }
    for entry in entries.iter().take(MAX_ENTRIES) {
        let modified = entry
            .modified
            .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<5} {:>9} {} {}",
            entry.kind,
            human_size(entry.size),
            modified,
            entry.name
        );
    }
    if entries.len() > MAX_ENTRIES {
        let _ = writeln!(out, "... and {} more", entries.len() - MAX_ENTRIES);
    }
    out
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "K", "M", "G"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{size:.1}{}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512B");
        assert_eq!(human_size(2048), "2.0K");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0M");
    }

    #[tokio::test]
    async fn test_list_entries_skips_hidden_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "hello").unwrap();
        std::fs::write(dir.path().join(".secret"), "x").unwrap();
        std::fs::create_dir(dir.path().join("a_dir")).unwrap();

        let entries = list_entries(dir.path()).await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a_dir", "b.txt"]);
        assert_eq!(entries[0].kind, "dir");
        assert_eq!(entries[1].kind, "file");
        assert_eq!(entries[1].size, 5);
    }

    #[test]
    fn test_render_caps_entry_count() {
        let entries: Vec<Entry> = (0..MAX_ENTRIES + 3)
            .map(|i| Entry {
                name: format!("f{i}"),
                kind: "file",
                size: 1,
                modified: None,
            })
            .collect();
        let text = render(Path::new("/tmp"), &entries);
        assert!(text.starts_with("Current directory: /tmp\n"));
        assert!(text.ends_with("... and 3 more\n"));
    }
}
