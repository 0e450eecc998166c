use super::ContextTool;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Write;

/// Variables reported with their values.
const REPORTED: [&str; 10] = [
    "SHELL", "HOME", "USER", "PWD", "LANG", "TERM", "EDITOR", "VIRTUAL_ENV", "CONDA_DEFAULT_ENV", "KUBECONFIG",
];

/// Substrings marking a variable whose value must never reach the model.
const SENSITIVE: [&str; 7] = ["KEY", "TOKEN", "SECRET", "PASSWORD", "PASSWD", "CREDENTIAL", "AUTH"];

const MAX_PATH_ENTRIES: usize = 30;

/// Reports PATH and a handful of environment variables that shape how
/// commands behave. Names of other variables are listed without values.
pub struct EnvInspector;

#[async_trait]
impl ContextTool for EnvInspector {
    fn name(&self) -> &'static str {
        "EnvInspector"
    }

    fn description(&self) -> &'static str {
        "Shows PATH, shell, user, locale and active virtual environments"
    }

    async fn collect(&self) -> Result<String> {
        Ok(render(std::env::vars().collect()))
    }
}

fn is_sensitive(name: &str) -> bool {
    let upper = name.to_uppercase();
    SENSITIVE.iter().any(|s| upper.contains(s))
}

fn render(mut vars: Vec<(String, String)>) -> String {
    vars.sort();
    let mut out = String::new();

    if let Some((_, path)) = vars.iter().find(|(k, _)| k == "PATH") {
        out.push_str("PATH:\n");
        let entries: Vec<&str> = path.split(':').filter(|p| !p.is_empty()).collect();
        for entry in entries.iter().take(MAX_PATH_ENTRIES) {
            let _ = writeln!(out, "  {entry}");
        }
        if entries.len() > MAX_PATH_ENTRIES {
            let _ = writeln!(out, "  ... and {} more", entries.len() - MAX_PATH_ENTRIES);
        }
    }

    for (name, value) in vars.iter().filter(|(k, _)| REPORTED.contains(&k.as_str())) {
        let _ = writeln!(out, "{name}={value}");
    }

    let others: Vec<&str> = vars
        .iter()
        .map(|(k, _)| k.as_str())
        .filter(|k| *k != "PATH" && !REPORTED.contains(k) && !is_sensitive(k))
        .collect();
    if !others.is_empty() {
        let _ = writeln!(out, "Other variables: {}", others.join(", "));
    }
    out
}
