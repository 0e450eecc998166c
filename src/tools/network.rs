use super::{ContextTool, command_output};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt::Write;

/// Reports the hostname and locally listening ports.
pub struct NetworkInfo;

#[async_trait]
impl ContextTool for NetworkInfo {
    fn name(&self) -> &'static str {
        "NetworkInfo"
    }

    fn description(&self) -> &'static str {
        "Shows hostname and listening TCP/UDP ports"
    }

    async fn collect(&self) -> Result<String> {
        let hostname = command_output("hostname", &[]).await.unwrap_or_default();

        let listeners = match command_output("ss", &["-tulnH"]).await {
            Ok(table) => table,
            Err(_) => command_output("netstat", &["-tuln"])
                .await
                .map_err(|e| anyhow!("neither ss nor netstat is usable: {e}"))?,
        };

        let mut out = String::new();
        if !hostname.trim().is_empty() {
            let _ = writeln!(out, "Hostname: {}", hostname.trim());
        }
        let ports = listening_ports(&listeners);
        if ports.is_empty() {
            out.push_str("No listening ports\n");
        } else {
            let list: Vec<String> = ports.iter().map(|(proto, port)| format!("{port}/{proto}")).collect();
            let _ = writeln!(out, "Listening ports: {}", list.join(", "));
        }
        Ok(out)
    }
}

/// Extracts `(protocol, port)` pairs from `ss -tuln` or `netstat -tuln`
/// output.
fn listening_ports(table: &str) -> BTreeSet<(String, u16)> {
    let mut ports = BTreeSet::new();
    for line in table.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(proto) = fields.first() else {
            continue;
        };
        let proto = if proto.starts_with("tcp") {
            "tcp"
        } else if proto.starts_with("udp") {
            "udp"
        } else {
            continue;
        };
        // First field shaped like addr:port is the local address in both tools.
        let port = fields
            .iter()
            .skip(1)
            .find_map(|f| f.rsplit_once(':').and_then(|(_, p)| p.parse::<u16>().ok()));
        if let Some(port) = port {
            ports.insert((proto.to_string(), port));
        }
    }
    ports
}
