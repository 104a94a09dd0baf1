//! Topology report - output formatting
//!
//! Supports two output formats:
//! - Text (human-readable)
//! - JSON

use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::Serialize;

use crate::cluster::{Cluster, RedisServer, Role, Shard};
use crate::config::OutputFormat;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServerReport {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub role: Role,
    /// Probed config values; absent keys were never probed
    pub config: BTreeMap<String, String>,
}

impl From<&RedisServer> for ServerReport {
    fn from(server: &RedisServer) -> Self {
        Self {
            id: server.id(),
            alias: server.alias(),
            role: server.role(),
            config: server
                .config()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ShardReport {
    pub name: String,
    /// Resolved master, when exactly one member reports it
    pub master: Option<String>,
    pub slaves_ro: Vec<String>,
    pub slaves_rw: Vec<String>,
    pub servers: Vec<ServerReport>,
}

impl From<&Shard> for ShardReport {
    fn from(shard: &Shard) -> Self {
        let ids = |servers: Vec<&RedisServer>| -> Vec<String> { servers.iter().map(|s| s.id()).collect() };
        Self {
            name: shard.name().to_string(),
            master: shard.get_master().ok().map(RedisServer::id),
            slaves_ro: ids(shard.get_slaves_ro()),
            slaves_rw: ids(shard.get_slaves_rw()),
            servers: shard.servers().iter().map(ServerReport::from).collect(),
        }
    }
}

/// Outcome of one operation plus the topology it left behind
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TopologyReport {
    pub operation: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Servers or shards reconfigured by the operation
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitored: Option<bool>,
    pub shards: Vec<ShardReport>,
    pub sentinels: Vec<String>,
}

impl TopologyReport {
    pub fn from_cluster(operation: &str, cluster: &Cluster) -> Self {
        Self {
            operation: operation.to_string(),
            ok: true,
            error: None,
            changed: Vec::new(),
            monitored: None,
            shards: cluster.shards().iter().map(ShardReport::from).collect(),
            sentinels: cluster.sentinels().iter().map(|s| s.id()).collect(),
        }
    }

    pub fn with_error(mut self, error: impl std::fmt::Display) -> Self {
        self.ok = false;
        self.error = Some(format!("{:#}", error));
        self
    }

    pub fn with_changed(mut self, changed: Vec<String>) -> Self {
        self.changed = changed;
        self
    }

    pub fn with_monitored(mut self, monitored: bool) -> Self {
        self.monitored = Some(monitored);
        self
    }
}

/// Topology reporter
pub struct TopologyReporter {
    format: OutputFormat,
}

impl TopologyReporter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn write<W: Write>(&self, out: &mut W, report: &TopologyReport) -> io::Result<()> {
        match self.format {
            OutputFormat::Text => self.write_text(out, report),
            OutputFormat::Json => self.write_json(out, report),
        }
    }

    /// Report to stdout
    pub fn print(&self, report: &TopologyReport) -> io::Result<()> {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        self.write(&mut out, report)
    }

    fn write_json<W: Write>(&self, out: &mut W, report: &TopologyReport) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *out, report)?;
        writeln!(out)
    }

    fn write_text<W: Write>(&self, out: &mut W, report: &TopologyReport) -> io::Result<()> {
        writeln!(out, "=== {} ===", report.operation)?;
        match &report.error {
            Some(err) => writeln!(out, "Status: FAILED ({})", err)?,
            None => writeln!(out, "Status: OK")?,
        }
        if !report.changed.is_empty() {
            writeln!(out, "Changed: {}", report.changed.join(", "))?;
        }
        if let Some(monitored) = report.monitored {
            writeln!(out, "Monitored by sentinel: {}", if monitored { "yes" } else { "no" })?;
        }
        if !report.sentinels.is_empty() {
            writeln!(out, "Sentinels: {}", report.sentinels.join(", "))?;
        }

        for shard in &report.shards {
            writeln!(out, "\nShard {}", shard.name)?;
            writeln!(out, "  master: {}", shard.master.as_deref().unwrap_or("-"))?;
            writeln!(out, "  slaves (ro): {}", list_or_dash(&shard.slaves_ro))?;
            writeln!(out, "  slaves (rw): {}", list_or_dash(&shard.slaves_rw))?;
            for server in &shard.servers {
                write!(out, "  - {:<21} {:<7}", server.id, server.role)?;
                if let Some(alias) = &server.alias {
                    write!(out, " [{}]", alias)?;
                }
                for (key, value) in &server.config {
                    write!(out, " {}={:?}", key, value)?;
                }
                writeln!(out)?;
            }
        }
        Ok(())
    }
}

fn list_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockConnector;
    use crate::client::ConnectionPool;
    use crate::cluster::DiscoveryOptions;
    use crate::utils::Context;
    use std::sync::Arc;

    fn discovered_cluster() -> Cluster {
        let mock = MockConnector::new();
        mock.add_master("10.0.0.1:6379");
        mock.add_slave("10.0.0.2:6379", "10.0.0.1:6379");
        mock.set_config("10.0.0.2:6379", "slave-read-only", "yes");

        let pool = Arc::new(ConnectionPool::new(Arc::new(mock)));
        let mut cluster = Cluster::new(pool);
        cluster
            .add_shard("shard01", &["redis://10.0.0.1:6379", "redis://10.0.0.2:6379"])
            .unwrap();
        cluster
            .discover(
                &Context::background(),
                DiscoveryOptions::ROLE | DiscoveryOptions::SLAVE_READ_ONLY,
            )
            .unwrap();
        cluster
    }

    #[test]
    fn test_report_from_cluster() {
        let report = TopologyReport::from_cluster("discover", &discovered_cluster());
        assert!(report.ok);
        let shard = &report.shards[0];
        assert_eq!(shard.master.as_deref(), Some("10.0.0.1:6379"));
        assert_eq!(shard.slaves_ro, vec!["10.0.0.2:6379".to_string()]);
        assert!(shard.slaves_rw.is_empty());
        assert_eq!(shard.servers[1].role, Role::Slave);
    }

    #[test]
    fn test_json_output() {
        let report = TopologyReport::from_cluster("discover", &discovered_cluster())
            .with_changed(vec!["shard01".to_string()]);
        let mut out = Vec::new();
        TopologyReporter::new(OutputFormat::Json)
            .write(&mut out, &report)
            .unwrap();

        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["operation"], "discover");
        assert_eq!(value["shards"][0]["servers"][0]["role"], "master");
        assert_eq!(value["changed"][0], "shard01");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_text_output_with_error() {
        let report = TopologyReport::from_cluster("sentinel-discover", &discovered_cluster())
            .with_error("no healthy sentinel available");
        let mut out = Vec::new();
        TopologyReporter::new(OutputFormat::Text)
            .write(&mut out, &report)
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Status: FAILED (no healthy sentinel available)"));
        assert!(text.contains("master: 10.0.0.1:6379"));
        assert!(text.contains("slave-read-only=\"yes\""));
    }
}
