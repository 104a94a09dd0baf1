//! Command-line argument parsing
//!
//! Global options describe where the shards and Sentinels live and how
//! long probes may take; each subcommand is one operation on the cluster.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use super::tls_config::TlsConfig;

/// Discover, bootstrap and register Sentinel-supervised Valkey shards
#[derive(Parser, Debug, Clone)]
#[command(name = "valkey-shard-topology")]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    // ===== Topology =====
    /// JSON topology file: {"shards": {"name": [urls]}, "sentinels": [urls]}
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Shard members as NAME=URL[,URL...] (can be specified multiple times)
    #[arg(long = "shard", global = true, action = clap::ArgAction::Append)]
    pub shards: Vec<String>,

    /// Sentinel connection string (can be specified multiple times)
    #[arg(long = "sentinel", global = true, action = clap::ArgAction::Append)]
    pub sentinels: Vec<String>,

    // ===== Connection Options =====
    /// Password for AUTH when the connection string carries none
    #[arg(short = 'a', long = "auth", global = true)]
    pub password: Option<String>,

    /// TCP connect timeout in milliseconds
    #[arg(long = "connect-timeout-ms", global = true, default_value_t = 5000)]
    pub connect_timeout_ms: u64,

    /// Per-command timeout in milliseconds
    #[arg(long = "command-timeout-ms", global = true, default_value_t = 5000)]
    pub command_timeout_ms: u64,

    /// Deadline for the whole operation in milliseconds
    #[arg(long = "timeout-ms", global = true, default_value_t = 30000)]
    pub timeout_ms: u64,

    /// How long to wait for any Sentinel to answer PING
    #[arg(long = "sentinel-ping-timeout-ms", global = true, default_value_t = 5000)]
    pub sentinel_ping_timeout_ms: u64,

    // ===== TLS Options =====
    /// Skip TLS certificate verification (insecure)
    #[arg(long = "tls-skip-verify", global = true)]
    pub tls_skip_verify: bool,

    /// CA certificate file for TLS
    #[arg(long = "tls-ca-cert", global = true)]
    pub tls_ca_cert: Option<PathBuf>,

    /// Client certificate file for TLS
    #[arg(long = "tls-cert", global = true)]
    pub tls_cert: Option<PathBuf>,

    /// Client private key file for TLS
    #[arg(long = "tls-key", global = true)]
    pub tls_key: Option<PathBuf>,

    /// Server Name Indication for TLS
    #[arg(long = "tls-sni", global = true)]
    pub tls_sni: Option<String>,

    // ===== Output Options =====
    #[arg(long = "output-format", global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub output_format: OutputFormat,

    /// Quiet mode (errors only)
    #[arg(short = 'q', long = "quiet", global = true)]
    pub quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Probe every configured node directly
    Discover {
        /// Also read `save` and `slave-read-only`
        #[arg(long = "config-probes")]
        config_probes: bool,
    },

    /// Ask a healthy Sentinel for the topology and verify it against the nodes
    SentinelDiscover {
        /// Stop after verifying each shard's master
        #[arg(long = "only-master")]
        only_master: bool,

        /// Also read `save` and `slave-read-only`
        #[arg(long = "config-probes")]
        config_probes: bool,
    },

    /// Wire freshly started nodes of one shard into master and slaves
    Init {
        /// Shard to bootstrap
        #[arg(long = "name")]
        shard: String,

        /// host:port of the member to promote
        #[arg(long = "master")]
        master: String,
    },

    /// Register every shard with Sentinel
    Monitor {
        #[arg(long = "quorum", default_value_t = 2)]
        quorum: u32,

        /// Value for down-after-milliseconds
        #[arg(long = "down-after-ms", default_value_t = 5000)]
        down_after_ms: u64,
    },

    /// Exit non-zero unless Sentinel monitors every shard
    CheckMonitoring,
}

/// Output format for results
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate argument combinations
    pub fn validate(&self) -> Result<(), String> {
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err("--tls-cert and --tls-key must both be specified".to_string());
        }

        if self.connect_timeout_ms == 0 || self.command_timeout_ms == 0 {
            return Err("timeouts must be at least 1ms".to_string());
        }

        if self.timeout_ms == 0 || self.sentinel_ping_timeout_ms == 0 {
            return Err("timeouts must be at least 1ms".to_string());
        }

        if let Command::Monitor { quorum: 0, .. } = self.command {
            return Err("--quorum must be at least 1".to_string());
        }

        for arg in &self.shards {
            parse_shard_arg(arg)?;
        }

        Ok(())
    }

    /// TLS settings, when any TLS flag was given
    pub fn tls_config(&self) -> Option<TlsConfig> {
        let any = self.tls_skip_verify
            || self.tls_ca_cert.is_some()
            || self.tls_cert.is_some()
            || self.tls_sni.is_some();
        any.then(|| TlsConfig {
            skip_verify: self.tls_skip_verify,
            ca_cert: self.tls_ca_cert.clone(),
            client_cert: self.tls_cert.clone(),
            client_key: self.tls_key.clone(),
            sni: self.tls_sni.clone(),
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn sentinel_ping_timeout(&self) -> Duration {
        Duration::from_millis(self.sentinel_ping_timeout_ms)
    }
}

/// Split `NAME=URL[,URL...]`
pub fn parse_shard_arg(arg: &str) -> Result<(String, Vec<String>), String> {
    let (name, urls) = arg
        .split_once('=')
        .ok_or_else(|| format!("--shard '{}': expected NAME=URL[,URL...]", arg))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("--shard '{}': empty shard name", arg));
    }
    let urls: Vec<String> = urls
        .split(',')
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .collect();
    if urls.is_empty() {
        return Err(format!("--shard '{}': no members", arg));
    }
    Ok((name.to_string(), urls))
}
