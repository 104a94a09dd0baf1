//! valkey-shard-topology - topology manager for Sentinel-supervised Valkey shards
//!
//! Discovers masters and replicas, bootstraps fresh shards and registers
//! them with Sentinel. Every operation prints the topology it observed,
//! including after a failure.

use std::sync::Arc;

use anyhow::{anyhow, Context as _, Result};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use valkey_shard_topology::client::{ConnectionFactory, ConnectionPool};
use valkey_shard_topology::cluster::{Cluster, DiscoveryOptions, MonitorSettings};
use valkey_shard_topology::config::{CliArgs, Command, TopologyConfig};
use valkey_shard_topology::report::{TopologyReport, TopologyReporter};
use valkey_shard_topology::utils::Context;

fn setup_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn discovery_options(config_probes: bool, only_master: bool) -> DiscoveryOptions {
    let mut opts = DiscoveryOptions::ROLE;
    if config_probes {
        opts = opts | DiscoveryOptions::SAVE_CONFIG | DiscoveryOptions::SLAVE_READ_ONLY;
    }
    if only_master {
        opts = opts | DiscoveryOptions::ONLY_MASTER;
    }
    opts
}

fn outcome(report: TopologyReport, result: Result<()>) -> (TopologyReport, Result<()>) {
    match result {
        Ok(()) => (report, Ok(())),
        Err(e) => (report.with_error(&e), Err(e)),
    }
}

fn execute(cluster: &mut Cluster, ctx: &Context, command: &Command) -> (TopologyReport, Result<()>) {
    match command {
        Command::Discover { config_probes } => {
            let result = cluster.discover(ctx, discovery_options(*config_probes, false));
            let report = TopologyReport::from_cluster("discover", cluster);
            outcome(report, result.map_err(Into::into))
        }

        Command::SentinelDiscover {
            only_master,
            config_probes,
        } => {
            let opts = discovery_options(*config_probes, *only_master);
            let result = cluster.sentinel_discover(ctx, opts);
            let report = TopologyReport::from_cluster("sentinel-discover", cluster);
            outcome(report, result.map_err(Into::into))
        }

        Command::Init { shard, master } => match cluster.init_shard(ctx, shard, master) {
            Ok(changed) => {
                info!("Shard {} initialized, {} server(s) changed", shard, changed.len());
                let report = TopologyReport::from_cluster("init", cluster).with_changed(changed);
                (report, Ok(()))
            }
            Err(e) => {
                let report =
                    TopologyReport::from_cluster("init", cluster).with_changed(e.changed.clone());
                outcome(report, Err(e.into()))
            }
        },

        Command::Monitor {
            quorum,
            down_after_ms,
        } => {
            let settings = MonitorSettings {
                quorum: *quorum,
                down_after_ms: *down_after_ms,
            };
            // Registration needs each shard's master; shards without one
            // fail inside monitor
            if let Err(e) = cluster.discover(ctx, DiscoveryOptions::ROLE) {
                warn!("Discovery before registration incomplete: {}", e);
            }
            match cluster.monitor(ctx, &settings) {
                Ok(changed) => {
                    info!("{} shard(s) newly registered with sentinel", changed.len());
                    let report = TopologyReport::from_cluster("monitor", cluster).with_changed(changed);
                    (report, Ok(()))
                }
                Err(e) => {
                    let report = TopologyReport::from_cluster("monitor", cluster)
                        .with_changed(e.changed.clone());
                    outcome(report, Err(e.into()))
                }
            }
        }

        Command::CheckMonitoring => {
            let report = TopologyReport::from_cluster("check-monitoring", cluster);
            match cluster.is_monitored(ctx) {
                Ok(true) => (report.with_monitored(true), Ok(())),
                Ok(false) => outcome(
                    report.with_monitored(false),
                    Err(anyhow!("Not every shard is monitored by sentinel")),
                ),
                Err(e) => outcome(report, Err(e.into())),
            }
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse_args();

    // Setup logging
    setup_logging(args.verbose, args.quiet);

    args.validate()
        .map_err(|e| anyhow!("Configuration error: {}", e))?;
    let topology = TopologyConfig::from_cli(&args)
        .map_err(|e| anyhow!("Configuration error: {}", e))?;

    let factory = ConnectionFactory {
        connect_timeout: args.connect_timeout(),
        command_timeout: args.command_timeout(),
        tls_config: args.tls_config(),
        default_password: args.password.clone(),
    };
    let pool = Arc::new(ConnectionPool::new(Arc::new(factory)));
    let mut cluster = Cluster::from_config(&topology, Arc::clone(&pool))
        .context("Failed to build cluster")?
        .with_sentinel_ping_timeout(args.sentinel_ping_timeout());
    info!(
        "{} shard(s), {} sentinel(s)",
        cluster.shards().len(),
        cluster.sentinels().len()
    );

    let ctx = Context::background().with_timeout(args.timeout());
    let (report, result) = execute(&mut cluster, &ctx, &args.command);

    TopologyReporter::new(args.output_format)
        .print(&report)
        .context("Failed to write report")?;
    pool.close_all();

    result
}

fn main() {
    if let Err(e) = run() {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
