//! valkey-shard-topology library
//!
//! Runtime topology management for sharded, Sentinel-supervised Valkey
//! deployments: which node of each shard is master, whether Sentinel's view
//! agrees with what the nodes report, bootstrapping fresh shards and
//! registering them with Sentinel.

pub mod client;
pub mod cluster;
pub mod config;
pub mod report;
pub mod utils;

pub use client::{ConnectionFactory, ConnectionPool};
pub use cluster::{Cluster, DiscoveryOptions, MonitorSettings, RedisServer, Role, SentinelServer, Shard};
pub use utils::{Context, MultiError, PartialError, TopologyError};
