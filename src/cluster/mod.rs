//! Shard topology: nodes, shards, Sentinels and the cluster tying them together
//!
//! This module provides:
//! - Node discovery (ROLE and CONFIG probes) and bootstrap
//! - Shard discovery, direct or verified against Sentinel
//! - Master / read-only / writable replica queries
//! - Sentinel selection and shard registration

pub mod node;
pub mod options;
pub mod sentinel;
pub mod shard;
pub mod topology;

pub use node::{RedisServer, Role};
pub use options::DiscoveryOptions;
pub use sentinel::{MonitorSettings, SentinelServer};
pub use shard::Shard;
pub use topology::{Cluster, DEFAULT_SENTINEL_PING_TIMEOUT};
