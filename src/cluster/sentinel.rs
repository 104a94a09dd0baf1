//! Sentinel process handle
//!
//! A `SentinelServer` has no cached state of its own: every query goes to
//! the live Sentinel process through the pooled connection.

use std::sync::Arc;

use tracing::{debug, info};

use super::shard::Shard;
use crate::client::{Connection, ConnectionPool, SentinelMaster, SentinelSlave};
use crate::utils::{ClientError, Context, PartialError, TopologyError};

/// Sentinel parameter written after MONITOR
pub const DOWN_AFTER_MILLISECONDS: &str = "down-after-milliseconds";

/// Parameters used when registering a shard with Sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub quorum: u32,
    pub down_after_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            quorum: 2,
            down_after_ms: 5000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SentinelServer {
    connection: Arc<Connection>,
}

impl SentinelServer {
    pub fn new(
        pool: &ConnectionPool,
        connection_string: &str,
        alias: Option<&str>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            connection: pool.get_server(connection_string, alias)?,
        })
    }

    pub fn id(&self) -> String {
        self.connection.id()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn ping(&self, ctx: &Context) -> Result<(), ClientError> {
        self.connection.ping(ctx)
    }

    /// SENTINEL MASTER <name>
    pub fn master(&self, ctx: &Context, name: &str) -> Result<SentinelMaster, ClientError> {
        self.connection.sentinel_master(ctx, name)
    }

    /// SENTINEL MASTERS
    pub fn masters(&self, ctx: &Context) -> Result<Vec<SentinelMaster>, ClientError> {
        self.connection.sentinel_masters(ctx)
    }

    /// SENTINEL SLAVES <name>
    pub fn slaves(&self, ctx: &Context, name: &str) -> Result<Vec<SentinelSlave>, ClientError> {
        self.connection.sentinel_slaves(ctx, name)
    }

    /// Register every shard this Sentinel does not monitor yet.
    ///
    /// Already monitored shards are only read. On failure the names of
    /// shards registered before it are returned alongside the error; that
    /// progress is real and is not rolled back.
    pub fn monitor(
        &self,
        ctx: &Context,
        shards: &[Shard],
        settings: &MonitorSettings,
    ) -> Result<Vec<String>, PartialError> {
        let mut changed = Vec::new();

        for shard in shards {
            if let Err(e) = self.register(ctx, shard, settings, &mut changed) {
                return Err(PartialError { changed, source: e });
            }
        }
        Ok(changed)
    }

    fn register(
        &self,
        ctx: &Context,
        shard: &Shard,
        settings: &MonitorSettings,
        changed: &mut Vec<String>,
    ) -> Result<(), TopologyError> {
        let name = shard.name();
        match self.master(ctx, name) {
            Ok(_) => {
                debug!("Shard {} already monitored by {}", name, self.id());
                return Ok(());
            }
            Err(e) if e.is_no_such_master() => {}
            Err(e) => {
                return Err(TopologyError::SentinelQueryFailed {
                    shard: name.to_string(),
                    source: e,
                })
            }
        }

        let master = shard.get_master()?;
        let conn = master.connection();
        self.connection
            .sentinel_monitor(ctx, name, conn.host(), conn.port(), settings.quorum)
            .map_err(|e| TopologyError::node(self.id(), e))?;
        self.connection
            .sentinel_set(
                ctx,
                name,
                DOWN_AFTER_MILLISECONDS,
                &settings.down_after_ms.to_string(),
            )
            .map_err(|e| TopologyError::node(self.id(), e))?;

        info!("Sentinel {} now monitors shard {} at {}", self.id(), name, master.id());
        changed.push(name.to_string());
        Ok(())
    }

    /// True when every named shard is registered with this Sentinel
    pub fn is_monitoring_shards<S: AsRef<str>>(
        &self,
        ctx: &Context,
        names: &[S],
    ) -> Result<bool, TopologyError> {
        for name in names {
            let name = name.as_ref();
            match self.master(ctx, name) {
                Ok(_) => {}
                Err(e) if e.is_no_such_master() => {
                    debug!("Shard {} not monitored by {}", name, self.id());
                    return Ok(false);
                }
                Err(e) => {
                    return Err(TopologyError::SentinelQueryFailed {
                        shard: name.to_string(),
                        source: e,
                    })
                }
            }
        }
        Ok(true)
    }
}
