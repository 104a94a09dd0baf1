//! Store node representation
//!
//! A `RedisServer` pairs a pooled connection with what discovery learned
//! about the node: its replication role and any probed config values.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::options::DiscoveryOptions;
use crate::client::{Connection, ConnectionPool, RoleReply};
use crate::utils::{ClientError, Context, Result, TopologyError};

/// Config key probed by `DiscoveryOptions::SAVE_CONFIG`
pub const SAVE_CONFIG_KEY: &str = "save";
/// Config key probed by `DiscoveryOptions::SLAVE_READ_ONLY`
pub const SLAVE_READ_ONLY_KEY: &str = "slave-read-only";

/// Replication role of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Unknown,
    Master,
    Slave,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Unknown => "unknown",
            Role::Master => "master",
            Role::Slave => "slave",
        };
        f.pad(s)
    }
}

/// A store node within a shard
#[derive(Debug, Clone)]
pub struct RedisServer {
    connection: Arc<Connection>,
    role: Role,
    config: HashMap<String, String>,
}

impl RedisServer {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self {
            connection,
            role: Role::Unknown,
            config: HashMap::new(),
        }
    }

    /// Resolve the connection through the pool and wrap it
    pub fn from_pool(
        pool: &ConnectionPool,
        connection_string: &str,
        alias: Option<&str>,
    ) -> std::result::Result<Self, ClientError> {
        Ok(Self::new(pool.get_server(connection_string, alias)?))
    }

    /// `host:port`
    pub fn id(&self) -> String {
        self.connection.id()
    }

    pub fn alias(&self) -> Option<String> {
        self.connection.alias()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    /// Every config value probed so far, including empty ones
    pub fn config(&self) -> &HashMap<String, String> {
        &self.config
    }

    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    /// Probe ROLE; a failed probe leaves the role `Unknown`
    fn probe_role(&mut self, ctx: &Context) -> Result<RoleReply> {
        match self.connection.role(ctx) {
            Ok(reply) => {
                self.role = reply.role;
                Ok(reply)
            }
            Err(e) => {
                self.role = Role::Unknown;
                Err(TopologyError::node(self.id(), e))
            }
        }
    }

    fn probe_config(&mut self, ctx: &Context, key: &str) -> Result<()> {
        let value = self
            .connection
            .config_get(ctx, key)
            .map_err(|e| TopologyError::node(self.id(), e))?;
        self.config.insert(key.to_string(), value);
        Ok(())
    }

    /// Refresh the probes selected by `opts`.
    ///
    /// The role is probed first; when it fails no config probe is attempted.
    pub fn discover(&mut self, ctx: &Context, opts: DiscoveryOptions) -> Result<()> {
        debug!("Discovering {} ({})", self.id(), opts);

        if opts.contains(DiscoveryOptions::ROLE) {
            self.probe_role(ctx)?;
        }
        if opts.contains(DiscoveryOptions::SAVE_CONFIG) {
            self.probe_config(ctx, SAVE_CONFIG_KEY)?;
        }
        if opts.contains(DiscoveryOptions::SLAVE_READ_ONLY) {
            self.probe_config(ctx, SLAVE_READ_ONLY_KEY)?;
        }
        Ok(())
    }

    /// Promote a freshly started node to master.
    ///
    /// Returns `true` when `SLAVEOF NO ONE` was issued; a node that is
    /// already a master, or a replica of anything but loopback, is left
    /// untouched.
    pub fn init_master(&mut self, ctx: &Context) -> Result<bool> {
        let reply = self.probe_role(ctx)?;
        if !reply.is_unconfigured() {
            return Ok(false);
        }

        self.connection
            .slave_of_no_one(ctx)
            .map_err(|e| TopologyError::node(self.id(), e))?;
        self.role = Role::Master;
        info!("Promoted {} to master", self.id());
        Ok(true)
    }

    /// Point a freshly started node at `master`.
    ///
    /// The master must currently report itself as master, otherwise
    /// `MasterNotReady` is returned and nothing is written.
    pub fn init_slave(&mut self, ctx: &Context, master: &RedisServer) -> Result<bool> {
        let reply = self.probe_role(ctx)?;
        if !reply.is_unconfigured() {
            return Ok(false);
        }

        let master_role = master
            .connection
            .role(ctx)
            .map_err(|e| TopologyError::node(master.id(), e))?;
        if master_role.role != Role::Master {
            return Err(TopologyError::MasterNotReady {
                master: master.id(),
                role: master_role.role,
            });
        }

        self.connection
            .slave_of(ctx, master.connection.host(), master.connection.port())
            .map_err(|e| TopologyError::node(self.id(), e))?;
        self.role = Role::Slave;
        info!("Configured {} as slave of {}", self.id(), master.id());
        Ok(true)
    }
}
