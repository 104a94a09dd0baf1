//! Shard membership, discovery and bootstrap
//!
//! Membership is append-only: servers are added from the static topology
//! or when Sentinel reports an address the shard did not know, and are
//! never removed by discovery. [`Shard::add_server`] is the only place
//! that grows the member list.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::node::{RedisServer, Role, SLAVE_READ_ONLY_KEY};
use super::options::DiscoveryOptions;
use super::sentinel::SentinelServer;
use crate::client::{ConnectionPool, Endpoint};
use crate::utils::{Context, MultiError, PartialError, Result, TopologyError};

pub struct Shard {
    name: String,
    servers: Vec<RedisServer>,
    pool: Arc<ConnectionPool>,
}

impl fmt::Debug for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shard")
            .field("name", &self.name)
            .field("servers", &self.servers)
            .finish()
    }
}

impl Shard {
    /// Build a shard from its configured connection strings.
    ///
    /// Duplicate addresses collapse into a single member.
    pub fn new<S: AsRef<str>>(
        name: &str,
        connection_strings: &[S],
        pool: Arc<ConnectionPool>,
    ) -> Result<Self> {
        let mut shard = Self {
            name: name.to_string(),
            servers: Vec::with_capacity(connection_strings.len()),
            pool,
        };
        for url in connection_strings {
            shard.add_server(url.as_ref())?;
        }
        Ok(shard)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Members in insertion order
    pub fn servers(&self) -> &[RedisServer] {
        &self.servers
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.servers.iter().position(|s| s.id() == id)
    }

    /// Member with identity `host_port`, if known
    pub fn server(&self, host_port: &str) -> Option<&RedisServer> {
        self.position(host_port).map(|i| &self.servers[i])
    }

    /// Add a member from a connection string; an already known address is
    /// returned as is
    pub fn add_server(&mut self, connection_string: &str) -> Result<&mut RedisServer> {
        let alias = format!("{}-{}", self.name, self.servers.len());
        let server = RedisServer::from_pool(&self.pool, connection_string, Some(&alias))?;
        Ok(self.insert(server))
    }

    fn insert(&mut self, server: RedisServer) -> &mut RedisServer {
        let i = match self.position(&server.id()) {
            Some(i) => i,
            None => {
                debug!("Shard {} adds server {}", self.name, server.id());
                self.servers.push(server);
                self.servers.len() - 1
            }
        };
        &mut self.servers[i]
    }

    /// Member with identity `host_port`, added to the shard when unknown.
    ///
    /// A new member inherits scheme, credentials and db from the first
    /// configured member.
    pub fn get_server_by_id(&mut self, host_port: &str) -> Result<&mut RedisServer> {
        self.get_or_learn(host_port, None)
    }

    fn get_or_learn(
        &mut self,
        host_port: &str,
        fallback: Option<&Endpoint>,
    ) -> Result<&mut RedisServer> {
        if let Some(i) = self.position(host_port) {
            return Ok(&mut self.servers[i]);
        }

        let template = self
            .servers
            .first()
            .map(|s| s.connection().endpoint())
            .or(fallback);
        let endpoint = match template {
            Some(template) => template.with_host_port(host_port)?,
            None => Endpoint::from_host_port(host_port)?,
        };

        info!("Shard {} learned new server {}", self.name, host_port);
        let alias = format!("{}-{}", self.name, self.servers.len());
        let server = RedisServer::new(self.pool.get_endpoint(endpoint, Some(&alias)));
        Ok(self.insert(server))
    }

    /// Only the Sentinel-confirmed master may keep the master role
    fn forget_other_masters(&mut self, confirmed: &str) {
        for server in &mut self.servers {
            if server.role() == Role::Master && server.id() != confirmed {
                debug!("Shard {}: {} is no longer master", self.name, server.id());
                server.set_role(Role::Unknown);
            }
        }
    }

    fn check_master_count(&self) -> Result<()> {
        let count = self
            .servers
            .iter()
            .filter(|s| s.role() == Role::Master)
            .count();
        if count > 1 {
            return Err(TopologyError::WrongMasterCount {
                shard: self.name.clone(),
                count,
            });
        }
        Ok(())
    }

    /// Refresh every member.
    ///
    /// Without a Sentinel each member is probed directly. With one, the
    /// Sentinel's view decides which member is master and each reported
    /// member's self-report must agree with it.
    pub fn discover(
        &mut self,
        ctx: &Context,
        sentinel: Option<&SentinelServer>,
        opts: DiscoveryOptions,
    ) -> Result<()> {
        match sentinel {
            Some(sentinel) => self.discover_with_sentinel(ctx, sentinel, opts),
            None => self.discover_direct(ctx, opts),
        }
    }

    fn discover_direct(&mut self, ctx: &Context, opts: DiscoveryOptions) -> Result<()> {
        let mut errors = MultiError::new();
        for server in &mut self.servers {
            if let Err(e) = ctx.err() {
                errors.push(e.into());
                break;
            }
            if let Err(e) = server.discover(ctx, opts) {
                warn!("Discovery of {} in shard {} failed: {}", server.id(), self.name, e);
                errors.push(e);
            }
        }
        if let Err(e) = self.check_master_count() {
            errors.push(e);
        }
        errors.into_result()
    }

    fn discover_with_sentinel(
        &mut self,
        ctx: &Context,
        sentinel: &SentinelServer,
        opts: DiscoveryOptions,
    ) -> Result<()> {
        ctx.err()?;
        let name = self.name.clone();
        let query_failed = |source| TopologyError::SentinelQueryFailed {
            shard: name.clone(),
            source,
        };

        let reported = sentinel.master(ctx, &name).map_err(query_failed)?;
        debug!(
            "Sentinel {} reports master {} for shard {} ({})",
            sentinel.id(),
            reported.address(),
            name,
            reported.flags
        );

        let confirmed = reported.address();
        let sentinel_endpoint = sentinel.connection().endpoint();
        self.forget_other_masters(&confirmed);
        let master = self.get_or_learn(&confirmed, Some(sentinel_endpoint))?;
        if reported.is_down() {
            master.set_role(Role::Unknown);
            return Err(TopologyError::MasterDown {
                shard: name,
                server: master.id(),
                flags: reported.flags,
            });
        }
        probe_converged(master, ctx, opts, Role::Master)?;

        if opts.contains(DiscoveryOptions::ONLY_MASTER) {
            return Ok(());
        }

        let slaves = sentinel.slaves(ctx, &name).map_err(query_failed)?;
        let mut errors = MultiError::new();
        for slave in slaves {
            if let Err(e) = ctx.err() {
                errors.push(e.into());
                break;
            }
            let server = match self.get_or_learn(&slave.address(), Some(sentinel_endpoint)) {
                Ok(server) => server,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            if slave.is_down() {
                server.set_role(Role::Unknown);
                warn!("Skipping slave {} of shard {}: flagged {}", server.id(), name, slave.flags);
                errors.push(TopologyError::SlaveDown {
                    shard: name.clone(),
                    server: server.id(),
                    flags: slave.flags,
                });
                continue;
            }
            if let Err(e) = probe_converged(server, ctx, opts, Role::Slave) {
                warn!("Slave {} of shard {} failed discovery: {}", server.id(), name, e);
                errors.push(e);
            }
        }
        if let Err(e) = self.check_master_count() {
            errors.push(e);
        }
        errors.into_result()
    }

    /// The single member reporting `Master`
    pub fn get_master(&self) -> Result<&RedisServer> {
        let masters: Vec<&RedisServer> = self
            .servers
            .iter()
            .filter(|s| s.role() == Role::Master)
            .collect();
        match masters.as_slice() {
            [master] => Ok(*master),
            _ => Err(TopologyError::WrongMasterCount {
                shard: self.name.clone(),
                count: masters.len(),
            }),
        }
    }

    fn slaves_with_read_only(&self, read_only: &str) -> Vec<&RedisServer> {
        let mut slaves: Vec<&RedisServer> = self
            .servers
            .iter()
            .filter(|s| s.role() == Role::Slave)
            .filter(|s| s.config_value(SLAVE_READ_ONLY_KEY) == Some(read_only))
            .collect();
        slaves.sort_by_key(|s| s.id());
        slaves
    }

    /// Slaves probed with `slave-read-only no`, sorted by identity
    pub fn get_slaves_rw(&self) -> Vec<&RedisServer> {
        self.slaves_with_read_only("no")
    }

    /// Slaves probed with `slave-read-only yes`, sorted by identity
    pub fn get_slaves_ro(&self) -> Vec<&RedisServer> {
        self.slaves_with_read_only("yes")
    }

    /// Bootstrap freshly started members into one master and its slaves.
    ///
    /// Returns the identities of members that were actually reconfigured.
    /// Members that were already wired are only read.
    pub fn init(
        &mut self,
        ctx: &Context,
        master_host_port: &str,
    ) -> std::result::Result<Vec<String>, PartialError> {
        let mut changed = Vec::new();

        let Some(master_idx) = self.position(master_host_port) else {
            return Err(PartialError {
                changed,
                source: TopologyError::ServerNotFound {
                    shard: self.name.clone(),
                    server: master_host_port.to_string(),
                },
            });
        };

        match self.servers[master_idx].init_master(ctx) {
            Ok(true) => changed.push(master_host_port.to_string()),
            Ok(false) => {}
            Err(e) => return Err(PartialError { changed, source: e }),
        }
        let master = self.servers[master_idx].clone();

        let mut errors = MultiError::new();
        for (i, server) in self.servers.iter_mut().enumerate() {
            if i == master_idx {
                continue;
            }
            if let Err(e) = ctx.err() {
                errors.push(e.into());
                break;
            }
            match server.init_slave(ctx, &master) {
                Ok(true) => changed.push(server.id()),
                Ok(false) => {}
                Err(e) => {
                    warn!("Init of {} in shard {} failed: {}", server.id(), self.name, e);
                    errors.push(e);
                }
            }
        }

        match errors.into_result() {
            Ok(()) => Ok(changed),
            Err(source) => Err(PartialError { changed, source }),
        }
    }
}

/// Probe `server` and require its self-reported role to match `expected`.
/// On disagreement the role is reset to `Unknown`.
fn probe_converged(
    server: &mut RedisServer,
    ctx: &Context,
    opts: DiscoveryOptions,
    expected: Role,
) -> Result<()> {
    server.discover(ctx, DiscoveryOptions::ROLE)?;

    let actual = server.role();
    if actual != expected {
        server.set_role(Role::Unknown);
        return Err(TopologyError::RoleMismatch {
            server: server.id(),
            expected,
            actual,
        });
    }

    let rest = opts
        .without(DiscoveryOptions::ROLE)
        .without(DiscoveryOptions::ONLY_MASTER);
    server.discover(ctx, rest)
}
