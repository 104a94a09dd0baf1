//! One network endpoint and its administrative command surface
//!
//! A `Connection` is identified by `host:port`. The underlying client is
//! dialled lazily on the first command and discarded after a transport
//! failure, so the next command re-dials transparently.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::address::Endpoint;
use super::control_plane::{
    ControlPlane, ControlPlaneExt, RoleReply, SentinelMaster, SentinelSlave,
};
use crate::utils::{ClientError, Context};

/// Opens command channels to endpoints
///
/// Implemented by `ConnectionFactory` for real sockets; tests plug in an
/// in-memory implementation.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        endpoint: &Endpoint,
        ctx: &Context,
    ) -> Result<Box<dyn ControlPlane + Send>, ClientError>;

    /// Upper bound for a single command round-trip
    fn command_timeout(&self) -> Duration;
}

/// Shared handle to an endpoint, owned by the `ConnectionPool`
pub struct Connection {
    endpoint: Endpoint,
    alias: RwLock<Option<String>>,
    client: Mutex<Option<Box<dyn ControlPlane + Send>>>,
    connector: Arc<dyn Connector>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint.to_string())
            .field("alias", &*self.alias.read())
            .finish()
    }
}

impl Connection {
    pub(crate) fn new(
        endpoint: Endpoint,
        alias: Option<String>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            endpoint,
            alias: RwLock::new(alias),
            client: Mutex::new(None),
            connector,
        }
    }

    /// `host:port`
    pub fn id(&self) -> String {
        self.endpoint.id()
    }

    pub fn host(&self) -> &str {
        &self.endpoint.host
    }

    pub fn port(&self) -> u16 {
        self.endpoint.port
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn alias(&self) -> Option<String> {
        self.alias.read().clone()
    }

    /// Label the connection unless it already carries a label
    pub(crate) fn set_alias_if_absent(&self, alias: &str) {
        let mut current = self.alias.write();
        if current.is_none() {
            *current = Some(alias.to_string());
        }
    }

    /// Drop the underlying client; the next command re-dials
    pub fn close(&self) {
        self.client.lock().take();
    }

    /// Run a command against the endpoint under `ctx`
    pub fn run<T, F>(&self, ctx: &Context, f: F) -> Result<T, ClientError>
    where
        F: FnOnce(&mut dyn ControlPlane) -> Result<T, ClientError>,
    {
        ctx.err()?;

        let mut slot = self.client.lock();
        let mut client = match slot.take() {
            Some(client) => client,
            None => {
                debug!("Connecting to {}", self.endpoint);
                self.connector.connect(&self.endpoint, ctx)?
            }
        };

        client.set_io_timeout(ctx.bound(self.connector.command_timeout()))?;
        let result = f(client.as_mut());

        match &result {
            Err(e) if e.is_transport() => {
                debug!("Dropping connection to {}: {}", self.endpoint, e);
                // A probe cut short by the deadline reports the deadline
                ctx.err()?;
            }
            _ => *slot = Some(client),
        }
        result
    }

    pub fn ping(&self, ctx: &Context) -> Result<(), ClientError> {
        self.run(ctx, |c| c.ping())
    }

    pub fn role(&self, ctx: &Context) -> Result<RoleReply, ClientError> {
        self.run(ctx, |c| c.role())
    }

    pub fn config_get(&self, ctx: &Context, param: &str) -> Result<String, ClientError> {
        self.run(ctx, |c| c.config_get(param))
    }

    pub fn config_set(&self, ctx: &Context, param: &str, value: &str) -> Result<(), ClientError> {
        self.run(ctx, |c| c.config_set(param, value))
    }

    pub fn slave_of(&self, ctx: &Context, host: &str, port: u16) -> Result<(), ClientError> {
        self.run(ctx, |c| c.slave_of(host, port))
    }

    pub fn slave_of_no_one(&self, ctx: &Context) -> Result<(), ClientError> {
        self.run(ctx, |c| c.slave_of_no_one())
    }

    pub fn bgsave(&self, ctx: &Context) -> Result<(), ClientError> {
        self.run(ctx, |c| c.bgsave())
    }

    pub fn last_save(&self, ctx: &Context) -> Result<i64, ClientError> {
        self.run(ctx, |c| c.last_save())
    }

    pub fn sentinel_master(&self, ctx: &Context, name: &str) -> Result<SentinelMaster, ClientError> {
        self.run(ctx, |c| c.sentinel_master(name))
    }

    pub fn sentinel_masters(&self, ctx: &Context) -> Result<Vec<SentinelMaster>, ClientError> {
        self.run(ctx, |c| c.sentinel_masters())
    }

    pub fn sentinel_slaves(&self, ctx: &Context, name: &str) -> Result<Vec<SentinelSlave>, ClientError> {
        self.run(ctx, |c| c.sentinel_slaves(name))
    }

    pub fn sentinel_monitor(
        &self,
        ctx: &Context,
        name: &str,
        host: &str,
        port: u16,
        quorum: u32,
    ) -> Result<(), ClientError> {
        self.run(ctx, |c| c.sentinel_monitor(name, host, port, quorum))
    }

    pub fn sentinel_set(
        &self,
        ctx: &Context,
        name: &str,
        param: &str,
        value: &str,
    ) -> Result<(), ClientError> {
        self.run(ctx, |c| c.sentinel_set(name, param, value))
    }
}
