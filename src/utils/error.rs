//! Error types for valkey-shard-topology

use std::fmt;
use std::io;
use thiserror::Error;

use crate::cluster::Role;

/// Error reply Sentinel returns for a shard it does not monitor
pub const NO_SUCH_MASTER: &str = "ERR No such master with that name";

/// Why a [`Context`](super::Context) is done
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Errors from a single command probe against one endpoint
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Malformed address '{address}': {reason}")]
    MalformedAddress { address: String, reason: String },

    #[error("Failed to connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        source: io::Error,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Error reply from the server, verbatim
    #[error("{0}")]
    Server(String),

    #[error("Unexpected {command} reply: {reply}")]
    UnexpectedReply { command: String, reply: String },

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl ClientError {
    pub(crate) fn unexpected(command: &str, reply: impl fmt::Debug) -> Self {
        ClientError::UnexpectedReply {
            command: command.to_string(),
            reply: format!("{:?}", reply),
        }
    }

    /// True when Sentinel answered that the shard is not monitored
    pub fn is_no_such_master(&self) -> bool {
        matches!(self, ClientError::Server(msg) if msg == NO_SUCH_MASTER)
    }

    /// True for failures of the link itself, after which the client is discarded
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::ConnectFailed { .. } | ClientError::Tls(_)
        )
    }
}

/// Errors from discovery, bootstrap and registration of shards
#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("{server}: {source}")]
    Node {
        server: String,
        #[source]
        source: ClientError,
    },

    #[error("sentinel query failed for shard {shard}: {source}")]
    SentinelQueryFailed {
        shard: String,
        #[source]
        source: ClientError,
    },

    #[error("sentinel {sentinel} could not list monitored shards: {source}")]
    SentinelListFailed {
        sentinel: String,
        #[source]
        source: ClientError,
    },

    #[error("master {server} of shard {shard} is flagged down by sentinel ({flags})")]
    MasterDown {
        shard: String,
        server: String,
        flags: String,
    },

    #[error("slave {server} of shard {shard} is flagged down by sentinel ({flags})")]
    SlaveDown {
        shard: String,
        server: String,
        flags: String,
    },

    #[error("sentinel not converged: {server} reports role {actual}, sentinel expects {expected}")]
    RoleMismatch {
        server: String,
        expected: Role,
        actual: Role,
    },

    #[error("master {master} is not ready (reports role {role})")]
    MasterNotReady { master: String, role: Role },

    #[error("shard {shard} has {count} masters, expected exactly one")]
    WrongMasterCount { shard: String, count: usize },

    #[error("no healthy sentinel available")]
    NoHealthySentinel,

    #[error("server {server} not found in shard {shard}")]
    ServerNotFound { shard: String, server: String },

    #[error("shard {shard} is not part of the cluster")]
    ShardNotFound { shard: String },

    #[error("shard {shard}: {source}")]
    Shard {
        shard: String,
        #[source]
        source: Box<TopologyError>,
    },

    #[error(transparent)]
    Multi(#[from] MultiError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl TopologyError {
    pub(crate) fn node(server: impl Into<String>, source: ClientError) -> Self {
        TopologyError::Node {
            server: server.into(),
            source,
        }
    }

    pub(crate) fn in_shard(shard: &str, source: TopologyError) -> Self {
        TopologyError::Shard {
            shard: shard.to_string(),
            source: Box::new(source),
        }
    }

    /// Errors that usually clear up on their own once Sentinel's view and
    /// the nodes' self-reports agree again
    pub fn is_retryable(&self) -> bool {
        match self {
            TopologyError::RoleMismatch { .. }
            | TopologyError::WrongMasterCount { .. }
            | TopologyError::MasterNotReady { .. }
            | TopologyError::MasterDown { .. }
            | TopologyError::SlaveDown { .. } => true,
            TopologyError::Shard { source, .. } => source.is_retryable(),
            TopologyError::Multi(multi) => {
                !multi.is_empty() && multi.errors().iter().all(TopologyError::is_retryable)
            }
            _ => false,
        }
    }
}

/// Aggregate of independent failures collected across a fan-out
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<TopologyError>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an error; nested aggregates are flattened
    pub fn push(&mut self, err: TopologyError) {
        match err {
            TopologyError::Multi(inner) => self.errors.extend(inner.errors),
            other => self.errors.push(other),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[TopologyError] {
        &self.errors
    }

    /// `Ok(())` when nothing was collected
    pub fn into_result(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(TopologyError::Multi(self))
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            0 => write!(f, "no errors"),
            1 => write!(f, "{}", self.errors[0]),
            n => {
                write!(f, "{} errors occurred: ", n)?;
                for (i, err) in self.errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for MultiError {}

/// A failure that happened after some changes were already applied
#[derive(Error, Debug)]
#[error("{source} (changed before failure: {changed:?})")]
pub struct PartialError {
    /// Identities (servers or shards) that were changed before the failure
    pub changed: Vec<String>,
    pub source: TopologyError,
}

pub type Result<T> = std::result::Result<T, TopologyError>;
