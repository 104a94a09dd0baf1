//! Control Plane trait for server communication
//!
//! `ControlPlane` is the raw command channel to one endpoint. The
//! administrative surface used by discovery (ROLE, CONFIG, SLAVEOF and the
//! SENTINEL sub-commands) is layered on top in `ControlPlaneExt`, so any
//! implementation (TCP, TLS or an in-memory mock) gets it for free.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use crate::cluster::Role;
use crate::utils::{ClientError, RespValue};

/// Control plane operations trait
pub trait ControlPlane {
    /// Execute a command with string arguments
    ///
    /// # Example
    /// ```ignore
    /// let response = conn.execute(&["ROLE"])?;
    /// let response = conn.execute(&["CONFIG", "GET", "save"])?;
    /// ```
    fn execute(&mut self, args: &[&str]) -> io::Result<RespValue>;

    /// Bound the next reads and writes. Implementations without sockets
    /// may ignore it.
    fn set_io_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }
}

/// Parsed ROLE reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleReply {
    pub role: Role,
    /// Master host, for replicas
    pub master_host: Option<String>,
    /// Master port, for replicas
    pub master_port: Option<u16>,
}

impl RoleReply {
    /// True for a replica pointed at loopback, i.e. a node that was started
    /// but never wired into a shard
    pub fn is_unconfigured(&self) -> bool {
        self.role == Role::Slave && self.master_host.as_deref() == Some("127.0.0.1")
    }
}

/// One monitored master as reported by SENTINEL MASTER / SENTINEL MASTERS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelMaster {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub flags: String,
    /// Every field of the record, verbatim
    pub fields: HashMap<String, String>,
}

/// One replica as reported by SENTINEL SLAVES
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelSlave {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub flags: String,
    pub fields: HashMap<String, String>,
}

fn flags_down(flags: &str) -> bool {
    flags.contains("s_down") || flags.contains("o_down")
}

fn parse_record(
    command: &str,
    value: &RespValue,
) -> Result<(String, String, u16, String, HashMap<String, String>), ClientError> {
    let fields = value
        .as_field_map()
        .ok_or_else(|| ClientError::unexpected(command, value))?;
    let field = |key: &str| {
        fields
            .get(key)
            .cloned()
            .ok_or_else(|| ClientError::unexpected(command, format!("record without '{}'", key)))
    };
    let name = field("name")?;
    let ip = field("ip")?;
    let port = field("port")?
        .parse::<u16>()
        .map_err(|_| ClientError::unexpected(command, value))?;
    let flags = field("flags")?;
    Ok((name, ip, port, flags, fields))
}

impl SentinelMaster {
    pub fn from_reply(command: &str, value: &RespValue) -> Result<Self, ClientError> {
        let (name, ip, port, flags, fields) = parse_record(command, value)?;
        Ok(Self {
            name,
            ip,
            port,
            flags,
            fields,
        })
    }

    /// `host:port` of the master
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Subjectively or objectively down
    pub fn is_down(&self) -> bool {
        flags_down(&self.flags)
    }
}

impl SentinelSlave {
    pub fn from_reply(command: &str, value: &RespValue) -> Result<Self, ClientError> {
        let (name, ip, port, flags, fields) = parse_record(command, value)?;
        Ok(Self {
            name,
            ip,
            port,
            flags,
            fields,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn is_down(&self) -> bool {
        flags_down(&self.flags)
    }
}

fn expect_ok(command: &str, reply: RespValue) -> Result<(), ClientError> {
    match reply {
        RespValue::SimpleString(s) if s == "OK" => Ok(()),
        RespValue::Error(e) => Err(ClientError::Server(e)),
        other => Err(ClientError::unexpected(command, other)),
    }
}

fn reject_error(reply: RespValue) -> Result<RespValue, ClientError> {
    match reply {
        RespValue::Error(e) => Err(ClientError::Server(e)),
        other => Ok(other),
    }
}

/// Extension trait with the administrative commands
///
/// These are convenience methods built on top of the base `ControlPlane` trait.
pub trait ControlPlaneExt: ControlPlane {
    /// Send PING and verify PONG response
    fn ping(&mut self) -> Result<(), ClientError> {
        match reject_error(self.execute(&["PING"])?)? {
            RespValue::SimpleString(s) if s == "PONG" => Ok(()),
            other => Err(ClientError::unexpected("PING", other)),
        }
    }

    /// Send AUTH command
    fn authenticate(&mut self, password: &str, username: Option<&str>) -> Result<(), ClientError> {
        let response = match username {
            Some(user) => self.execute(&["AUTH", user, password])?,
            None => self.execute(&["AUTH", password])?,
        };
        expect_ok("AUTH", response)
    }

    /// Send SELECT command
    fn select_db(&mut self, db: u32) -> Result<(), ClientError> {
        let db_str = db.to_string();
        let response = self.execute(&["SELECT", &db_str])?;
        expect_ok("SELECT", response)
    }

    /// ROLE: `["master", ...]` or `["slave", <host>, <port>, ...]`
    fn role(&mut self) -> Result<RoleReply, ClientError> {
        let reply = reject_error(self.execute(&["ROLE"])?)?;
        let items = reply
            .as_array()
            .filter(|items| !items.is_empty())
            .ok_or_else(|| ClientError::unexpected("ROLE", &reply))?;

        match items[0].as_str() {
            Some("master") => Ok(RoleReply {
                role: Role::Master,
                master_host: None,
                master_port: None,
            }),
            Some("slave") => {
                let master_host = items
                    .get(1)
                    .and_then(RespValue::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| ClientError::unexpected("ROLE", &reply))?;
                let master_port = items.get(2).and_then(|v| match v {
                    RespValue::Integer(p) => u16::try_from(*p).ok(),
                    other => other.as_str().and_then(|s| s.parse().ok()),
                });
                Ok(RoleReply {
                    role: Role::Slave,
                    master_host: Some(master_host),
                    master_port,
                })
            }
            _ => Err(ClientError::unexpected("ROLE", &reply)),
        }
    }

    /// CONFIG GET for a single parameter; the value is returned verbatim
    fn config_get(&mut self, param: &str) -> Result<String, ClientError> {
        let reply = reject_error(self.execute(&["CONFIG", "GET", param])?)?;
        match reply.as_string_array() {
            Some(items) if items.len() >= 2 => Ok(items[1].clone()),
            _ => Err(ClientError::unexpected("CONFIG GET", reply)),
        }
    }

    fn config_set(&mut self, param: &str, value: &str) -> Result<(), ClientError> {
        let reply = self.execute(&["CONFIG", "SET", param, value])?;
        expect_ok("CONFIG SET", reply)
    }

    /// SLAVEOF <host> <port>
    fn slave_of(&mut self, host: &str, port: u16) -> Result<(), ClientError> {
        let port = port.to_string();
        let reply = self.execute(&["SLAVEOF", host, &port])?;
        expect_ok("SLAVEOF", reply)
    }

    /// SLAVEOF NO ONE
    fn slave_of_no_one(&mut self) -> Result<(), ClientError> {
        let reply = self.execute(&["SLAVEOF", "NO", "ONE"])?;
        expect_ok("SLAVEOF", reply)
    }

    /// Start a background save
    fn bgsave(&mut self) -> Result<(), ClientError> {
        match reject_error(self.execute(&["BGSAVE"])?)? {
            RespValue::SimpleString(_) => Ok(()),
            other => Err(ClientError::unexpected("BGSAVE", other)),
        }
    }

    /// Unix time of the last successful save
    fn last_save(&mut self) -> Result<i64, ClientError> {
        let reply = reject_error(self.execute(&["LASTSAVE"])?)?;
        match reply.as_i64() {
            Some(ts) => Ok(ts),
            None => Err(ClientError::unexpected("LASTSAVE", reply)),
        }
    }

    fn sentinel_master(&mut self, name: &str) -> Result<SentinelMaster, ClientError> {
        let reply = reject_error(self.execute(&["SENTINEL", "MASTER", name])?)?;
        SentinelMaster::from_reply("SENTINEL MASTER", &reply)
    }

    fn sentinel_masters(&mut self) -> Result<Vec<SentinelMaster>, ClientError> {
        let reply = reject_error(self.execute(&["SENTINEL", "MASTERS"])?)?;
        reply
            .as_array()
            .ok_or_else(|| ClientError::unexpected("SENTINEL MASTERS", &reply))?
            .iter()
            .map(|record| SentinelMaster::from_reply("SENTINEL MASTERS", record))
            .collect()
    }

    fn sentinel_slaves(&mut self, name: &str) -> Result<Vec<SentinelSlave>, ClientError> {
        let reply = reject_error(self.execute(&["SENTINEL", "SLAVES", name])?)?;
        reply
            .as_array()
            .ok_or_else(|| ClientError::unexpected("SENTINEL SLAVES", &reply))?
            .iter()
            .map(|record| SentinelSlave::from_reply("SENTINEL SLAVES", record))
            .collect()
    }

    fn sentinel_monitor(
        &mut self,
        name: &str,
        host: &str,
        port: u16,
        quorum: u32,
    ) -> Result<(), ClientError> {
        let port = port.to_string();
        let quorum = quorum.to_string();
        let reply = self.execute(&["SENTINEL", "MONITOR", name, host, &port, &quorum])?;
        expect_ok("SENTINEL MONITOR", reply)
    }

    fn sentinel_set(&mut self, name: &str, param: &str, value: &str) -> Result<(), ClientError> {
        let reply = self.execute(&["SENTINEL", "SET", name, param, value])?;
        expect_ok("SENTINEL SET", reply)
    }
}

// Blanket implementation: any ControlPlane automatically gets ControlPlaneExt
impl<T: ControlPlane + ?Sized> ControlPlaneExt for T {}
