//! Connection string parsing
//!
//! Accepted form: `scheme://[[user]:password@]host:port[/db]` with scheme
//! `redis` (plain TCP) or `rediss` (TLS).

use std::fmt;

use crate::utils::ClientError;

/// Parsed connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: Option<u32>,
}

impl Endpoint {
    /// Parse a `scheme://host:port` connection string
    pub fn parse(address: &str) -> Result<Self, ClientError> {
        let malformed = |reason: &str| ClientError::MalformedAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = address
            .split_once("://")
            .ok_or_else(|| malformed("missing scheme"))?;
        let tls = match scheme {
            "redis" => false,
            "rediss" => true,
            _ => return Err(malformed("unsupported scheme")),
        };

        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, Some(path)),
            None => (rest, None),
        };

        let (userinfo, host_port) = match authority.rsplit_once('@') {
            Some((userinfo, host_port)) => (Some(userinfo), host_port),
            None => (None, authority),
        };

        let (username, password) = match userinfo {
            Some(info) => match info.split_once(':') {
                Some((user, pass)) => (
                    Some(user.to_string()).filter(|u| !u.is_empty()),
                    Some(pass.to_string()),
                ),
                None => (Some(info.to_string()).filter(|u| !u.is_empty()), None),
            },
            None => (None, None),
        };

        let (host, port) = host_port
            .rsplit_once(':')
            .ok_or_else(|| malformed("missing port"))?;
        if host.is_empty() {
            return Err(malformed("missing host"));
        }
        let port: u16 = port.parse().map_err(|_| malformed("invalid port"))?;

        let db = match path {
            None | Some("") => None,
            Some(db) => Some(db.parse::<u32>().map_err(|_| malformed("invalid db"))?),
        };

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
            username,
            password,
            db,
        })
    }

    /// Identity of the endpoint: `host:port`
    pub fn id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Plain endpoint for a bare `host:port`, as reported by Sentinel
    pub fn from_host_port(host_port: &str) -> Result<Self, ClientError> {
        Self::parse(&format!("redis://{}", host_port))
    }

    /// Same scheme, credentials and db, at another `host:port`
    pub fn with_host_port(&self, host_port: &str) -> Result<Self, ClientError> {
        let bare = Self::from_host_port(host_port)?;
        Ok(Self {
            host: bare.host,
            port: bare.port,
            ..self.clone()
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "rediss" } else { "redis" };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}
