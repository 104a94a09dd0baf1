//! Raw TCP connection for administrative traffic
//!
//! Blocking TCP (and optionally TLS) connection speaking RESP2. Every
//! command round-trip is bounded by the socket timeouts, which the caller
//! clamps to its context deadline before each probe.

use std::io::{self, BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::address::Endpoint;
use super::connection::Connector;
use super::control_plane::{ControlPlane, ControlPlaneExt};
use crate::config::TlsConfig;
use crate::utils::{ClientError, Context, RespDecoder, RespEncoder, RespValue};

/// Raw connection wrapper (TCP or TLS)
///
/// For TCP, we split into separate reader/writer.
/// For TLS, we use a single stream since native-tls doesn't support cloning.
pub enum RawConnection {
    Tcp {
        writer: BufWriter<TcpStream>,
        reader: BufReader<TcpStream>,
    },
    #[cfg(feature = "native-tls-backend")]
    NativeTls {
        stream: native_tls::TlsStream<TcpStream>,
    },
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, ClientError> {
    let connect_failed = |source: io::Error| ClientError::ConnectFailed {
        host: host.to_string(),
        port,
        source,
    };
    let mut addrs = format!("{}:{}", host, port)
        .to_socket_addrs()
        .map_err(|e| connect_failed(e))?;
    addrs.next().ok_or_else(|| {
        connect_failed(io::Error::new(
            io::ErrorKind::NotFound,
            "No addresses found",
        ))
    })
}

fn open_stream(host: &str, port: u16, connect_timeout: Duration) -> Result<TcpStream, ClientError> {
    let addr = resolve(host, port)?;
    let stream = TcpStream::connect_timeout(&addr, connect_timeout).map_err(|e| {
        ClientError::ConnectFailed {
            host: host.to_string(),
            port,
            source: e,
        }
    })?;
    stream.set_nodelay(true).ok();
    Ok(stream)
}

impl RawConnection {
    /// Create new TCP connection
    pub fn connect_tcp(
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let stream = open_stream(host, port, connect_timeout)?;
        let writer = BufWriter::with_capacity(
            4096,
            stream.try_clone().map_err(|e| ClientError::ConnectFailed {
                host: host.to_string(),
                port,
                source: e,
            })?,
        );
        let reader = BufReader::with_capacity(16384, stream);

        Ok(RawConnection::Tcp { writer, reader })
    }

    /// Create new TLS connection
    #[cfg(feature = "native-tls-backend")]
    pub fn connect_tls(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        tls_config: &TlsConfig,
    ) -> Result<Self, ClientError> {
        use native_tls::{Certificate, Identity, TlsConnector};

        let mut builder = TlsConnector::builder();

        if tls_config.skip_verify {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }

        if let Some(ref ca_path) = tls_config.ca_cert {
            let ca_data = std::fs::read(ca_path)
                .map_err(|e| ClientError::Tls(format!("Failed to read CA cert: {}", e)))?;
            let cert = Certificate::from_pem(&ca_data)
                .map_err(|e| ClientError::Tls(format!("Invalid CA cert: {}", e)))?;
            builder.add_root_certificate(cert);
        }

        if let (Some(ref cert_path), Some(ref key_path)) =
            (&tls_config.client_cert, &tls_config.client_key)
        {
            let cert_data = std::fs::read(cert_path)
                .map_err(|e| ClientError::Tls(format!("Failed to read client cert: {}", e)))?;
            let key_data = std::fs::read(key_path)
                .map_err(|e| ClientError::Tls(format!("Failed to read client key: {}", e)))?;
            let identity = Identity::from_pkcs8(&cert_data, &key_data)
                .map_err(|e| ClientError::Tls(format!("Invalid client identity: {}", e)))?;
            builder.identity(identity);
        }

        let connector = builder
            .build()
            .map_err(|e| ClientError::Tls(format!("Failed to build TLS connector: {}", e)))?;

        let tcp_stream = open_stream(host, port, connect_timeout)?;
        let sni_host = tls_config.sni.as_deref().unwrap_or(host);
        let stream = connector
            .connect(sni_host, tcp_stream)
            .map_err(|e| ClientError::Tls(format!("TLS handshake failed: {}", e)))?;

        Ok(RawConnection::NativeTls { stream })
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            RawConnection::Tcp { writer, .. } => writer.write_all(buf),
            #[cfg(feature = "native-tls-backend")]
            RawConnection::NativeTls { stream } => stream.write_all(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            RawConnection::Tcp { writer, .. } => writer.flush(),
            #[cfg(feature = "native-tls-backend")]
            RawConnection::NativeTls { stream } => stream.flush(),
        }
    }

    fn read_response(&mut self) -> io::Result<RespValue> {
        match self {
            RawConnection::Tcp { reader, .. } => RespDecoder::new(reader).decode(),
            #[cfg(feature = "native-tls-backend")]
            RawConnection::NativeTls { stream } => {
                // Replies are small and read fully, so a transient buffer is enough
                let mut buf_reader = io::BufReader::new(stream);
                RespDecoder::new(&mut buf_reader).decode()
            }
        }
    }

    /// Set read and write timeouts on the underlying socket
    pub fn set_timeouts(&mut self, timeout: Duration) -> io::Result<()> {
        let socket = match self {
            RawConnection::Tcp { reader, .. } => reader.get_ref(),
            #[cfg(feature = "native-tls-backend")]
            RawConnection::NativeTls { stream } => stream.get_ref(),
        };
        socket.set_read_timeout(Some(timeout))?;
        socket.set_write_timeout(Some(timeout))
    }
}

impl ControlPlane for RawConnection {
    fn execute(&mut self, args: &[&str]) -> io::Result<RespValue> {
        let mut encoder = RespEncoder::with_capacity(128);
        encoder.encode_command_str(args);
        self.write_all(encoder.as_bytes())?;
        self.flush()?;
        self.read_response()
    }

    fn set_io_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_timeouts(timeout)
    }
}

/// Connection factory for creating connections with common config
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub tls_config: Option<TlsConfig>,
    /// Password used when the connection string carries none
    pub default_password: Option<String>,
}

impl Default for ConnectionFactory {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            tls_config: None,
            default_password: None,
        }
    }
}

impl ConnectionFactory {
    /// Open a connection to the endpoint, authenticating and selecting the
    /// database it names
    pub fn create(&self, endpoint: &Endpoint, ctx: &Context) -> Result<RawConnection, ClientError> {
        ctx.err()?;
        let connect_timeout = ctx.bound(self.connect_timeout);

        let mut conn = if endpoint.tls {
            self.connect_tls(endpoint, connect_timeout)?
        } else {
            RawConnection::connect_tcp(&endpoint.host, endpoint.port, connect_timeout)?
        };

        conn.set_timeouts(ctx.bound(self.command_timeout))?;

        let password = endpoint
            .password
            .as_deref()
            .or(self.default_password.as_deref());
        if let Some(password) = password {
            conn.authenticate(password, endpoint.username.as_deref())?;
        }

        if let Some(db) = endpoint.db {
            conn.select_db(db)?;
        }

        Ok(conn)
    }

    #[cfg(feature = "native-tls-backend")]
    fn connect_tls(&self, endpoint: &Endpoint, timeout: Duration) -> Result<RawConnection, ClientError> {
        let default_tls = TlsConfig::default();
        let tls = self.tls_config.as_ref().unwrap_or(&default_tls);
        RawConnection::connect_tls(&endpoint.host, endpoint.port, timeout, tls)
    }

    #[cfg(not(feature = "native-tls-backend"))]
    fn connect_tls(&self, _endpoint: &Endpoint, _timeout: Duration) -> Result<RawConnection, ClientError> {
        Err(ClientError::Tls("TLS support not compiled in".to_string()))
    }
}

impl Connector for ConnectionFactory {
    fn connect(
        &self,
        endpoint: &Endpoint,
        ctx: &Context,
    ) -> Result<Box<dyn ControlPlane + Send>, ClientError> {
        Ok(Box::new(self.create(endpoint, ctx)?))
    }

    fn command_timeout(&self) -> Duration {
        self.command_timeout
    }
}
