//! Deduplicating registry of connections
//!
//! Every endpoint that enters the system goes through
//! [`ConnectionPool::get_server`], so servers in different shards and
//! Sentinel entries pointing at the same `host:port` share one connection.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::address::Endpoint;
use super::connection::{Connection, Connector};
use crate::utils::ClientError;

/// Thread-safe connection registry
pub struct ConnectionPool {
    connections: Mutex<Vec<Arc<Connection>>>,
    connector: Arc<dyn Connector>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
            connector,
        }
    }

    /// Get the connection for `connection_string`, creating it if needed.
    ///
    /// An existing connection keeps its alias; `alias` is only applied
    /// when the connection has none yet.
    pub fn get_server(
        &self,
        connection_string: &str,
        alias: Option<&str>,
    ) -> Result<Arc<Connection>, ClientError> {
        let endpoint = Endpoint::parse(connection_string)?;
        Ok(self.get_endpoint(endpoint, alias))
    }

    /// Same as [`ConnectionPool::get_server`] for an already parsed endpoint
    pub fn get_endpoint(&self, endpoint: Endpoint, alias: Option<&str>) -> Arc<Connection> {
        let id = endpoint.id();

        let mut connections = self.connections.lock();
        if let Some(existing) = connections.iter().find(|c| c.id() == id) {
            if let Some(alias) = alias {
                existing.set_alias_if_absent(alias);
            }
            return Arc::clone(existing);
        }

        debug!("Registering connection {}", id);
        let conn = Arc::new(Connection::new(
            endpoint,
            alias.map(str::to_string),
            Arc::clone(&self.connector),
        ));
        connections.push(Arc::clone(&conn));
        conn
    }

    /// Look up a registered connection by alias
    pub fn get_by_alias(&self, alias: &str) -> Option<Arc<Connection>> {
        self.connections
            .lock()
            .iter()
            .find(|c| c.alias().as_deref() == Some(alias))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every underlying client; registrations are kept
    pub fn close_all(&self) {
        for conn in self.connections.lock().iter() {
            conn.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockConnector;
    use std::thread;

    fn pool() -> ConnectionPool {
        ConnectionPool::new(Arc::new(MockConnector::new()))
    }

    #[test]
    fn test_same_address_same_instance() {
        let pool = pool();
        let a = pool.get_server("redis://10.0.0.1:6379", None).unwrap();
        let b = pool.get_server("redis://10.0.0.1:6379", Some("redis-0")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
        assert_eq!(a.alias().as_deref(), Some("redis-0"));
    }

    #[test]
    fn test_identity_ignores_scheme_and_credentials() {
        let pool = pool();
        let a = pool.get_server("redis://10.0.0.1:6379", None).unwrap();
        let b = pool.get_server("redis://:pw@10.0.0.1:6379/0", None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_existing_alias_is_kept() {
        let pool = pool();
        pool.get_server("redis://10.0.0.1:6379", Some("first")).unwrap();
        let conn = pool.get_server("redis://10.0.0.1:6379", Some("second")).unwrap();
        assert_eq!(conn.alias().as_deref(), Some("first"));
        assert!(pool.get_by_alias("first").is_some());
        assert!(pool.get_by_alias("second").is_none());
    }

    #[test]
    fn test_malformed_address() {
        let pool = pool();
        assert!(matches!(
            pool.get_server("10.0.0.1:6379", None),
            Err(ClientError::MalformedAddress { .. })
        ));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_concurrent_get_or_create() {
        let pool = Arc::new(pool());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || pool.get_server("redis://10.0.0.1:6379", None).unwrap())
            })
            .collect();
        let conns: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(conns.iter().all(|c| Arc::ptr_eq(c, &conns[0])));
        assert_eq!(pool.len(), 1);
    }
}
