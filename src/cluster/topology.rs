//! Cluster of shards and the Sentinels supervising them
//!
//! A `Cluster` only ever grows: Sentinel-driven discovery appends shards it
//! learns about, but a shard missing from one Sentinel reply is kept.
//! Discovery passes take `&mut self`, so concurrent passes against the same
//! cluster have to be serialized by the caller.

use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::options::DiscoveryOptions;
use super::sentinel::{MonitorSettings, SentinelServer};
use super::shard::Shard;
use crate::client::ConnectionPool;
use crate::config::TopologyConfig;
use crate::utils::{Context, MultiError, PartialError, Result, TopologyError};

/// How long `get_sentinel` waits for any Sentinel to answer PING
pub const DEFAULT_SENTINEL_PING_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Cluster {
    shards: Vec<Shard>,
    sentinels: Vec<Arc<SentinelServer>>,
    pool: Arc<ConnectionPool>,
    sentinel_ping_timeout: Duration,
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("shards", &self.shards)
            .field("sentinels", &self.sentinels)
            .finish()
    }
}

impl Cluster {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            shards: Vec::new(),
            sentinels: Vec::new(),
            pool,
            sentinel_ping_timeout: DEFAULT_SENTINEL_PING_TIMEOUT,
        }
    }

    /// Build the static layout described by `config`
    pub fn from_config(config: &TopologyConfig, pool: Arc<ConnectionPool>) -> Result<Self> {
        let mut cluster = Self::new(pool);
        for (name, urls) in &config.shards {
            cluster.add_shard(name, urls.as_slice())?;
        }
        for url in &config.sentinels {
            cluster.add_sentinel(url)?;
        }
        Ok(cluster)
    }

    pub fn with_sentinel_ping_timeout(mut self, timeout: Duration) -> Self {
        self.sentinel_ping_timeout = timeout;
        self
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub fn sentinels(&self) -> &[Arc<SentinelServer>] {
        &self.sentinels
    }

    pub fn shard_names(&self) -> Vec<String> {
        self.shards.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn shard_by_name(&self, name: &str) -> Option<&Shard> {
        self.shards.iter().find(|s| s.name() == name)
    }

    pub fn shard_by_name_mut(&mut self, name: &str) -> Option<&mut Shard> {
        self.shards.iter_mut().find(|s| s.name() == name)
    }

    fn shard_index(&self, name: &str) -> Option<usize> {
        self.shards.iter().position(|s| s.name() == name)
    }

    /// Add a shard, or extend an existing one with any new members
    pub fn add_shard<S: AsRef<str>>(&mut self, name: &str, connection_strings: &[S]) -> Result<&mut Shard> {
        let i = match self.shard_index(name) {
            Some(i) => {
                for url in connection_strings {
                    self.shards[i].add_server(url.as_ref())?;
                }
                i
            }
            None => {
                let shard = Shard::new(name, connection_strings, Arc::clone(&self.pool))?;
                self.shards.push(shard);
                self.shards.len() - 1
            }
        };
        Ok(&mut self.shards[i])
    }

    /// Register a Sentinel; an address already known is returned as is
    pub fn add_sentinel(&mut self, connection_string: &str) -> Result<Arc<SentinelServer>> {
        let alias = format!("sentinel-{}", self.sentinels.len());
        let sentinel = SentinelServer::new(&self.pool, connection_string, Some(&alias))?;
        if let Some(existing) = self.sentinels.iter().find(|s| s.id() == sentinel.id()) {
            return Ok(Arc::clone(existing));
        }
        let sentinel = Arc::new(sentinel);
        self.sentinels.push(Arc::clone(&sentinel));
        Ok(sentinel)
    }

    /// Probe every member of every shard directly.
    ///
    /// One shard's failure never stops the others; failures come back
    /// aggregated and tagged with the shard name.
    pub fn discover(&mut self, ctx: &Context, opts: DiscoveryOptions) -> Result<()> {
        let mut errors = MultiError::new();
        for shard in &mut self.shards {
            if let Err(e) = ctx.err() {
                errors.push(e.into());
                break;
            }
            if let Err(e) = shard.discover(ctx, None, opts) {
                errors.push(TopologyError::in_shard(shard.name(), e));
            }
        }
        errors.into_result()
    }

    /// Discover every shard Sentinel monitors, creating shards it reports
    /// that are not known yet.
    pub fn sentinel_discover(&mut self, ctx: &Context, opts: DiscoveryOptions) -> Result<()> {
        let sentinel = self
            .get_sentinel(ctx)
            .ok_or(TopologyError::NoHealthySentinel)?;
        debug!("Using sentinel {}", sentinel.id());

        let masters = sentinel
            .masters(ctx)
            .map_err(|source| TopologyError::SentinelListFailed {
                sentinel: sentinel.id(),
                source,
            })?;

        let mut errors = MultiError::new();
        for master in masters {
            if let Err(e) = ctx.err() {
                errors.push(e.into());
                break;
            }
            let i = match self.shard_index(&master.name) {
                Some(i) => i,
                None => {
                    info!("Sentinel {} reports new shard {}", sentinel.id(), master.name);
                    let empty: [&str; 0] = [];
                    match Shard::new(&master.name, &empty, Arc::clone(&self.pool)) {
                        Ok(shard) => {
                            self.shards.push(shard);
                            self.shards.len() - 1
                        }
                        Err(e) => {
                            errors.push(TopologyError::in_shard(&master.name, e));
                            continue;
                        }
                    }
                }
            };

            let shard = &mut self.shards[i];
            if let Err(e) = shard.discover(ctx, Some(sentinel.as_ref()), opts) {
                warn!("Sentinel discovery of shard {} failed: {}", shard.name(), e);
                errors.push(TopologyError::in_shard(shard.name(), e));
            }
        }
        errors.into_result()
    }

    /// First Sentinel to answer PING, or `None` when none answers within
    /// the ping timeout (or before `ctx` is done).
    pub fn get_sentinel(&self, ctx: &Context) -> Option<Arc<SentinelServer>> {
        if self.sentinels.is_empty() {
            return None;
        }

        let race = ctx.with_timeout(self.sentinel_ping_timeout);
        let (tx, rx) = mpsc::channel();

        for (i, sentinel) in self.sentinels.iter().enumerate() {
            let sentinel = Arc::clone(sentinel);
            let tx = tx.clone();
            let race = race.clone();
            let spawned = thread::Builder::new()
                .name(format!("sentinel-ping-{}", i))
                .spawn(move || match sentinel.ping(&race) {
                    // The receiver is gone once a winner was picked
                    Ok(()) => {
                        let _ = tx.send(sentinel);
                    }
                    Err(e) => debug!("Sentinel {} did not answer: {}", sentinel.id(), e),
                });
            if let Err(e) = spawned {
                warn!("Failed to spawn sentinel probe: {}", e);
            }
        }
        drop(tx);

        let wait = race.remaining().unwrap_or(self.sentinel_ping_timeout);
        let winner = match rx.recv_timeout(wait) {
            Ok(sentinel) => Some(sentinel),
            Err(RecvTimeoutError::Timeout) => {
                warn!("No sentinel answered within {:?}", wait);
                None
            }
            // Every probe failed
            Err(RecvTimeoutError::Disconnected) => None,
        };
        race.cancel();
        winner
    }

    /// Register every shard with a healthy Sentinel
    pub fn monitor(
        &self,
        ctx: &Context,
        settings: &MonitorSettings,
    ) -> std::result::Result<Vec<String>, PartialError> {
        let sentinel = self.get_sentinel(ctx).ok_or(PartialError {
            changed: Vec::new(),
            source: TopologyError::NoHealthySentinel,
        })?;
        sentinel.monitor(ctx, &self.shards, settings)
    }

    /// True when a healthy Sentinel monitors every known shard
    pub fn is_monitored(&self, ctx: &Context) -> Result<bool> {
        let sentinel = self
            .get_sentinel(ctx)
            .ok_or(TopologyError::NoHealthySentinel)?;
        sentinel.is_monitoring_shards(ctx, &self.shard_names())
    }

    /// Bootstrap one shard; see [`Shard::init`]
    pub fn init_shard(
        &mut self,
        ctx: &Context,
        name: &str,
        master_host_port: &str,
    ) -> std::result::Result<Vec<String>, PartialError> {
        match self.shard_by_name_mut(name) {
            Some(shard) => shard.init(ctx, master_host_port),
            None => Err(PartialError {
                changed: Vec::new(),
                source: TopologyError::ShardNotFound {
                    shard: name.to_string(),
                },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockConnector;
    use crate::cluster::Role;
    use std::time::Instant;

    const S1: &str = "10.0.0.9:26379";
    const S2: &str = "10.0.0.10:26379";

    fn url(addr: &str) -> String {
        format!("redis://{}", addr)
    }

    fn cluster(mock: &MockConnector) -> Cluster {
        Cluster::new(Arc::new(ConnectionPool::new(Arc::new(mock.clone()))))
    }

    // Two shards, each with a master and one replica, monitored by one Sentinel
    fn two_shard_deployment() -> MockConnector {
        let mock = MockConnector::new();
        mock.add_sentinel(S1);
        for (name, master, slave) in [
            ("shard01", "10.0.0.1:6379", "10.0.0.2:6379"),
            ("shard02", "10.0.1.1:6379", "10.0.1.2:6379"),
        ] {
            mock.add_master(master);
            mock.add_slave(slave, master);
            mock.sentinel_monitors(S1, name, master, "master");
            mock.sentinel_add_slave(S1, name, slave, "slave");
        }
        mock
    }

    #[test]
    fn test_from_config() {
        let mock = MockConnector::new();
        let config = TopologyConfig::from_json(
            r#"{"shards": {"b": ["redis://10.0.1.1:6379"], "a": ["redis://10.0.0.1:6379"]},
                "sentinels": ["redis://10.0.0.9:26379", "redis://10.0.0.9:26379"]}"#,
        )
        .unwrap();
        let pool = Arc::new(ConnectionPool::new(Arc::new(mock)));
        let cluster = Cluster::from_config(&config, pool).unwrap();

        assert_eq!(cluster.shard_names(), vec!["a", "b"]);
        assert_eq!(cluster.sentinels().len(), 1);
        assert!(cluster.shard_by_name("a").is_some());
        assert!(cluster.shard_by_name("c").is_none());
    }

    #[test]
    fn test_add_shard_extends_existing() {
        let mock = MockConnector::new();
        let mut cluster = cluster(&mock);
        cluster.add_shard("s", &[url("10.0.0.1:6379")]).unwrap();
        cluster
            .add_shard("s", &[url("10.0.0.1:6379"), url("10.0.0.2:6379")])
            .unwrap();
        assert_eq!(cluster.shards().len(), 1);
        assert_eq!(cluster.shards()[0].servers().len(), 2);
    }

    #[test]
    fn test_direct_discovery_isolates_shards() {
        let mock = two_shard_deployment();
        mock.set_reachable("10.0.0.1:6379", false);
        let mut cluster = cluster(&mock);
        cluster
            .add_shard("shard01", &[url("10.0.0.1:6379"), url("10.0.0.2:6379")])
            .unwrap();
        cluster
            .add_shard("shard02", &[url("10.0.1.1:6379"), url("10.0.1.2:6379")])
            .unwrap();

        let err = cluster
            .discover(&Context::background(), DiscoveryOptions::ROLE)
            .unwrap_err();
        let TopologyError::Multi(multi) = err else {
            panic!("expected aggregated error");
        };
        assert_eq!(multi.len(), 1);
        assert!(multi.errors()[0].to_string().starts_with("shard shard01"));
        assert_eq!(
            cluster.shard_by_name("shard02").unwrap().get_master().unwrap().id(),
            "10.0.1.1:6379"
        );
    }

    #[test]
    fn test_sentinel_discover_creates_shards() {
        let mock = two_shard_deployment();
        mock.set_config("10.0.0.2:6379", "slave-read-only", "yes");
        mock.set_config("10.0.1.2:6379", "slave-read-only", "no");
        let mut cluster = cluster(&mock);
        cluster.add_sentinel(&url(S1)).unwrap();

        let opts = DiscoveryOptions::ROLE | DiscoveryOptions::SLAVE_READ_ONLY;
        cluster
            .sentinel_discover(&Context::background(), opts)
            .unwrap();

        assert_eq!(cluster.shard_names(), vec!["shard01", "shard02"]);
        let shard01 = cluster.shard_by_name("shard01").unwrap();
        assert_eq!(shard01.get_master().unwrap().id(), "10.0.0.1:6379");
        assert_eq!(shard01.get_slaves_ro().len(), 1);
        let shard02 = cluster.shard_by_name("shard02").unwrap();
        assert_eq!(shard02.get_slaves_rw()[0].id(), "10.0.1.2:6379");
    }

    #[test]
    fn test_sentinel_discover_never_drops_shards() {
        let mock = two_shard_deployment();
        let mut cluster = cluster(&mock);
        cluster.add_shard("legacy", &[url("10.0.2.1:6379")]).unwrap();
        cluster.add_sentinel(&url(S1)).unwrap();

        cluster
            .sentinel_discover(&Context::background(), DiscoveryOptions::ROLE)
            .unwrap();
        assert_eq!(cluster.shard_names(), vec!["legacy", "shard01", "shard02"]);
        assert_eq!(cluster.shards()[0].servers()[0].role(), Role::Unknown);
    }

    #[test]
    fn test_sentinel_discover_continues_past_failed_shard() {
        let mock = two_shard_deployment();
        mock.sentinel_monitors(S1, "shard01", "10.0.0.1:6379", "master,o_down");
        let mut cluster = cluster(&mock);
        cluster.add_sentinel(&url(S1)).unwrap();

        let err = cluster
            .sentinel_discover(&Context::background(), DiscoveryOptions::ROLE)
            .unwrap_err();
        let TopologyError::Multi(multi) = err else {
            panic!("expected aggregated error");
        };
        assert_eq!(multi.len(), 1);
        assert!(matches!(
            &multi.errors()[0],
            TopologyError::Shard { shard, .. } if shard == "shard01"
        ));
        assert!(cluster
            .shard_by_name("shard02")
            .unwrap()
            .get_master()
            .is_ok());
    }

    #[test]
    fn test_sentinel_discover_without_healthy_sentinel() {
        let mock = two_shard_deployment();
        mock.set_reachable(S1, false);
        let mut cluster = cluster(&mock);
        cluster.add_sentinel(&url(S1)).unwrap();

        assert!(matches!(
            cluster.sentinel_discover(&Context::background(), DiscoveryOptions::ROLE),
            Err(TopologyError::NoHealthySentinel)
        ));
    }

    #[test]
    fn test_sentinel_discover_masters_query_failure() {
        let mock = two_shard_deployment();
        mock.fail_command(S1, &["SENTINEL", "MASTERS"]);
        let mut cluster = cluster(&mock);
        cluster.add_sentinel(&url(S1)).unwrap();

        let err = cluster
            .sentinel_discover(&Context::background(), DiscoveryOptions::ROLE)
            .unwrap_err();
        match err {
            TopologyError::SentinelListFailed { sentinel, .. } => assert_eq!(sentinel, S1),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(cluster.shards().is_empty());
    }

    #[test]
    fn test_get_sentinel_skips_dead_replica() {
        let mock = two_shard_deployment();
        mock.add_sentinel(S2);
        mock.set_reachable(S1, false);
        let mut cluster = cluster(&mock);
        cluster.add_sentinel(&url(S1)).unwrap();
        cluster.add_sentinel(&url(S2)).unwrap();

        let sentinel = cluster.get_sentinel(&Context::background()).unwrap();
        assert_eq!(sentinel.id(), S2);
    }

    #[test]
    fn test_get_sentinel_prefers_fast_answer() {
        let mock = two_shard_deployment();
        mock.add_sentinel(S2);
        mock.set_delay(S1, Duration::from_millis(500));
        let mut cluster = cluster(&mock);
        cluster.add_sentinel(&url(S1)).unwrap();
        cluster.add_sentinel(&url(S2)).unwrap();

        let sentinel = cluster.get_sentinel(&Context::background()).unwrap();
        assert_eq!(sentinel.id(), S2);
    }

    #[test]
    fn test_get_sentinel_times_out() {
        let mock = two_shard_deployment();
        mock.set_delay(S1, Duration::from_millis(500));
        let mut cluster = cluster(&mock).with_sentinel_ping_timeout(Duration::from_millis(50));
        cluster.add_sentinel(&url(S1)).unwrap();

        let start = Instant::now();
        assert!(cluster.get_sentinel(&Context::background()).is_none());
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn test_get_sentinel_none_configured() {
        let mock = MockConnector::new();
        assert!(cluster(&mock).get_sentinel(&Context::background()).is_none());
    }

    #[test]
    fn test_init_then_monitor() {
        let mock = MockConnector::new();
        mock.add_sentinel(S1);
        let members = ["10.0.0.1:6379", "10.0.0.2:6379", "10.0.0.3:6379"];
        for addr in members {
            mock.add_unconfigured(addr);
        }
        let mut cluster = cluster(&mock);
        let urls: Vec<String> = members.iter().map(|a| url(a)).collect();
        cluster.add_shard("shard01", urls.as_slice()).unwrap();
        cluster.add_sentinel(&url(S1)).unwrap();
        let ctx = Context::background();

        let changed = cluster.init_shard(&ctx, "shard01", "10.0.0.1:6379").unwrap();
        assert_eq!(changed.len(), 3);

        assert!(!cluster.is_monitored(&ctx).unwrap());
        let changed = cluster.monitor(&ctx, &MonitorSettings::default()).unwrap();
        assert_eq!(changed, vec!["shard01".to_string()]);
        assert!(cluster.is_monitored(&ctx).unwrap());

        // Second registration is read-only
        let changed = cluster.monitor(&ctx, &MonitorSettings::default()).unwrap();
        assert!(changed.is_empty());
        assert_eq!(mock.count(S1, &["SENTINEL", "MONITOR"]), 1);
    }

    #[test]
    fn test_init_unknown_shard() {
        let mock = MockConnector::new();
        let mut cluster = cluster(&mock);
        let err = cluster
            .init_shard(&Context::background(), "nope", "10.0.0.1:6379")
            .unwrap_err();
        assert!(matches!(err.source, TopologyError::ShardNotFound { .. }));
    }

    #[test]
    fn test_cancelled_cluster_discovery() {
        let mock = two_shard_deployment();
        let mut cluster = cluster(&mock);
        cluster.add_shard("shard01", &[url("10.0.0.1:6379")]).unwrap();
        let ctx = Context::background();
        ctx.cancel();

        assert!(cluster.discover(&ctx, DiscoveryOptions::ROLE).is_err());
        assert!(mock.commands("10.0.0.1:6379").is_empty());
    }
}
