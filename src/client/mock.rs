//! In-memory stand-ins for store nodes and Sentinel processes (tests only)

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::address::Endpoint;
use super::connection::Connector;
use super::control_plane::ControlPlane;
use crate::cluster::Role;
use crate::utils::{ClientError, Context, RespValue, NO_SUCH_MASTER};

#[derive(Debug, Clone)]
struct MockNode {
    role: Role,
    master: Option<(String, u16)>,
    config: HashMap<String, String>,
}

#[derive(Debug, Clone)]
struct MockMonitored {
    name: String,
    ip: String,
    port: u16,
    flags: String,
    slaves: Vec<(String, u16, String)>,
}

#[derive(Debug, Default)]
struct MockState {
    nodes: HashMap<String, MockNode>,
    sentinels: HashMap<String, Vec<MockMonitored>>,
    unreachable: HashSet<String>,
    delays: HashMap<String, Duration>,
    failing: Vec<(String, Vec<String>)>,
    dials: HashMap<String, usize>,
    log: Vec<(String, Vec<String>)>,
}

fn split_addr(addr: &str) -> (String, u16) {
    let (host, port) = addr.rsplit_once(':').expect("host:port");
    (host.to_string(), port.parse().expect("port"))
}

fn record(pairs: &[(&str, String)]) -> RespValue {
    RespValue::Array(
        pairs
            .iter()
            .flat_map(|(k, v)| [RespValue::bulk(*k), RespValue::bulk(v.clone())])
            .collect(),
    )
}

// Values a stock server answers with
fn default_config() -> HashMap<String, String> {
    HashMap::from([
        ("save".to_string(), "3600 1 300 100 60 10000".to_string()),
        ("slave-read-only".to_string(), "yes".to_string()),
    ])
}

fn ok() -> RespValue {
    RespValue::SimpleString("OK".to_string())
}

/// Simulated deployment implementing `Connector`
#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_node(&self, addr: &str, role: Role, master: Option<(String, u16)>) {
        self.state.lock().nodes.insert(
            addr.to_string(),
            MockNode {
                role,
                master,
                config: default_config(),
            },
        );
    }

    pub fn add_master(&self, addr: &str) {
        self.add_node(addr, Role::Master, None);
    }

    pub fn add_slave(&self, addr: &str, master: &str) {
        self.add_node(addr, Role::Slave, Some(split_addr(master)));
    }

    /// A freshly started node: replica of loopback
    pub fn add_unconfigured(&self, addr: &str) {
        self.add_node(addr, Role::Slave, Some(("127.0.0.1".to_string(), 6379)));
    }

    pub fn set_config(&self, addr: &str, key: &str, value: &str) {
        if let Some(node) = self.state.lock().nodes.get_mut(addr) {
            node.config.insert(key.to_string(), value.to_string());
        }
    }

    pub fn add_sentinel(&self, addr: &str) {
        self.state
            .lock()
            .sentinels
            .insert(addr.to_string(), Vec::new());
    }

    /// Make a sentinel report `name` with the given master and flags
    pub fn sentinel_monitors(&self, sentinel: &str, name: &str, master: &str, flags: &str) {
        let (ip, port) = split_addr(master);
        let mut state = self.state.lock();
        let masters = state.sentinels.entry(sentinel.to_string()).or_default();
        masters.retain(|m| m.name != name);
        masters.push(MockMonitored {
            name: name.to_string(),
            ip,
            port,
            flags: flags.to_string(),
            slaves: Vec::new(),
        });
    }

    pub fn sentinel_add_slave(&self, sentinel: &str, name: &str, slave: &str, flags: &str) {
        let (ip, port) = split_addr(slave);
        let mut state = self.state.lock();
        if let Some(monitored) = state
            .sentinels
            .get_mut(sentinel)
            .and_then(|ms| ms.iter_mut().find(|m| m.name == name))
        {
            monitored.slaves.push((ip, port, flags.to_string()));
        }
    }

    pub fn set_reachable(&self, addr: &str, reachable: bool) {
        let mut state = self.state.lock();
        if reachable {
            state.unreachable.remove(addr);
        } else {
            state.unreachable.insert(addr.to_string());
        }
    }

    /// Drop the link whenever `addr` receives a command starting with `prefix`
    pub fn fail_command(&self, addr: &str, prefix: &[&str]) {
        self.state.lock().failing.push((
            addr.to_string(),
            prefix.iter().map(|s| s.to_string()).collect(),
        ));
    }

    /// Delay every reply from `addr`
    pub fn set_delay(&self, addr: &str, delay: Duration) {
        self.state.lock().delays.insert(addr.to_string(), delay);
    }

    pub fn role_of(&self, addr: &str) -> Option<Role> {
        self.state.lock().nodes.get(addr).map(|n| n.role)
    }

    pub fn master_of(&self, addr: &str) -> Option<(String, u16)> {
        self.state
            .lock()
            .nodes
            .get(addr)
            .and_then(|n| n.master.clone())
    }

    pub fn dial_count(&self, addr: &str) -> usize {
        self.state.lock().dials.get(addr).copied().unwrap_or(0)
    }

    /// Commands received by `addr`, in order
    pub fn commands(&self, addr: &str) -> Vec<Vec<String>> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|(a, _)| a == addr)
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }

    /// Number of commands received by `addr` starting with `prefix`
    pub fn count(&self, addr: &str, prefix: &[&str]) -> usize {
        self.commands(addr)
            .iter()
            .filter(|cmd| {
                cmd.len() >= prefix.len() && cmd.iter().zip(prefix).all(|(a, b)| a == b)
            })
            .count()
    }
}

impl Connector for MockConnector {
    fn connect(
        &self,
        endpoint: &Endpoint,
        _ctx: &Context,
    ) -> Result<Box<dyn ControlPlane + Send>, ClientError> {
        let addr = endpoint.id();
        let mut state = self.state.lock();
        if state.unreachable.contains(&addr) {
            return Err(ClientError::ConnectFailed {
                host: endpoint.host.clone(),
                port: endpoint.port,
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
            });
        }
        *state.dials.entry(addr.clone()).or_insert(0) += 1;
        Ok(Box::new(MockClient {
            addr,
            state: Arc::clone(&self.state),
        }))
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(1)
    }
}

struct MockClient {
    addr: String,
    state: Arc<Mutex<MockState>>,
}

impl ControlPlane for MockClient {
    fn execute(&mut self, args: &[&str]) -> io::Result<RespValue> {
        let delay = self.state.lock().delays.get(&self.addr).copied();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let mut state = self.state.lock();
        if state.unreachable.contains(&self.addr) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection reset"));
        }
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        state.log.push((self.addr.clone(), args.clone()));
        let fails = state
            .failing
            .iter()
            .any(|(addr, prefix)| *addr == self.addr && args.starts_with(prefix));
        if fails {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection reset"));
        }

        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        if state.sentinels.contains_key(&self.addr) {
            Ok(sentinel_reply(&mut state, &self.addr, &argv))
        } else if let Some(node) = state.nodes.get_mut(&self.addr) {
            Ok(node_reply(node, &argv))
        } else {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "no such server"))
        }
    }
}

fn node_reply(node: &mut MockNode, argv: &[&str]) -> RespValue {
    match argv {
        ["PING"] => RespValue::SimpleString("PONG".to_string()),
        ["ROLE"] => match (&node.role, &node.master) {
            (Role::Slave, Some((host, port))) => RespValue::Array(vec![
                RespValue::bulk("slave"),
                RespValue::bulk(host.clone()),
                RespValue::Integer(i64::from(*port)),
                RespValue::bulk("connected"),
                RespValue::Integer(0),
            ]),
            _ => RespValue::Array(vec![
                RespValue::bulk("master"),
                RespValue::Integer(0),
                RespValue::Array(vec![]),
            ]),
        },
        ["CONFIG", "GET", key] => match node.config.get(*key) {
            Some(value) => RespValue::Array(vec![RespValue::bulk(*key), RespValue::bulk(value.clone())]),
            None => RespValue::Array(vec![]),
        },
        ["CONFIG", "SET", key, value] => {
            node.config.insert(key.to_string(), value.to_string());
            ok()
        }
        ["SLAVEOF", "NO", "ONE"] => {
            node.role = Role::Master;
            node.master = None;
            ok()
        }
        ["SLAVEOF", host, port] => match port.parse() {
            Ok(port) => {
                node.role = Role::Slave;
                node.master = Some((host.to_string(), port));
                ok()
            }
            Err(_) => RespValue::Error("ERR value is not an integer or out of range".to_string()),
        },
        ["BGSAVE"] => RespValue::SimpleString("Background saving started".to_string()),
        ["LASTSAVE"] => RespValue::Integer(1_700_000_000),
        _ => RespValue::Error(format!("ERR unknown command '{}'", argv.join(" "))),
    }
}

fn master_record(m: &MockMonitored) -> RespValue {
    record(&[
        ("name", m.name.clone()),
        ("ip", m.ip.clone()),
        ("port", m.port.to_string()),
        ("flags", m.flags.clone()),
        ("num-slaves", m.slaves.len().to_string()),
        ("quorum", "2".to_string()),
    ])
}

fn sentinel_reply(state: &mut MockState, addr: &str, argv: &[&str]) -> RespValue {
    let no_such_master = || RespValue::Error(NO_SUCH_MASTER.to_string());
    let masters = state.sentinels.entry(addr.to_string()).or_default();
    match argv {
        ["PING"] => RespValue::SimpleString("PONG".to_string()),
        ["SENTINEL", "MASTERS"] => RespValue::Array(masters.iter().map(master_record).collect()),
        ["SENTINEL", "MASTER", name] => match masters.iter().find(|m| m.name == *name) {
            Some(m) => master_record(m),
            None => no_such_master(),
        },
        ["SENTINEL", "SLAVES", name] => match masters.iter().find(|m| m.name == *name) {
            Some(m) => RespValue::Array(
                m.slaves
                    .iter()
                    .map(|(ip, port, flags)| {
                        record(&[
                            ("name", format!("{}:{}", ip, port)),
                            ("ip", ip.clone()),
                            ("port", port.to_string()),
                            ("flags", flags.clone()),
                            ("master-link-status", "ok".to_string()),
                        ])
                    })
                    .collect(),
            ),
            None => no_such_master(),
        },
        ["SENTINEL", "MONITOR", name, ip, port, _quorum] => {
            if masters.iter().any(|m| m.name == *name) {
                return RespValue::Error("ERR Duplicated master name".to_string());
            }
            match port.parse() {
                Ok(port) => {
                    masters.push(MockMonitored {
                        name: name.to_string(),
                        ip: ip.to_string(),
                        port,
                        flags: "master".to_string(),
                        slaves: Vec::new(),
                    });
                    ok()
                }
                Err(_) => RespValue::Error("ERR Invalid port".to_string()),
            }
        }
        ["SENTINEL", "SET", name, _param, _value] => {
            if masters.iter().any(|m| m.name == *name) {
                ok()
            } else {
                no_such_master()
            }
        }
        _ => RespValue::Error(format!("ERR unknown command '{}'", argv.join(" "))),
    }
}
