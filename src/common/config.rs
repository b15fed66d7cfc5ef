//! Configuration for tabletmaster components

use crate::common::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "tabletmaster.toml";

/// Environment variable prefix (`TABLETMASTER__MASTER__BIND_ADDR=...`)
pub const ENV_PREFIX: &str = "TABLETMASTER";

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Permanent node identity; generated at startup when absent
    #[serde(default)]
    pub node_id: Option<String>,

    /// Master-specific config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<MasterConfig>,

    /// Tablet server specific config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tserver: Option<TServerConfig>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Master configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Bind address for the RPC/HTTP endpoint
    #[serde(default = "default_master_bind")]
    pub bind_addr: SocketAddr,

    /// Every master in the consensus group, including this one:
    /// `host:port` or `permanent_uuid@host:port`
    #[serde(default)]
    pub master_addresses: Vec<String>,

    /// Start as leader without waiting for an election
    #[serde(default)]
    pub leader: bool,

    /// Bounded wait for the leadership snapshot before answering "not ready"
    #[serde(default = "default_leader_lock_timeout")]
    pub leader_lock_timeout_ms: u64,

    /// Fault injection: sleep before answering tablet location lookups. Never enable in production.
    #[serde(default)]
    pub inject_latency_on_tablet_lookups_ms: u64,

    /// Timeout for master-to-master calls (dump fan-out, registration probes)
    #[serde(default = "default_peer_rpc_timeout")]
    pub peer_rpc_timeout_ms: u64,

    /// Where on-disk state dumps are written
    #[serde(default)]
    pub dump_dir: Option<PathBuf>,
}

fn default_master_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7100))
}
fn default_leader_lock_timeout() -> u64 {
    1000
}
fn default_peer_rpc_timeout() -> u64 {
    5000
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_master_bind(),
            master_addresses: Vec::new(),
            leader: false,
            leader_lock_timeout_ms: default_leader_lock_timeout(),
            inject_latency_on_tablet_lookups_ms: 0,
            peer_rpc_timeout_ms: default_peer_rpc_timeout(),
            dump_dir: None,
        }
    }
}

impl MasterConfig {
    pub fn leader_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.leader_lock_timeout_ms)
    }

    pub fn tablet_lookup_latency(&self) -> Option<Duration> {
        (self.inject_latency_on_tablet_lookups_ms > 0)
            .then(|| Duration::from_millis(self.inject_latency_on_tablet_lookups_ms))
    }

    pub fn peer_rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_rpc_timeout_ms)
    }

    /// Split `master_addresses` into (uuid, address) pairs.
    pub fn master_entries(&self) -> Vec<(Option<String>, String)> {
        self.master_addresses
            .iter()
            .map(|entry| match entry.split_once('@') {
                Some((uuid, addr)) => (Some(uuid.to_string()), addr.to_string()),
                None => (None, entry.clone()),
            })
            .collect()
    }
}

/// Tablet server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TServerConfig {
    /// Address advertised in the registration payload
    #[serde(default = "default_tserver_bind")]
    pub bind_addr: SocketAddr,

    /// Masters to heartbeat (host:port)
    #[serde(default)]
    pub master_addresses: Vec<String>,

    /// Heartbeat period
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Per-heartbeat timeout
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_ms: u64,
}

fn default_tserver_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9100))
}
fn default_heartbeat_interval() -> u64 {
    1000
}
fn default_heartbeat_timeout() -> u64 {
    3000
}

impl Default for TServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_tserver_bind(),
            master_addresses: Vec::new(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            heartbeat_timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl TServerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

impl Config {
    /// Load `tabletmaster.toml` (optional) overlaid with `TABLETMASTER__*` env vars.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("master.master_addresses")
                    .with_list_parse_key("tserver.master_addresses")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
