use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{HiveError, Result};

/// Connection settings for the shared key-value store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// Maximum number of store operations in flight at once.
    /// Callers beyond this bound wait for a free slot.
    pub pool_size: usize,
    /// Upper bound on a single store round trip.
    pub op_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            pool_size: 10,
            op_timeout_ms: 2000,
        }
    }
}

impl StoreConfig {
    /// Connection URL understood by the redis client.
    pub fn url(&self) -> String {
        match self.password.as_deref() {
            Some(password) if !password.is_empty() => {
                format!("redis://:{}@{}:{}/", password, self.host, self.port)
            }
            _ => format!("redis://{}:{}/", self.host, self.port),
        }
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

/// Node selection strategy used for container placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPolicyKind {
    #[default]
    Random,
    Unique,
}

impl std::fmt::Display for RunPolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPolicyKind::Random => write!(f, "random"),
            RunPolicyKind::Unique => write!(f, "unique"),
        }
    }
}

impl FromStr for RunPolicyKind {
    type Err = HiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "default" | "random" => Ok(RunPolicyKind::Random),
            "unique" => Ok(RunPolicyKind::Unique),
            other => Err(HiveError::InvalidConfig(format!(
                "unknown run policy {other:?}, expected random or unique"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub name: String,
    pub zone: String,
    pub listen_addr: SocketAddr,
    /// Host other nodes use to reach this one.
    pub advertise_host: String,
    pub docker_socket: PathBuf,
    pub run_policy: RunPolicyKind,
    pub heartbeat_interval_ms: u64,
    pub node_ttl_ms: u64,
    pub election_interval_ms: u64,
    /// Largest instance count a single container job may request.
    pub max_instances: usize,
    pub store: StoreConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "localhost".to_string(),
            zone: "default".to_string(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 4500)),
            advertise_host: "localhost".to_string(),
            docker_socket: PathBuf::from("/var/run/docker.sock"),
            run_policy: RunPolicyKind::Random,
            heartbeat_interval_ms: 1000,
            node_ttl_ms: 5000,
            election_interval_ms: 2000,
            max_instances: 1000,
            store: StoreConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(name: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            zone: zone.into(),
            ..Default::default()
        }
    }

    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    pub fn with_advertise_host(mut self, host: impl Into<String>) -> Self {
        self.advertise_host = host.into();
        self
    }

    pub fn with_run_policy(mut self, kind: RunPolicyKind) -> Self {
        self.run_policy = kind;
        self
    }

    pub fn with_max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = max_instances;
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn node_ttl(&self) -> Duration {
        Duration::from_millis(self.node_ttl_ms)
    }

    pub fn election_interval(&self) -> Duration {
        Duration::from_millis(self.election_interval_ms)
    }

    /// Master key TTL: one election interval plus one second of slack.
    pub fn master_ttl(&self) -> Duration {
        self.election_interval() + Duration::from_secs(1)
    }

    /// `host:port` recorded in the node registry.
    pub fn advertise_addr(&self) -> String {
        format!("{}:{}", self.advertise_host, self.listen_addr.port())
    }

    pub fn connection_string(&self) -> String {
        format!("http://{}", self.advertise_addr())
    }

    pub fn validate(&self) -> Result<()> {
        validate_segment("node name", &self.name)?;
        validate_segment("zone", &self.zone)?;
        if self.zone == "jobs" {
            return Err(HiveError::InvalidConfig(
                "zone name \"jobs\" is reserved".to_string(),
            ));
        }
        if self.heartbeat_interval_ms == 0 || self.election_interval_ms == 0 {
            return Err(HiveError::InvalidConfig(
                "heartbeat and election intervals must be non-zero".to_string(),
            ));
        }
        if self.node_ttl_ms <= self.heartbeat_interval_ms {
            return Err(HiveError::InvalidConfig(format!(
                "node ttl ({}ms) must exceed the heartbeat interval ({}ms)",
                self.node_ttl_ms, self.heartbeat_interval_ms
            )));
        }
        if self.store.pool_size == 0 {
            return Err(HiveError::InvalidConfig(
                "store pool size must be at least 1".to_string(),
            ));
        }
        if self.store.op_timeout_ms == 0 {
            return Err(HiveError::InvalidConfig(
                "store operation timeout must be non-zero".to_string(),
            ));
        }
        if self.max_instances == 0 {
            return Err(HiveError::InvalidConfig(
                "max instances must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Node names and zones become key segments, so they may not contain `:`.
fn validate_segment(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(HiveError::InvalidConfig(format!("{what} must not be empty")));
    }
    if value.contains(':') {
        return Err(HiveError::InvalidConfig(format!(
            "{what} {value:?} must not contain ':'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_config_default() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.host, "localhost");
        assert_eq!(cfg.port, 6379);
        assert!(cfg.password.is_none());
        assert_eq!(cfg.pool_size, 10);
        assert_eq!(cfg.op_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn store_url_without_password() {
        let cfg = StoreConfig {
            host: "10.0.0.5".to_string(),
            port: 6380,
            ..Default::default()
        };
        assert_eq!(cfg.url(), "redis://10.0.0.5:6380/");
    }

    #[test]
    fn store_url_with_password() {
        let cfg = StoreConfig {
            password: Some("s3cret".to_string()),
            ..Default::default()
        };
        assert_eq!(cfg.url(), "redis://:s3cret@localhost:6379/");

        let empty = StoreConfig {
            password: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(empty.url(), "redis://localhost:6379/");
    }

    #[test]
    fn node_config_default() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.zone, "default");
        assert_eq!(cfg.listen_addr.port(), 4500);
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(1));
        assert_eq!(cfg.node_ttl(), Duration::from_secs(5));
        assert_eq!(cfg.election_interval(), Duration::from_secs(2));
        assert_eq!(cfg.run_policy, RunPolicyKind::Random);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn master_ttl_is_interval_plus_one_second() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.master_ttl(), Duration::from_secs(3));
    }

    #[test]
    fn connection_string_uses_advertise_host() {
        let cfg = NodeConfig::new("a", "default")
            .with_advertise_host("10.1.1.1")
            .with_listen_addr("0.0.0.0:4600".parse().unwrap());
        assert_eq!(cfg.advertise_addr(), "10.1.1.1:4600");
        assert_eq!(cfg.connection_string(), "http://10.1.1.1:4600");
    }

    #[test]
    fn run_policy_parsing() {
        assert_eq!("default".parse::<RunPolicyKind>().unwrap(), RunPolicyKind::Random);
        assert_eq!("random".parse::<RunPolicyKind>().unwrap(), RunPolicyKind::Random);
        assert_eq!("UNIQUE".parse::<RunPolicyKind>().unwrap(), RunPolicyKind::Unique);
        assert!("spread".parse::<RunPolicyKind>().is_err());
    }

    #[test]
    fn validate_rejects_colons_and_reserved_zone() {
        assert!(NodeConfig::new("a:b", "default").validate().is_err());
        assert!(NodeConfig::new("a", "us:east").validate().is_err());
        assert!(NodeConfig::new("a", "jobs").validate().is_err());
        assert!(NodeConfig::new("", "default").validate().is_err());
    }

    #[test]
    fn validate_rejects_ttl_shorter_than_heartbeat() {
        let mut cfg = NodeConfig::default();
        cfg.node_ttl_ms = cfg.heartbeat_interval_ms;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_pool() {
        let cfg = NodeConfig::default().with_store(StoreConfig {
            pool_size: 0,
            ..Default::default()
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_store_timeout() {
        let cfg = NodeConfig::default().with_store(StoreConfig {
            op_timeout_ms: 0,
            ..Default::default()
        });
        assert!(matches!(cfg.validate(), Err(HiveError::InvalidConfig(_))));

        let cfg = NodeConfig::default().with_store(StoreConfig {
            op_timeout_ms: 1,
            ..Default::default()
        });
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_max_instances() {
        assert_eq!(NodeConfig::default().max_instances, 1000);
        let cfg = NodeConfig::default().with_max_instances(0);
        assert!(matches!(cfg.validate(), Err(HiveError::InvalidConfig(_))));
    }
}
