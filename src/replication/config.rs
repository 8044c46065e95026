use serde::{Deserialize, Serialize};
use std::time::Duration;

// TigerStyle: Explicit limits with _MAX/_MIN suffix
pub const GOSSIP_INTERVAL_MS_MIN: u64 = 10;
pub const GOSSIP_INTERVAL_MS_MAX: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub enabled: bool,
    /// Address the gossip listener binds to
    pub listen_addr: String,
    /// Gossip addresses of peer regions
    pub peers: Vec<String>,
    pub gossip_interval_ms: u64,
    /// Deltas kept per unreachable peer before the oldest are dropped
    pub max_backlog: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        ReplicationConfig {
            enabled: false,
            listen_addr: "0.0.0.0:7000".to_string(),
            peers: Vec::new(),
            gossip_interval_ms: 100,
            max_backlog: 10_000,
        }
    }
}

impl ReplicationConfig {
    pub fn new_single_region() -> Self {
        Self::default()
    }

    pub fn new_cluster(listen_addr: String, peers: Vec<String>) -> Self {
        ReplicationConfig {
            enabled: true,
            listen_addr,
            peers,
            ..Self::default()
        }
    }

    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(
            self.gossip_interval_ms
                .clamp(GOSSIP_INTERVAL_MS_MIN, GOSSIP_INTERVAL_MS_MAX),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_single_region() {
        let config = ReplicationConfig::new_single_region();
        assert!(!config.enabled);
        assert!(config.peers.is_empty());
    }

    #[test]
    fn test_gossip_interval_clamped() {
        let mut config = ReplicationConfig::new_cluster("127.0.0.1:0".into(), vec![]);
        config.gossip_interval_ms = 1;
        assert_eq!(config.gossip_interval(), Duration::from_millis(GOSSIP_INTERVAL_MS_MIN));
        config.gossip_interval_ms = 250;
        assert_eq!(config.gossip_interval(), Duration::from_millis(250));
    }
}
