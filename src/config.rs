use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;
use anyhow::Result;

use crate::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub bind_address: Ipv4Addr,
    pub port_base: u16,
    pub hello_interval_ms: u64,
    pub lsa_refresh_interval: u64,
    pub lsa_max_age: u64,
    pub recv_buffer_size: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            bind_address: Ipv4Addr::LOCALHOST,
            port_base: 10000,
            hello_interval_ms: 1000, // 1 second tick
            lsa_refresh_interval: 15, // 15 seconds
            lsa_max_age: 30,         // 30 seconds
            recv_buffer_size: 4096,
        }
    }
}

impl ProtocolConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ProtocolConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.hello_interval_ms)
    }

    pub fn port_for(&self, id: NodeId) -> Option<u16> {
        self.port_base.checked_add(id)
    }

    pub fn node_for_port(&self, port: u16) -> Option<NodeId> {
        port.checked_sub(self.port_base)
    }

    pub fn socket_addr(&self, id: NodeId) -> Option<SocketAddr> {
        self.port_for(id)
            .map(|port| SocketAddr::V4(SocketAddrV4::new(self.bind_address, port)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_mapping_round_trips() {
        let config = ProtocolConfig::default();
        assert_eq!(config.port_for(7), Some(10007));
        assert_eq!(config.node_for_port(10007), Some(7));
        assert_eq!(config.node_for_port(9999), None);
        assert_eq!(
            config.socket_addr(3),
            Some("127.0.0.1:10003".parse().unwrap())
        );
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: ProtocolConfig =
            serde_json::from_str(r#"{ "port_base": 20000, "lsa_max_age": 60 }"#).unwrap();
        assert_eq!(config.port_base, 20000);
        assert_eq!(config.lsa_max_age, 60);
        assert_eq!(config.lsa_refresh_interval, 15);
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
    }

    #[test]
    fn save_then_load() {
        let path = std::env::temp_dir().join(format!("ospf-sim-config-{}.json", std::process::id()));
        let config = ProtocolConfig {
            port_base: 30000,
            ..ProtocolConfig::default()
        };
        config.save(&path).unwrap();
        let loaded = ProtocolConfig::load(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(loaded, config);
    }
}
