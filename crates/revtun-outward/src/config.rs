//! Outward agent configuration: a non-empty list of `networks[]` plus the
//! three interval constants, overridable at top level (§4.10, §6).
//!
//! Grounded on the teacher's `ServerConfig::load` pattern, generalized from
//! a single `ServerSection` to a `networks: Vec<NetworkSection>`, mirroring
//! `original_source/out/config.go`'s `Config{Networks, RetryInterval,
//! HeartbeatInterval, HeartbeatTimeout}`.

use revtun_core::{
    TunnelError, DEFAULT_TOPIC, HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS, RETRY_INTERVAL_MS,
};
use serde::Deserialize;
use std::path::Path;

const MIN_NETWORKS: usize = 1;
const MAX_NETWORKS: usize = 16;

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    networks: Vec<NetworkSection>,
    #[serde(default = "default_retry_interval")]
    retry_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval")]
    heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout")]
    heartbeat_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct NetworkSection {
    server_host: String,
    server_port: u16,
    backend_host: String,
    backend_port: u16,
    #[serde(default = "default_topic")]
    topic: String,
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

fn default_retry_interval() -> u64 {
    RETRY_INTERVAL_MS
}

fn default_heartbeat_interval() -> u64 {
    HEARTBEAT_INTERVAL_MS
}

fn default_heartbeat_timeout() -> u64 {
    HEARTBEAT_TIMEOUT_MS
}

fn default_config_file() -> ConfigFile {
    ConfigFile {
        networks: vec![NetworkSection {
            server_host: "127.0.0.1".to_string(),
            server_port: 40001,
            backend_host: "127.0.0.1".to_string(),
            backend_port: 40003,
            topic: default_topic(),
        }],
        retry_interval_ms: default_retry_interval(),
        heartbeat_interval_ms: default_heartbeat_interval(),
        heartbeat_timeout_ms: default_heartbeat_timeout(),
    }
}

/// One backend network this agent exposes through the rendezvous server.
#[derive(Debug, Clone)]
pub struct Network {
    pub server_host: String,
    pub server_port: u16,
    pub backend_host: String,
    pub backend_port: u16,
    pub topic: String,
}

impl Network {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn backend_addr(&self) -> String {
        format!("{}:{}", self.backend_host, self.backend_port)
    }
}

/// Resolved outward-agent configuration.
#[derive(Debug, Clone)]
pub struct OutwardConfig {
    pub networks: Vec<Network>,
    pub retry_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
}

impl OutwardConfig {
    /// Load from an optional TOML file, falling back to in-code defaults
    /// when the path is absent or does not exist (§6).
    pub fn load(config_path: Option<&Path>) -> Result<Self, TunnelError> {
        let file = match config_path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path).map_err(TunnelError::Io)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| TunnelError::ConfigInvalid(format!("{}: {e}", path.display())))?
            }
            _ => default_config_file(),
        };

        let cfg = Self {
            networks: file
                .networks
                .into_iter()
                .map(|n| Network {
                    server_host: n.server_host,
                    server_port: n.server_port,
                    backend_host: n.backend_host,
                    backend_port: n.backend_port,
                    topic: n.topic,
                })
                .collect(),
            retry_interval_ms: file.retry_interval_ms,
            heartbeat_interval_ms: file.heartbeat_interval_ms,
            heartbeat_timeout_ms: file.heartbeat_timeout_ms,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), TunnelError> {
        if self.networks.len() < MIN_NETWORKS || self.networks.len() > MAX_NETWORKS {
            return Err(TunnelError::ConfigInvalid(format!(
                "networks[] must have between {MIN_NETWORKS} and {MAX_NETWORKS} entries, got {}",
                self.networks.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_no_file_given() {
        let cfg = OutwardConfig::load(None).unwrap();
        assert_eq!(cfg.networks.len(), 1);
        assert_eq!(cfg.networks[0].topic, DEFAULT_TOPIC);
        assert_eq!(cfg.retry_interval_ms, RETRY_INTERVAL_MS);
        assert_eq!(cfg.heartbeat_interval_ms, HEARTBEAT_INTERVAL_MS);
        assert_eq!(cfg.heartbeat_timeout_ms, HEARTBEAT_TIMEOUT_MS);
    }

    #[test]
    fn zero_networks_is_config_invalid() {
        let cfg = OutwardConfig {
            networks: vec![],
            retry_interval_ms: RETRY_INTERVAL_MS,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            heartbeat_timeout_ms: HEARTBEAT_TIMEOUT_MS,
        };
        assert!(matches!(cfg.validate(), Err(TunnelError::ConfigInvalid(_))));
    }

    #[test]
    fn seventeen_networks_is_config_invalid() {
        let net = Network {
            server_host: "h".into(),
            server_port: 1,
            backend_host: "h".into(),
            backend_port: 1,
            topic: "t".into(),
        };
        let cfg = OutwardConfig {
            networks: std::iter::repeat_with(|| net.clone()).take(17).collect(),
            retry_interval_ms: RETRY_INTERVAL_MS,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            heartbeat_timeout_ms: HEARTBEAT_TIMEOUT_MS,
        };
        assert!(matches!(cfg.validate(), Err(TunnelError::ConfigInvalid(_))));
    }

    #[test]
    fn parses_toml_file() {
        let dir = std::env::temp_dir().join(format!("revtun-outward-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.toml");
        std::fs::write(
            &path,
            r#"
            retry_interval_ms = 1000

            [[networks]]
            server_host = "example.com"
            server_port = 40001
            backend_host = "127.0.0.1"
            backend_port = 22
            topic = "ssh"
            "#,
        )
        .unwrap();

        let cfg = OutwardConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.networks.len(), 1);
        assert_eq!(cfg.networks[0].topic, "ssh");
        assert_eq!(cfg.retry_interval_ms, 1000);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
