//! Inward agent configuration: a non-empty list of `networks[]`, each a
//! local listener bound to one rendezvous-server topic (§4.10, §6).
//!
//! Grounded on the teacher's `ServerConfig::load` pattern, generalized to
//! `networks: Vec<NetworkSection>`, mirroring
//! `original_source/in/config.go`'s `Config{Networks}`.

use revtun_core::{TunnelError, DEFAULT_TOPIC};
use serde::Deserialize;
use std::path::Path;

const MIN_NETWORKS: usize = 1;
const MAX_NETWORKS: usize = 16;

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    networks: Vec<NetworkSection>,
}

#[derive(Debug, Clone, Deserialize)]
struct NetworkSection {
    server_host: String,
    server_port: u16,
    bind: String,
    port: u16,
    #[serde(default = "default_topic")]
    topic: String,
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

fn default_config_file() -> ConfigFile {
    ConfigFile {
        networks: vec![NetworkSection {
            server_host: "127.0.0.1".to_string(),
            server_port: 40001,
            bind: "127.0.0.1".to_string(),
            port: 40002,
            topic: default_topic(),
        }],
    }
}

/// One local listener this agent exposes to clients, matched to a topic on
/// the rendezvous server.
#[derive(Debug, Clone)]
pub struct Network {
    pub server_host: String,
    pub server_port: u16,
    pub bind: String,
    pub port: u16,
    pub topic: String,
}

impl Network {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Resolved inward-agent configuration.
#[derive(Debug, Clone)]
pub struct InwardConfig {
    pub networks: Vec<Network>,
}

impl InwardConfig {
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
                    bind: n.bind,
                    port: n.port,
                    topic: n.topic,
                })
                .collect(),
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
        let cfg = InwardConfig::load(None).unwrap();
        assert_eq!(cfg.networks.len(), 1);
        assert_eq!(cfg.networks[0].topic, DEFAULT_TOPIC);
        assert_eq!(cfg.networks[0].port, 40002);
    }

    #[test]
    fn zero_networks_is_config_invalid() {
        let cfg = InwardConfig { networks: vec![] };
        assert!(matches!(cfg.validate(), Err(TunnelError::ConfigInvalid(_))));
    }

    #[test]
    fn seventeen_networks_is_config_invalid() {
        let net = Network {
            server_host: "h".into(),
            server_port: 1,
            bind: "h".into(),
            port: 1,
            topic: "t".into(),
        };
        let cfg = InwardConfig {
            networks: std::iter::repeat_with(|| net.clone()).take(17).collect(),
        };
        assert!(matches!(cfg.validate(), Err(TunnelError::ConfigInvalid(_))));
    }

    #[test]
    fn parses_toml_file() {
        let dir = std::env::temp_dir().join(format!("revtun-inward-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("in.toml");
        std::fs::write(
            &path,
            r#"
            [[networks]]
            server_host = "example.com"
            server_port = 40001
            bind = "0.0.0.0"
            port = 2222
            topic = "ssh"
            "#,
        )
        .unwrap();

        let cfg = InwardConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.networks.len(), 1);
        assert_eq!(cfg.networks[0].topic, "ssh");
        assert_eq!(cfg.networks[0].port, 2222);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
