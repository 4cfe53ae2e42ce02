//! Rendezvous server configuration: TOML file + CLI overrides (§4.10, §6).

use revtun_core::TunnelError;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
}

#[derive(Debug, Clone, Deserialize)]
struct ServerSection {
    #[serde(default = "default_bind")]
    bind: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    40001
}

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl ServerConfig {
    /// Load from an optional TOML file, merged with CLI overrides. A
    /// missing path, or a path whose file does not exist, silently falls
    /// back to in-code defaults (§6) rather than erroring.
    pub fn load(
        config_path: Option<&Path>,
        cli_bind: Option<&str>,
        cli_port: Option<u16>,
    ) -> Result<Self, TunnelError> {
        let file = match config_path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path).map_err(TunnelError::Io)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| TunnelError::ConfigInvalid(format!("{}: {e}", path.display())))?
            }
            _ => ConfigFile {
                server: ServerSection::default(),
            },
        };

        let bind = cli_bind.map(str::to_string).unwrap_or(file.server.bind);
        let port = cli_port.unwrap_or(file.server.port);

        let cfg = Self { bind, port };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), TunnelError> {
        self.bind
            .parse::<IpAddr>()
            .map_err(|e| TunnelError::ConfigInvalid(format!("invalid bind address: {e}")))?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, TunnelError> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .map_err(|e| TunnelError::ConfigInvalid(format!("invalid bind/port: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_no_file_given() {
        let cfg = ServerConfig::load(None, None, None).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1");
        assert_eq!(cfg.port, 40001);
    }

    #[test]
    fn cli_overrides_defaults() {
        let cfg = ServerConfig::load(None, Some("0.0.0.0"), Some(9999)).unwrap();
        assert_eq!(cfg.bind, "0.0.0.0");
        assert_eq!(cfg.port, 9999);
    }

    #[test]
    fn invalid_bind_address_is_config_invalid() {
        let cfg = ServerConfig {
            bind: "not-an-ip".into(),
            port: 1,
        };
        assert!(matches!(cfg.validate(), Err(TunnelError::ConfigInvalid(_))));
    }
}
