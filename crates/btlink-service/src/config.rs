//! Service configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Highest RFCOMM channel number the Bluetooth spec allows.
const MAX_RFCOMM_CHANNEL: u8 = 30;

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Session settings.
    pub session: SessionConfig,
}

/// Server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            // Loopback only; the bridge is meant for clients on this host.
            bind: "127.0.0.1:20110".into(),
        }
    }
}

/// Session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// RFCOMM channel used for Bluetooth Classic connections.
    pub rfcomm_channel: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { rfcomm_channel: 1 }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "server.bind {:?} is not a host:port address",
                self.server.bind
            )));
        }
        if !(1..=MAX_RFCOMM_CHANNEL).contains(&self.session.rfcomm_channel) {
            return Err(ConfigError::Invalid(format!(
                "session.rfcomm_channel must be 1..={MAX_RFCOMM_CHANNEL}, got {}",
                self.session.rfcomm_channel
            )));
        }
        Ok(())
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:20110");
        assert_eq!(config.session.rfcomm_channel, 1);
    }

    #[test]
    fn loads_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[session]\nrfcomm_channel = 4").unwrap();
        let config = Config::load_validated(file.path()).unwrap();
        assert_eq!(config.session.rfcomm_channel, 4);
        assert_eq!(config.server.bind, "127.0.0.1:20110");
    }

    #[test]
    fn rejects_bad_bind_address() {
        let config = Config {
            server: ServerConfig {
                bind: "not-an-address".into(),
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_rfcomm_channel_out_of_range() {
        let config = Config {
            session: SessionConfig { rfcomm_channel: 0 },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            session: SessionConfig { rfcomm_channel: 31 },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Config::load("/nonexistent/btlink.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
