//! Relay configuration.
//!
//! Every field has a default, so a config file only lists what it changes and
//! no file at all is a valid setup.
//!
//! ```json
//! { "port": 9000, "join_notice": "existing_members" }
//! ```

use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

use crate::ensure;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("malformed config: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

impl ConfigError {
    fn invalid<S: ToString>(reason: S) -> Self {
        Self::Invalid { reason: reason.to_string() }
    }
}

/// Who hears that a connection has joined the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinNotice {
    /// No announcement.
    Disabled,
    /// Members already present; the joiner is added afterwards.
    ExistingMembers,
    /// Every member, the joiner included.
    #[default]
    AllMembers,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Requests for this path are upgrade requests.
    pub upgrade_path: String,
    /// Largest accepted request body, in bytes.
    pub max_request_size: u64,
    /// Largest accepted frame payload or reassembled message, in bytes.
    pub max_frame_size: u64,
    pub static_dir: PathBuf,
    /// Served for `/`.
    pub index_file: String,
    pub read_buffer_size: usize,
    /// Messages a member may have queued before it is dropped as too slow.
    pub relay_queue_capacity: usize,
    pub join_notice: JoinNotice,
    /// Whether a connection joining an empty relay is announced (to itself).
    pub announce_first_join: bool,
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
            upgrade_path: "/ws".to_owned(),
            max_request_size: 64 * 1024,
            max_frame_size: 64 * 1024,
            static_dir: PathBuf::from("static"),
            index_file: "index.html".to_owned(),
            read_buffer_size: 8 * 1024,
            relay_queue_capacity: 1024,
            join_notice: JoinNotice::AllMembers,
            announce_first_join: true,
            log_level: "info".to_owned(),
        }
    }
}

impl RelayConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_owned(), source })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(self.upgrade_path.starts_with('/'), ConfigError::invalid(format!("upgrade_path `{}` must start with `/`", self.upgrade_path)));
        ensure!(!self.index_file.is_empty(), ConfigError::invalid("index_file must not be empty"));
        ensure!(self.max_request_size > 0, ConfigError::invalid("max_request_size must be positive"));
        ensure!(self.max_frame_size > 0, ConfigError::invalid("max_frame_size must be positive"));
        ensure!(self.read_buffer_size > 0, ConfigError::invalid("read_buffer_size must be positive"));
        ensure!(self.relay_queue_capacity > 0, ConfigError::invalid("relay_queue_capacity must be positive"));
        self.level()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// The configured log level.
    pub fn level(&self) -> Result<Level, ConfigError> {
        self.log_level.parse().map_err(|_parse| ConfigError::invalid(format!("unknown log_level `{}`", self.log_level)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn empty_object_gives_defaults() {
        let config = RelayConfig::from_json_str("{}").unwrap();

        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.socket_addr(), "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.upgrade_path, "/ws");
        assert_eq!(config.level().unwrap(), Level::INFO);
    }

    #[test]
    fn fields_override_defaults() {
        let config = RelayConfig::from_json_str(indoc! {r#"
            {
                "host": "0.0.0.0",
                "port": 9000,
                "upgrade_path": "/chat",
                "join_notice": "existing_members",
                "announce_first_join": false,
                "log_level": "debug"
            }
        "#})
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.upgrade_path, "/chat");
        assert_eq!(config.join_notice, JoinNotice::ExistingMembers);
        assert!(!config.announce_first_join);
        assert_eq!(config.level().unwrap(), Level::DEBUG);
        assert_eq!(config.max_frame_size, 64 * 1024);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(RelayConfig::from_json_str(r#"{"upgrade_path": "ws"}"#), Err(ConfigError::Invalid { .. })));
        assert!(matches!(RelayConfig::from_json_str(r#"{"relay_queue_capacity": 0}"#), Err(ConfigError::Invalid { .. })));
        assert!(matches!(RelayConfig::from_json_str(r#"{"log_level": "loud"}"#), Err(ConfigError::Invalid { .. })));
        assert!(matches!(RelayConfig::from_json_str(r#"{"port": "eighty"}"#), Err(ConfigError::Json { .. })));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(RelayConfig::from_json_file("/no/such/relay.json"), Err(ConfigError::Io { .. })));
    }
}
