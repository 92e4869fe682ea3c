//! Registry configuration.
//!
//! Layered loading, highest precedence first:
//!
//! - Environment variables (`ROLLCALL_*`)
//! - TOML file named by `ROLLCALL_CONFIG`
//! - `./rollcall.toml`
//! - Hardcoded defaults
//!
//! ```toml
//! address = "10.0.0.1:2181"
//! session_timeout_ms = 5000
//!
//! [node]
//! server_type = "echo-server"
//! zone = 0
//! mode = "MASTER_SLAVE"
//!
//! [[watch]]
//! server_type = "cache-server"
//! zone = 1
//!
//! [[watch]]
//! server_type = "db-server"
//! ```

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use rollcall_core::NodeMode;
use rollcall_core::ServerType;
use rollcall_core::WatchSelector;
use rollcall_core::Zone;
use rollcall_core::constants::DEFAULT_SESSION_TIMEOUT_MS;
use rollcall_core::constants::DEFAULT_STORE_ADDRESS;
use rollcall_core::constants::MAX_SESSION_TIMEOUT_MS;
use rollcall_core::constants::MAX_WATCH_SELECTORS;
use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;
use tracing::info;
use tracing::warn;

/// Environment variable naming an explicit config file.
pub const CONFIG_FILE_ENV: &str = "ROLLCALL_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "./rollcall.toml";

/// Configuration errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// The config file could not be read.
    #[snafu(display("failed to read config file '{}': {source}", path.display()))]
    ReadFile {
        /// File that was read.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[snafu(display("failed to parse config file '{}': {source}", path.display()))]
    ParseToml {
        /// File that was parsed.
        path: PathBuf,
        /// The underlying error.
        source: toml::de::Error,
    },

    /// A configuration value is invalid.
    #[snafu(display("invalid configuration for {key}: '{value}' ({reason})"))]
    InvalidValue {
        /// Setting name.
        key: String,
        /// Offending value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Top-level registry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Coordination store connection string.
    pub address: String,
    /// Session timeout handed to the store client.
    pub session_timeout_ms: u64,
    /// Identity and election mode of this process.
    pub node: NodeConfig,
    /// Discovery selectors.
    pub watch: Vec<WatchConfig>,
}

/// Identity and election settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Server type name; required before registration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_type: Option<String>,
    /// Deployment zone.
    pub zone: Zone,
    /// Leadership mode.
    pub mode: NodeMode,
}

/// One discovery selector. Without a zone, every zone of the type is watched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Watched server type.
    pub server_type: String,
    /// Watched zone, if restricted to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<Zone>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_STORE_ADDRESS.to_string(),
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            node: NodeConfig::default(),
            watch: Vec::new(),
        }
    }
}

impl RegistryConfig {
    /// Load with layers (defaults, TOML, environment), then validate.
    pub fn load_with_layers() -> Result<Self, ConfigError> {
        let mut config = Self::load_toml_with_fallbacks()?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::ParseToml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Tries `ROLLCALL_CONFIG`, then `./rollcall.toml`, then defaults.
    fn load_toml_with_fallbacks() -> Result<Self, ConfigError> {
        if let Ok(config_path) = std::env::var(CONFIG_FILE_ENV) {
            let path = Path::new(&config_path);
            if path.exists() {
                info!(path = %config_path, "loading configuration from {CONFIG_FILE_ENV}");
                return Self::from_toml_file(path);
            }
            warn!(path = %config_path, "{CONFIG_FILE_ENV} specified but not found");
        }

        let local = Path::new(LOCAL_CONFIG_FILE);
        if local.exists() {
            info!(path = LOCAL_CONFIG_FILE, "loading configuration");
            return Self::from_toml_file(local);
        }

        info!("no configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Apply `ROLLCALL_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where F: Fn(&str) -> Option<String> {
        if let Some(val) = lookup("ROLLCALL_ADDRESS") {
            self.address = val;
        }
        if let Some(val) = lookup("ROLLCALL_SESSION_TIMEOUT_MS") {
            self.session_timeout_ms = val.parse().map_err(|e| ConfigError::InvalidValue {
                key: "ROLLCALL_SESSION_TIMEOUT_MS".to_string(),
                value: val.clone(),
                reason: format!("must be a number of milliseconds: {e}"),
            })?;
        }
        if let Some(val) = lookup("ROLLCALL_SERVER_TYPE") {
            self.node.server_type = Some(val);
        }
        if let Some(val) = lookup("ROLLCALL_ZONE") {
            self.node.zone = val.parse().map_err(|e| ConfigError::InvalidValue {
                key: "ROLLCALL_ZONE".to_string(),
                value: val.clone(),
                reason: format!("must be a decimal integer: {e}"),
            })?;
        }
        if let Some(val) = lookup("ROLLCALL_NODE_MODE") {
            self.node.mode = NodeMode::parse(&val).ok_or_else(|| ConfigError::InvalidValue {
                key: "ROLLCALL_NODE_MODE".to_string(),
                value: val.clone(),
                reason: "expected master_slave or master_master".to_string(),
            })?;
        }
        Ok(())
    }

    /// Check every value against its bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "address".to_string(),
                value: self.address.clone(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.session_timeout_ms == 0 || self.session_timeout_ms > MAX_SESSION_TIMEOUT_MS {
            return Err(ConfigError::InvalidValue {
                key: "session_timeout_ms".to_string(),
                value: self.session_timeout_ms.to_string(),
                reason: format!("must be between 1 and {MAX_SESSION_TIMEOUT_MS}"),
            });
        }
        self.server_type()?;
        if self.watch.len() > MAX_WATCH_SELECTORS as usize {
            return Err(ConfigError::InvalidValue {
                key: "watch".to_string(),
                value: self.watch.len().to_string(),
                reason: format!("at most {MAX_WATCH_SELECTORS} selectors"),
            });
        }
        self.selectors()?;
        Ok(())
    }

    /// Session timeout as a duration.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// The validated server type, if configured.
    pub fn server_type(&self) -> Result<Option<ServerType>, ConfigError> {
        self.node
            .server_type
            .as_deref()
            .map(|name| validated_type("node.server_type", name))
            .transpose()
    }

    /// The configured discovery selectors.
    pub fn selectors(&self) -> Result<Vec<WatchSelector>, ConfigError> {
        self.watch
            .iter()
            .map(|entry| {
                let server_type = validated_type("watch.server_type", &entry.server_type)?;
                Ok(match entry.zone {
                    Some(zone) => WatchSelector::Zone { server_type, zone },
                    None => WatchSelector::Type { server_type },
                })
            })
            .collect()
    }
}

fn validated_type(key: &str, name: &str) -> Result<ServerType, ConfigError> {
    ServerType::new(name).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        value: name.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.address, "127.0.0.1:2181");
        assert_eq!(config.session_timeout(), Duration::from_secs(5));
        assert_eq!(config.node.mode, NodeMode::MasterSlave);
        assert!(config.node.server_type.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
address = "10.0.0.1:2181"

[node]
server_type = "echo-server"
zone = 3
mode = "MASTER_MASTER"

[[watch]]
server_type = "cache-server"
zone = 1

[[watch]]
server_type = "db-server"
"#
        )
        .unwrap();

        let config = RegistryConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.address, "10.0.0.1:2181");
        assert_eq!(config.session_timeout_ms, 5_000);
        assert_eq!(config.node.zone, 3);
        assert_eq!(config.node.mode, NodeMode::MasterMaster);
        assert_eq!(config.server_type().unwrap().unwrap().as_str(), "echo-server");
        assert_eq!(config.selectors().unwrap(), vec![
            WatchSelector::Zone {
                server_type: ServerType::new("cache-server").unwrap(),
                zone: 1,
            },
            WatchSelector::Type {
                server_type: ServerType::new("db-server").unwrap(),
            },
        ]);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = RegistryConfig::from_toml_file(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[node]\nmode = \"LEADERLESS\"\n").unwrap();
        let err = RegistryConfig::from_toml_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseToml { .. }));
    }

    #[test]
    fn test_overrides_win() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ROLLCALL_ADDRESS", "zk1:2181,zk2:2181"),
            ("ROLLCALL_SESSION_TIMEOUT_MS", "8000"),
            ("ROLLCALL_SERVER_TYPE", "edge"),
            ("ROLLCALL_ZONE", "-1"),
            ("ROLLCALL_NODE_MODE", "master-master"),
        ]);
        let mut config = RegistryConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(config.address, "zk1:2181,zk2:2181");
        assert_eq!(config.session_timeout_ms, 8_000);
        assert_eq!(config.node.server_type.as_deref(), Some("edge"));
        assert_eq!(config.node.zone, -1);
        assert_eq!(config.node.mode, NodeMode::MasterMaster);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_override_rejected() {
        let mut config = RegistryConfig::default();
        let err = config
            .apply_overrides(|key| (key == "ROLLCALL_ZONE").then(|| "east".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "ROLLCALL_ZONE"));
    }

    #[test]
    fn test_validation() {
        let mut config = RegistryConfig {
            session_timeout_ms: 0,
            ..RegistryConfig::default()
        };
        assert!(config.validate().is_err());

        config.session_timeout_ms = 5_000;
        config.node.server_type = Some("bad/type".to_string());
        assert!(config.validate().is_err());

        config.node.server_type = Some("echo-server".to_string());
        config.watch.push(WatchConfig {
            server_type: String::new(),
            zone: None,
        });
        assert!(config.validate().is_err());
    }
}
