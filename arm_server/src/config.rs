//! Server configuration.
//!
//! Loaded from a TOML file; every section and field is optional and falls
//! back to the defaults below.
//!
//! ```toml
//! [link]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [storage]
//! trajectory_dir = "./data/trajectories"
//!
//! [auth]
//! salt = "change-me"
//! session_idle_minutes = 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use arm_gcode::LinkConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub trajectory_dir: PathBuf,
    pub users_db: PathBuf,
    pub audit_log: PathBuf,
    /// Command history entries kept in memory for reports.
    pub history_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            trajectory_dir: PathBuf::from("./data/trajectories"),
            users_db: PathBuf::from("./data/users.db"),
            audit_log: PathBuf::from("./data/audit.csv"),
            history_limit: crate::history::DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// Prepended to passwords before hashing.
    pub salt: String,
    /// Password given to the `admin` account when the user table is created.
    pub admin_password: String,
    /// Sessions idle for longer than this are closed.
    pub session_idle_minutes: u64,
}

impl AuthConfig {
    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_minutes * 60)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            salt: "arm-server".to_string(),
            admin_password: "admin".to_string(),
            session_idle_minutes: 30,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub link: LinkConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    /// Connection attempts made by `connect` when the client gives none.
    pub connect_retries: Option<u32>,
}

impl ServerConfig {
    pub const DEFAULT_RETRIES: u32 = 3;

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.link.validate().map_err(ConfigError::Invalid)?;
        if self.storage.trajectory_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("trajectory_dir cannot be empty".to_string()));
        }
        if self.auth.salt.is_empty() {
            return Err(ConfigError::Invalid("auth.salt cannot be empty".to_string()));
        }
        if self.auth.session_idle_minutes == 0 {
            return Err(ConfigError::Invalid("auth.session_idle_minutes must be at least 1".to_string()));
        }
        if self.storage.history_limit == 0 {
            return Err(ConfigError::Invalid("storage.history_limit must be at least 1".to_string()));
        }
        if self.connect_retries == Some(0) {
            return Err(ConfigError::Invalid("connect_retries must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn retries(&self) -> u32 {
        self.connect_retries.unwrap_or(Self::DEFAULT_RETRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.link.stabilization_ms, 3000);
        assert_eq!(config.retries(), 3);
        assert_eq!(config.auth.session_idle(), Duration::from_secs(1800));
        assert_eq!(config.storage.history_limit, 10_000);
    }

    #[test]
    fn test_partial_sections() {
        let config = ServerConfig::from_toml(
            r#"
            connect_retries = 5

            [link]
            port = "/dev/ttyACM0"
            baud_rate = 57600

            [storage]
            trajectory_dir = "/tmp/traj"
            "#,
        )
        .unwrap();
        assert_eq!(config.link.port, "/dev/ttyACM0");
        assert_eq!(config.link.baud_rate, 57600);
        assert_eq!(config.link.response_timeout_ms, 2000);
        assert_eq!(config.storage.trajectory_dir, PathBuf::from("/tmp/traj"));
        assert_eq!(config.storage.users_db, PathBuf::from("./data/users.db"));
        assert_eq!(config.retries(), 5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            ServerConfig::from_toml("[link]\nbaud_rate = 1234\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml("connect_retries = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml("[auth]\nsession_idle_minutes = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml("link = 3\n"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = ServerConfig::load(Path::new("/nonexistent/arm.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
