//! Configuration resolution for the RigFleet hub.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Config file (`--config`, `RIGFLEET_CONFIG`, or the global settings file)
//! 3. Environment variables (`RIGFLEET_*`)
//! 4. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Secret used when none is configured. Only fit for local development.
pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Complete hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HubConfig {
    pub server: ServerConfig,
    pub liveness: LivenessConfig,
    pub commands: CommandConfig,
    pub alerts: AlertConfig,
}

/// Listener, storage and auth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub database_path: Option<PathBuf>,
    pub jwt_secret: String,
    /// Lifetime of dashboard access tokens minted by `issue-token`.
    pub token_ttl_secs: i64,
    /// Seconds an agent or dashboard may stay connected without authenticating.
    pub auth_timeout_secs: u64,
    /// Capacity of each agent connection's outbound frame queue.
    pub outbound_queue: usize,
    /// Capacity of each dashboard subscriber's push queue.
    pub subscriber_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_path: None,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            token_ttl_secs: 86_400,
            auth_timeout_secs: 10,
            outbound_queue: 128,
            subscriber_queue: 256,
        }
    }
}

/// Liveness monitor thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub check_interval_secs: u64,
    /// Silence after which a rig is shown as `WARNING`.
    pub soft_threshold_secs: u64,
    /// Silence after which the connection is closed and the rig is `OFFLINE`.
    pub hard_threshold_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 5,
            soft_threshold_secs: 30,
            hard_threshold_secs: 90,
        }
    }
}

impl LivenessConfig {
    pub const fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub const fn soft_threshold(&self) -> Duration {
        Duration::from_secs(self.soft_threshold_secs)
    }

    pub const fn hard_threshold(&self) -> Duration {
        Duration::from_secs(self.hard_threshold_secs)
    }
}

/// Command dispatch deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            max_timeout_secs: 300,
        }
    }
}

impl CommandConfig {
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub const fn max_timeout(&self) -> Duration {
        Duration::from_secs(self.max_timeout_secs)
    }
}

/// Telemetry alert thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub gpu_temp_celsius: f32,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            gpu_temp_celsius: 85.0,
        }
    }
}

impl HubConfig {
    /// Reject combinations the hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        let l = &self.liveness;
        if l.check_interval_secs == 0 {
            return Err(Error::Config(
                "liveness.check_interval_secs must be greater than zero".into(),
            ));
        }
        if l.soft_threshold_secs >= l.hard_threshold_secs {
            return Err(Error::Config(format!(
                "liveness.soft_threshold_secs ({}) must be below hard_threshold_secs ({})",
                l.soft_threshold_secs, l.hard_threshold_secs
            )));
        }
        let c = &self.commands;
        if c.default_timeout_secs == 0 || c.default_timeout_secs > c.max_timeout_secs {
            return Err(Error::Config(format!(
                "commands.default_timeout_secs ({}) must be within 1..={}",
                c.default_timeout_secs, c.max_timeout_secs
            )));
        }
        if self.server.outbound_queue == 0 || self.server.subscriber_queue == 0 {
            return Err(Error::Config("queue capacities must be non-zero".into()));
        }
        Ok(())
    }

    /// Database path, falling back to the per-user default.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.server.database_path.clone().or_else(default_database_path)
    }
}

/// Load configuration with hierarchical resolution.
///
/// `explicit` is a file named on the command line; when it is `None` the
/// `RIGFLEET_CONFIG` variable and then the global settings file are tried.
pub fn load_config(explicit: Option<&Path>) -> Result<HubConfig> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var("RIGFLEET_CONFIG").ok().map(PathBuf::from))
        .or_else(|| global_config_path().filter(|p| p.exists()));

    let mut config = match path {
        Some(path) => load_config_file(&path)?,
        None => HubConfig::default(),
    };

    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("rigfleet").join("hub.json"))
}

/// Default hub database location (`~/.rigfleet/hub.db`).
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".rigfleet").join("hub.db"))
}

fn load_config_file(path: &Path) -> Result<HubConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn apply_env_overrides(config: &mut HubConfig) {
    if let Some(addr) = env_parse("RIGFLEET_ADDR") {
        config.server.addr = addr;
    }
    if let Ok(val) = std::env::var("RIGFLEET_DB_PATH") {
        config.server.database_path = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("RIGFLEET_JWT_SECRET") {
        config.server.jwt_secret = val;
    }
    if let Some(n) = env_parse("RIGFLEET_SOFT_THRESHOLD_SECS") {
        config.liveness.soft_threshold_secs = n;
    }
    if let Some(n) = env_parse("RIGFLEET_HARD_THRESHOLD_SECS") {
        config.liveness.hard_threshold_secs = n;
    }
    if let Some(n) = env_parse("RIGFLEET_COMMAND_TIMEOUT_SECS") {
        config.commands.default_timeout_secs = n;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = HubConfig::default();
        config.validate().unwrap();
        assert_eq!(config.liveness.soft_threshold(), Duration::from_secs(30));
        assert_eq!(config.liveness.hard_threshold(), Duration::from_secs(90));
        assert_eq!(config.commands.default_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn soft_threshold_must_be_below_hard() {
        let mut config = HubConfig::default();
        config.liveness.soft_threshold_secs = 90;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("soft_threshold_secs"));
    }

    #[test]
    fn zero_check_interval_rejected() {
        let mut config = HubConfig::default();
        config.liveness.check_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.json");
        std::fs::write(
            &path,
            r#"{ "liveness": { "soft_threshold_secs": 10, "hard_threshold_secs": 20 } }"#,
        )
        .unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.liveness.soft_threshold_secs, 10);
        assert_eq!(config.liveness.hard_threshold_secs, 20);
        assert_eq!(config.liveness.check_interval_secs, 5);
        assert_eq!(config.server.auth_timeout_secs, 10);
    }

    #[test]
    fn unreadable_file_is_config_error() {
        let err = load_config_file(Path::new("/nonexistent/rigfleet/hub.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
