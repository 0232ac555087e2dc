//! meshpeer configuration system.
//!
//! Loads configuration from YAML files with a cascading priority system:
//! 1. `./meshpeer.yaml` (current directory - highest priority)
//! 2. `~/.config/meshpeer/meshpeer.yaml` (user config directory)
//! 3. `/etc/meshpeer/meshpeer.yaml` (system - lowest priority)
//!
//! Values from higher priority files override those from lower priority files.
//! `Config::validate` is fatal at startup: a rejected option can never be
//! observed at runtime by the peering or metric code.

use crate::addr::MacAddr;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config filename.
const CONFIG_FILENAME: &str = "meshpeer.yaml";

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("beacon window must be in 1..=30, got {0}")]
    BeaconWindowOutOfRange(u16),

    #[error("test frame length must be at least 1 byte")]
    TestFrameLengthZero,

    #[error("{timer} timeout must be non-zero")]
    ZeroTimeout { timer: &'static str },

    #[error("{field} must be at least 1")]
    ZeroLimit { field: &'static str },
}

/// Peering state machine parameters (`peering.*`).
///
/// Timeouts are in microseconds; the defaults are the protocol's nominal
/// 40 x 1024 us for retry, confirm and holding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeeringConfig {
    /// Retry timer duration in microseconds (`peering.retry_timeout_us`).
    pub retry_timeout_us: u64,

    /// Confirm timer duration in microseconds (`peering.confirm_timeout_us`).
    pub confirm_timeout_us: u64,

    /// Holding (graceful teardown) timer duration in microseconds
    /// (`peering.holding_timeout_us`).
    pub holding_timeout_us: u64,

    /// Maximum number of Open retransmissions before giving up
    /// (`peering.max_retries`).
    pub max_retries: u16,

    /// Consecutive beacon intervals without a beacon before the link is
    /// cancelled (`peering.max_beacon_loss`).
    pub max_beacon_loss: u16,

    /// Consecutive transmission failures before the link is cancelled
    /// (`peering.max_packet_failure`).
    pub max_packet_failure: u16,

    /// Number of beacons considered for the failure average
    /// (`peering.beacon_window`, valid range 1..=30).
    pub beacon_window: u16,

    /// Tolerance for beacon arrival, in milliseconds
    /// (`peering.beacon_interval_tolerance_ms`).
    pub beacon_interval_tolerance_ms: u16,
}

impl Default for PeeringConfig {
    fn default() -> Self {
        Self {
            retry_timeout_us: 40 * 1024,
            confirm_timeout_us: 40 * 1024,
            holding_timeout_us: 40 * 1024,
            max_retries: 4,
            max_beacon_loss: 2,
            max_packet_failure: 2,
            beacon_window: 20,
            beacon_interval_tolerance_ms: 35,
        }
    }
}

/// Which estimator supplies the frame failure rate for the airtime metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSource {
    /// Frame-error statistics from the rate-control layer.
    RateControl,
    /// Bidirectional beacon reception history kept by the peer link.
    Beacons,
}

/// Link metric parameters (`metric.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    /// Test frame payload length in bytes (`metric.test_frame_len`).
    /// The standard's constant is 1024.
    pub test_frame_len: u16,

    /// Traffic-class tag used for rate lookups (`metric.tid`).
    pub tid: u8,

    /// Source of the failure rate estimate (`metric.failure_source`).
    pub failure_source: FailureSource,

    /// Use the square-root-time airtime variant (`metric.sqrt_time`).
    pub sqrt_time: bool,

    /// Receive-power compensation coefficient (`metric.rx_power_coef`).
    /// Zero disables compensation.
    pub rx_power_coef: u16,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            test_frame_len: 1024,
            tid: 0,
            failure_source: FailureSource::RateControl,
            sqrt_time: false,
            rx_power_coef: 0,
        }
    }
}

/// Local interface identity (`interface.*`).
///
/// Identity is passed explicitly through configuration; the subsystem keeps
/// no process-wide addresses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Link-layer address of the local interface (`interface.local_addr`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_addr: Option<MacAddr>,

    /// Mesh-point address, when distinct from the interface address
    /// (`interface.mesh_addr`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_addr: Option<MacAddr>,
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Local interface identity (`interface.*`).
    #[serde(default)]
    pub interface: InterfaceConfig,

    /// Peering state machine parameters (`peering.*`).
    #[serde(default)]
    pub peering: PeeringConfig,

    /// Link metric parameters (`metric.*`).
    #[serde(default)]
    pub metric: MetricConfig,
}

impl Config {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the standard search paths.
    ///
    /// Returns a tuple of (config, paths_loaded) where paths_loaded contains
    /// the paths that were successfully loaded.
    pub fn load() -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let search_paths = Self::search_paths();
        Self::load_from_paths(&search_paths)
    }

    /// Load configuration from specific paths.
    ///
    /// Paths are processed in order, with later paths overriding earlier ones.
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let mut config = Config::default();
        let mut loaded_paths = Vec::new();

        for path in paths {
            if path.exists() {
                let file_config = Self::load_file(path)?;
                config.merge(file_config);
                loaded_paths.push(path.clone());
            }
        }

        config.validate()?;
        Ok((config, loaded_paths))
    }

    /// Load configuration from a single file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the standard search paths in priority order (lowest to highest).
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // System config (lowest priority)
        paths.push(PathBuf::from("/etc/meshpeer").join(CONFIG_FILENAME));

        // User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("meshpeer").join(CONFIG_FILENAME));
        }

        // Current directory (highest priority)
        paths.push(PathBuf::from(".").join(CONFIG_FILENAME));

        paths
    }

    /// Merge another configuration into this one.
    ///
    /// Later files replace whole sections when present; per-field merging is
    /// only done for the optional identity fields.
    pub fn merge(&mut self, other: Config) {
        if other.interface.local_addr.is_some() {
            self.interface.local_addr = other.interface.local_addr;
        }
        if other.interface.mesh_addr.is_some() {
            self.interface.mesh_addr = other.interface.mesh_addr;
        }
        self.peering = other.peering;
        self.metric = other.metric;
    }

    /// Reject configurations the runtime cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.peering;
        if p.beacon_window == 0 || p.beacon_window > 30 {
            return Err(ConfigError::BeaconWindowOutOfRange(p.beacon_window));
        }
        if p.retry_timeout_us == 0 {
            return Err(ConfigError::ZeroTimeout { timer: "retry" });
        }
        if p.confirm_timeout_us == 0 {
            return Err(ConfigError::ZeroTimeout { timer: "confirm" });
        }
        if p.holding_timeout_us == 0 {
            return Err(ConfigError::ZeroTimeout { timer: "holding" });
        }
        if p.max_beacon_loss == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "max_beacon_loss",
            });
        }
        if p.max_packet_failure == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "max_packet_failure",
            });
        }
        if self.metric.test_frame_len == 0 {
            return Err(ConfigError::TestFrameLengthZero);
        }
        Ok(())
    }

    /// Serialize this configuration to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.peering.max_retries, 4);
        assert_eq!(config.peering.beacon_window, 20);
        assert_eq!(config.peering.retry_timeout_us, 40 * 1024);
        assert_eq!(config.metric.test_frame_len, 1024);
        assert_eq!(config.metric.failure_source, FailureSource::RateControl);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml_sections() {
        let yaml = r#"
interface:
  local_addr: "00:00:00:00:00:01"
peering:
  max_retries: 6
  max_beacon_loss: 10
metric:
  failure_source: beacons
  sqrt_time: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.interface.local_addr.unwrap().to_string(),
            "00:00:00:00:00:01"
        );
        assert_eq!(config.peering.max_retries, 6);
        assert_eq!(config.peering.max_beacon_loss, 10);
        // Unspecified fields fall back to defaults
        assert_eq!(config.peering.beacon_window, 20);
        assert_eq!(config.metric.failure_source, FailureSource::Beacons);
        assert!(config.metric.sqrt_time);
    }

    #[test]
    fn test_parse_yaml_empty() {
        let config: Config = serde_yaml::from_str("").unwrap();
        assert!(config.interface.local_addr.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_beacon_window_range() {
        let mut config = Config::new();
        config.peering.beacon_window = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BeaconWindowOutOfRange(0))
        ));
        config.peering.beacon_window = 31;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BeaconWindowOutOfRange(31))
        ));
        config.peering.beacon_window = 30;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::new();
        config.peering.holding_timeout_us = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroTimeout { timer: "holding" })
        ));
    }

    #[test]
    fn test_validate_test_frame_len() {
        let mut config = Config::new();
        config.metric.test_frame_len = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TestFrameLengthZero)
        ));
    }

    #[test]
    fn test_merge_overrides() {
        let mut base = Config::new();
        base.interface.local_addr = Some("00:00:00:00:00:01".parse().unwrap());

        let mut overlay = Config::new();
        overlay.peering.max_retries = 7;

        base.merge(overlay);
        assert_eq!(base.peering.max_retries, 7);
        // Identity survives an overlay that does not set it
        assert!(base.interface.local_addr.is_some());
    }

    #[test]
    fn test_load_from_paths_merges() {
        let temp_dir = TempDir::new().unwrap();
        let low = temp_dir.path().join("low.yaml");
        let high = temp_dir.path().join("high.yaml");

        fs::write(&low, "peering:\n  max_retries: 3\n").unwrap();
        fs::write(&high, "peering:\n  max_retries: 9\n").unwrap();

        let paths = vec![low, high];
        let (config, loaded) = Config::load_from_paths(&paths).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(config.peering.max_retries, 9);
    }

    #[test]
    fn test_load_skips_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        let existing = temp_dir.path().join("exists.yaml");
        let missing = temp_dir.path().join("missing.yaml");

        fs::write(&existing, "peering:\n  beacon_window: 25\n").unwrap();

        let paths = vec![missing, existing.clone()];
        let (config, loaded) = Config::load_from_paths(&paths).unwrap();
        assert_eq!(loaded, vec![existing]);
        assert_eq!(config.peering.beacon_window, 25);
    }

    #[test]
    fn test_load_rejects_invalid() {
        let temp_dir = TempDir::new().unwrap();
        let bad = temp_dir.path().join("bad.yaml");
        fs::write(&bad, "peering:\n  beacon_window: 99\n").unwrap();

        let result = Config::load_from_paths(&[bad]);
        assert!(matches!(
            result,
            Err(ConfigError::BeaconWindowOutOfRange(99))
        ));
    }

    #[test]
    fn test_to_yaml() {
        let mut config = Config::new();
        config.interface.local_addr = Some("00:1b:2c:3d:4e:5f".parse().unwrap());
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("peering:"));
        assert!(yaml.contains("metric:"));
        assert!(yaml.contains("00:1b:2c:3d:4e:5f"));
    }
}
