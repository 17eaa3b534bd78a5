//! Configuration for the screening engine.

use crate::core::{FaceConfig, ReadingConfig, RiskConfig, SpiralConfig, StabilityConfig, VowelConfig};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the engine and CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path for stored records, baseline and transparency stats
    pub data_path: PathBuf,

    /// Path for exported backups
    pub export_path: PathBuf,

    /// IANA timezone used to decide what "today" means for history
    pub timezone: String,

    pub face: FaceConfig,
    pub vowel: VowelConfig,
    pub reading: ReadingConfig,
    pub spiral: SpiralConfig,
    pub stability: StabilityConfig,
    pub risk: RiskConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("neuro-screen");

        Self {
            export_path: data_dir.join("exports"),
            data_path: data_dir,
            timezone: "UTC".to_string(),
            face: FaceConfig::default(),
            vowel: VowelConfig::default(),
            reading: ReadingConfig::default(),
            spiral: SpiralConfig::default(),
            stability: StabilityConfig::default(),
            risk: RiskConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.tz()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `config_path`.
    pub fn save_to(&self, config_path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("neuro-screen")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Parsed timezone.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| ConfigError::ParseError(format!("timezone {}: {e}", self.timezone)))
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for `chrono::Duration` as integer milliseconds.
pub mod duration_ms {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.num_milliseconds().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = i64::deserialize(deserializer)?;
        Ok(Duration::milliseconds(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.timezone, "UTC");
        assert_eq!(config.vowel.recording_window, Duration::milliseconds(3_000));
        assert_eq!(config.stability.measure, Duration::seconds(10));
        assert_eq!(config.risk.danger_below, 60);
        assert!(config.tz().is_ok());
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["vowel"]["recording_window"], 3000);
        assert_eq!(json["reading"]["settle_after"], 2500);
        assert_eq!(json["stability"]["preparation"], 5000);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"timezone": "Europe/Berlin", "stability": {"penalty_cap": 40}}"#)
                .unwrap();
        assert_eq!(config.stability.penalty_cap, 40.0);
        assert_eq!(config.stability.penalty_factor, 80.0);
        assert_eq!(config.face.max_rate_hz, 15.0);
        assert!(config.tz().is_ok());
    }

    #[test]
    fn test_bad_timezone_rejected() {
        let dir = std::env::temp_dir().join(format!("neuro-screen-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{"timezone": "Mars/Olympus"}"#).unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::ParseError(_))
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_saved_config_reloads() {
        let dir = std::env::temp_dir().join(format!("neuro-screen-cfg-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");
        let config = Config {
            timezone: "Asia/Tokyo".to_string(),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.timezone, "Asia/Tokyo");
        assert_eq!(loaded.stability.measure, Duration::seconds(10));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("neuro-screen-does-not-exist.json");
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.timezone, "UTC");
    }
}
