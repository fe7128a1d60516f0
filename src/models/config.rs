use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::detection::arima::{ArimaParams, SarimaParams};
use crate::detection::isolation_forest::ForestParams;
use crate::detection::prophet::ProphetParams;
use crate::models::request::DetectionOptions;
use crate::utils::error::{AppError, AppResult};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub capture: CaptureConfig,
    pub detection: DetectionConfig,
    pub models: ModelsConfig,
    pub queue: QueueConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from a TOML file
    pub fn load(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::configuration(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        let config: AppConfig = toml::from_str(&content).map_err(|e| {
            AppError::configuration(format!("failed to parse config file {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from file if given, otherwise returns defaults
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path {
            Some(p) => Self::load(p).unwrap_or_else(|e| {
                warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }),
            None => Self::default(),
        }
    }

    /// Default configuration as TOML
    pub fn generate_default() -> String {
        toml::to_string_pretty(&AppConfig::default())
            .unwrap_or_else(|_| "# Failed to generate config".to_string())
    }

    pub fn validate(&self) -> AppResult<()> {
        if !(self.capture.window_size > 0.0 && self.capture.window_size.is_finite()) {
            return Err(AppError::configuration("capture.window_size must be positive"));
        }
        self.detection.defaults.validate()?;
        if self.detection.fetch_timeout_secs == 0 {
            return Err(AppError::configuration(
                "detection.fetch_timeout_secs must be greater than 0",
            ));
        }

        let prophet = &self.models.prophet;
        if !(prophet.interval_width > 0.0 && prophet.interval_width < 1.0) {
            return Err(AppError::configuration(
                "models.prophet.interval_width must be between 0.0 and 1.0",
            ));
        }
        if !(prophet.changepoint_range > 0.0 && prophet.changepoint_range <= 1.0) {
            return Err(AppError::configuration(
                "models.prophet.changepoint_range must be in (0.0, 1.0]",
            ));
        }

        let forest = &self.models.isolation_forest;
        if forest.n_estimators == 0 || forest.max_samples == 0 || forest.rolling_window == 0 {
            return Err(AppError::configuration(
                "models.isolation_forest sizes must be greater than 0",
            ));
        }
        if !(forest.contamination > 0.0 && forest.contamination <= 0.5) {
            return Err(AppError::configuration(
                "models.isolation_forest.contamination must be in (0.0, 0.5]",
            ));
        }

        if self.models.arima.sigma_multiplier <= 0.0 || self.models.sarima.sigma_multiplier <= 0.0 {
            return Err(AppError::configuration("sigma_multiplier must be positive"));
        }
        if self.queue.job_timeout_secs == 0 {
            return Err(AppError::configuration("queue.job_timeout_secs must be greater than 0"));
        }
        Ok(())
    }
}

/// Windowing of capture files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Window width in seconds
    pub window_size: f64,
    /// Label attached to every window
    pub label: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            window_size: 1.0,
            label: "unknown".to_string(),
        }
    }
}

/// Detection call defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Timeout for fetching a capture by URL
    pub fetch_timeout_secs: u64,
    /// Options used when a request does not specify its own
    pub defaults: DetectionOptions,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 10,
            defaults: DetectionOptions::default(),
        }
    }
}

/// Parameters of every model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub arima: ArimaParams,
    pub sarima: SarimaParams,
    pub prophet: ProphetParams,
    pub isolation_forest: ForestParams,
}

/// Order in which interrupted jobs are re-enqueued at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Job queue behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub recovery_order: RecoveryOrder,
    /// Upper bound for one detection run
    pub job_timeout_secs: u64,
    /// How long `stop()` waits for the in-flight job
    pub stop_grace_secs: u64,
    /// JSON file backing the job history
    pub store_path: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            recovery_order: RecoveryOrder::NewestFirst,
            job_timeout_secs: 600,
            stop_grace_secs: 30,
            store_path: PathBuf::from("sharkwatch-history.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error, off
    pub level: String,
    /// Extra `RUST_LOG`-style module filters
    pub filters: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            filters: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::model::ModelKind;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_generate_default_round_trips() {
        let toml = AppConfig::generate_default();
        let parsed: AppConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.models.arima.order, [2, 1, 2]);
        assert_eq!(parsed.queue.recovery_order, RecoveryOrder::NewestFirst);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[capture]\nwindow_size = 0.5\n\n[detection.defaults]\nmodels = [\"arima\", \"sarima\"]\n\n[queue]\nrecovery_order = \"oldest_first\""
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.capture.window_size, 0.5);
        assert_eq!(config.capture.label, "unknown");
        assert_eq!(
            config.detection.defaults.models,
            vec![ModelKind::Arima, ModelKind::Sarima]
        );
        assert_eq!(config.queue.recovery_order, RecoveryOrder::OldestFirst);
        assert_eq!(config.models.isolation_forest.n_estimators, 100);
    }

    #[test]
    fn test_unknown_model_is_rejected() {
        let result: Result<AppConfig, _> =
            toml::from_str("[detection.defaults]\nmodels = [\"lstm\"]");
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_values() {
        let mut config = AppConfig::default();
        config.detection.defaults.train_ratio = 1.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.prophet.interval_width = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.capture.window_size = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = AppConfig::load_or_default(Some(Path::new("/nonexistent/sharkwatch.toml")));
        assert_eq!(config.capture.window_size, 1.0);
    }
}
