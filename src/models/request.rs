use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::detection::model::ModelKind;
use crate::utils::error::{AppError, AppResult};

/// Where the capture bytes come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    /// Raw capture file contents
    Bytes(Vec<u8>),
    /// Fetched over HTTP(S)
    Url(String),
    /// Local file, read in place
    Path(PathBuf),
}

impl CaptureSource {
    /// URL when `reference` looks like one, file path otherwise
    pub fn from_reference(reference: &str) -> Self {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            Self::Url(reference.to_string())
        } else {
            Self::Path(PathBuf::from(reference))
        }
    }
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Self::Url(url) => write!(f, "{}", url),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Per-call detection options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionOptions {
    pub models: Vec<ModelKind>,

    /// Column the forecasting models run on
    pub target_col: String,

    /// Share of windows used for fitting, strictly between 0 and 1
    pub train_ratio: f64,

    /// Isolation-forest input columns; every numeric column when unset
    pub feature_cols: Option<Vec<String>>,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            models: vec![ModelKind::IsolationForest],
            target_col: "packet_count".to_string(),
            train_ratio: 0.7,
            feature_cols: None,
        }
    }
}

impl DetectionOptions {
    pub fn validate(&self) -> AppResult<()> {
        if !(self.train_ratio > 0.0 && self.train_ratio < 1.0) {
            return Err(AppError::configuration(format!(
                "train_ratio must lie strictly between 0 and 1, got {}",
                self.train_ratio
            )));
        }
        if self.target_col.trim().is_empty() {
            return Err(AppError::configuration("target_col must not be empty"));
        }
        Ok(())
    }
}
