use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::detection::arima::FittedArima;
use crate::detection::isolation_forest::IsolationForest;
use crate::detection::prophet::FittedProphet;
use crate::features::table::TimeSeries;
use crate::utils::error::{AppError, AppResult};

/// Anomaly models the detector can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    IsolationForest,
    Arima,
    Sarima,
    Prophet,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::IsolationForest,
        ModelKind::Arima,
        ModelKind::Sarima,
        ModelKind::Prophet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IsolationForest => "isolation_forest",
            Self::Arima => "arima",
            Self::Sarima => "sarima",
            Self::Prophet => "prophet",
        }
    }

    /// Parses a comma separated list such as `"arima,prophet"`
    pub fn parse_list(list: &str) -> AppResult<Vec<ModelKind>> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                AppError::configuration(format!(
                    "unknown model '{}', expected one of: isolation_forest, arima, sarima, prophet",
                    s
                ))
            })
    }
}

/// In-memory fitted state; never serialized
#[derive(Debug, Clone)]
pub enum FittedModel {
    Arima(Box<FittedArima>),
    Prophet(Box<FittedProphet>),
    IsolationForest(Box<IsolationForest>),
}

/// Result of one model over the test segment
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predictions: Option<TimeSeries>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub residuals: Option<Vec<f64>>,

    pub anomalies: Vec<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,

    pub anomaly_scores: Vec<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<TimeSeries>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<TimeSeries>,

    #[serde(skip)]
    pub model: Option<FittedModel>,
}

impl ModelOutcome {
    pub fn anomaly_count(&self) -> usize {
        self.anomalies.iter().filter(|a| **a).count()
    }
}

/// Output of one detection call
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum DetectionOutcome {
    /// Too little data to run any model: the feature records and a null result
    NoResult {
        data: Vec<Map<String, Value>>,
        result: Option<Value>,
    },
    Models(BTreeMap<ModelKind, ModelOutcome>),
}

impl DetectionOutcome {
    pub fn no_result(data: Vec<Map<String, Value>>) -> Self {
        Self::NoResult { data, result: None }
    }

    pub fn is_no_result(&self) -> bool {
        matches!(self, Self::NoResult { .. })
    }

    pub fn get(&self, kind: ModelKind) -> Option<&ModelOutcome> {
        match self {
            Self::Models(results) => results.get(&kind),
            Self::NoResult { .. } => None,
        }
    }

    pub fn to_json(&self) -> AppResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// A forecasting model scored on held-out values
pub trait SeriesModel {
    fn kind(&self) -> ModelKind;

    fn detect(&self, train: &TimeSeries, test: &TimeSeries) -> AppResult<ModelOutcome>;
}

/// Chronological split point: `floor(len · ratio)` clamped to `[1, len − 1]`
pub fn split_index(len: usize, train_ratio: f64) -> usize {
    if len < 2 {
        return len;
    }
    ((len as f64 * train_ratio).floor() as usize).clamp(1, len - 1)
}

/// k-sigma residual rule shared by the ARIMA family
pub fn residual_outcome(
    forecast: Vec<f64>,
    test: &TimeSeries,
    sigma: f64,
    sigma_multiplier: f64,
) -> ModelOutcome {
    let threshold = (sigma * sigma_multiplier).max(f64::EPSILON);
    let residuals: Vec<f64> = test
        .values
        .iter()
        .zip(&forecast)
        .map(|(actual, predicted)| actual - predicted)
        .collect();

    let bound = |offset: f64| {
        TimeSeries::new(
            test.timestamps.clone(),
            forecast.iter().map(|f| f + offset).collect(),
        )
    };

    ModelOutcome {
        anomalies: residuals.iter().map(|r| r.abs() > threshold).collect(),
        anomaly_scores: residuals.iter().map(|r| r.abs() / threshold).collect(),
        lower_bound: Some(bound(-threshold)),
        upper_bound: Some(bound(threshold)),
        predictions: Some(TimeSeries::new(test.timestamps.clone(), forecast)),
        residuals: Some(residuals),
        threshold: Some(threshold),
        model: None,
    }
}
