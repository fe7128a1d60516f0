use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::capture::windowizer::{Conversion, Windowizer};
use crate::detection::model::{split_index, DetectionOutcome, ModelKind, ModelOutcome, SeriesModel};
use crate::features::table::FeatureTable;
use crate::models::config::{AppConfig, ModelsConfig};
use crate::models::request::{CaptureSource, DetectionOptions};
use crate::utils::error::{AppError, AppResult};

/// Runs capture → windows → features → models.
///
/// Cheap to clone; the CPU-bound part of every call runs on the blocking pool.
#[derive(Clone)]
pub struct Detector {
    client: reqwest::Client,
    inner: Arc<DetectorInner>,
}

struct DetectorInner {
    windowizer: Windowizer,
    models: ModelsConfig,
    defaults: DetectionOptions,

    /// One model run at a time, including runs whose caller gave up
    fits: Arc<Semaphore>,
}

impl Detector {
    pub fn new(
        windowizer: Windowizer,
        models: ModelsConfig,
        defaults: DetectionOptions,
        fetch_timeout: Duration,
    ) -> AppResult<Self> {
        let client = reqwest::Client::builder().timeout(fetch_timeout).build()?;
        Ok(Self {
            client,
            inner: Arc::new(DetectorInner {
                windowizer,
                models,
                defaults,
                fits: Arc::new(Semaphore::new(1)),
            }),
        })
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        Self::new(
            Windowizer::new(config.capture.window_size, config.capture.label.clone())?,
            config.models.clone(),
            config.detection.defaults.clone(),
            Duration::from_secs(config.detection.fetch_timeout_secs),
        )
    }

    /// Options applied when a caller passes none
    pub fn default_options(&self) -> &DetectionOptions {
        &self.inner.defaults
    }

    /// Full detection on one capture
    pub async fn detect(
        &self,
        capture: &CaptureSource,
        options: &DetectionOptions,
    ) -> AppResult<DetectionOutcome> {
        options.validate()?;
        let conversion = self.convert(capture).await?;

        // The permit travels with the blocking task, so a run abandoned by a timed-out
        // caller still holds it until the fit returns.
        let permit = Arc::clone(&self.inner.fits)
            .acquire_owned()
            .await
            .map_err(|e| AppError::processing(format!("detection unavailable: {}", e)))?;
        let detector = self.clone();
        let options = options.clone();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            detector.detect_table(conversion.table, &options)
        })
        .await
        .map_err(|e| AppError::processing(format!("detection task failed: {}", e)))?
    }

    /// Takes the model-run slot as an in-progress fit would
    #[cfg(test)]
    pub(crate) async fn hold_fit_slot(&self) -> tokio::sync::OwnedSemaphorePermit {
        Arc::clone(&self.inner.fits)
            .acquire_owned()
            .await
            .expect("semaphore is never closed")
    }

    /// Windowed feature table of one capture
    pub async fn convert(&self, capture: &CaptureSource) -> AppResult<Conversion> {
        let loaded = match capture {
            CaptureSource::Bytes(bytes) => Loaded::Bytes(bytes.clone()),
            CaptureSource::Url(url) => Loaded::Bytes(self.fetch(url).await?),
            CaptureSource::Path(path) => Loaded::Path(path.clone()),
        };

        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || match loaded {
            Loaded::Bytes(bytes) => convert_bytes(&inner.windowizer, &bytes),
            Loaded::Path(path) => Ok(inner.windowizer.convert_file(&path)),
        })
        .await
        .map_err(|e| AppError::processing(format!("conversion task failed: {}", e)))?
    }

    async fn fetch(&self, url: &str) -> AppResult<Vec<u8>> {
        info!("Fetching capture from {}", url);
        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        debug!("Fetched {} bytes", bytes.len());
        Ok(bytes.to_vec())
    }

    /// Runs the requested models over a converted table (blocking)
    pub fn detect_table(
        &self,
        table: FeatureTable,
        options: &DetectionOptions,
    ) -> AppResult<DetectionOutcome> {
        options.validate()?;
        if table.len() < 2 {
            warn!("Only {} windows, skipping models", table.len());
            return Ok(DetectionOutcome::no_result(table.records()));
        }

        let split = split_index(table.len(), options.train_ratio);
        info!(
            "Detecting on {} windows (train {}, test {})",
            table.len(),
            split,
            table.len() - split
        );

        let models = &self.inner.models;
        let mut results: BTreeMap<ModelKind, ModelOutcome> = BTreeMap::new();
        for kind in &options.models {
            let outcome = match kind {
                ModelKind::IsolationForest => {
                    let train = table.slice(0..split);
                    let test = table.slice(split..table.len());
                    models.isolation_forest.detect(
                        &train,
                        &test,
                        options.feature_cols.as_deref(),
                    )?
                }
                ModelKind::Arima => run_series(&models.arima, &table, &options.target_col, split)?,
                ModelKind::Sarima => run_series(&models.sarima, &table, &options.target_col, split)?,
                ModelKind::Prophet => {
                    run_series(&models.prophet, &table, &options.target_col, split)?
                }
            };
            results.insert(*kind, outcome);
        }
        Ok(DetectionOutcome::Models(results))
    }
}

enum Loaded {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

fn run_series(
    model: &dyn SeriesModel,
    table: &FeatureTable,
    target_col: &str,
    split: usize,
) -> AppResult<ModelOutcome> {
    let series = table.series(target_col).ok_or_else(|| {
        AppError::configuration(format!("missing target column: {}", target_col))
    })?;
    let (train, test) = series.split_at(split);
    debug!("Running {} on column {}", model.kind(), target_col);
    model.detect(&train, &test)
}

/// Writes `bytes` to a scoped temporary `.pcap` file and converts it
pub fn convert_bytes(windowizer: &Windowizer, bytes: &[u8]) -> AppResult<Conversion> {
    let mut file = tempfile::Builder::new()
        .prefix("sharkwatch-")
        .suffix(".pcap")
        .tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(windowizer.convert_file(file.path()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::window::WindowFeatures;

    fn detector() -> Detector {
        Detector::new(
            Windowizer::default(),
            ModelsConfig::default(),
            DetectionOptions::default(),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    fn table(n: usize) -> FeatureTable {
        let windows: Vec<WindowFeatures> = (0..n)
            .map(|i| WindowFeatures {
                timestamp: 1_700_000_000.0 + i as f64,
                packet_count: 20 + (i as u64 * 7) % 5,
                byte_count: 1000 + (i as u64 * 13) % 50,
                label: "unknown".into(),
                ..Default::default()
            })
            .collect();
        FeatureTable::from_windows(&windows)
    }

    #[test]
    fn test_short_table_is_no_result() {
        let outcome = detector()
            .detect_table(table(1), &DetectionOptions::default())
            .unwrap();
        assert!(outcome.is_no_result());
        let json = outcome.to_json().unwrap();
        assert_eq!(json["data"].as_array().unwrap().len(), 1);
        assert!(json["result"].is_null());
    }

    #[test]
    fn test_missing_target_column() {
        let options = DetectionOptions {
            models: vec![ModelKind::Prophet],
            target_col: "nope".into(),
            ..Default::default()
        };
        let result = detector().detect_table(table(10), &options);
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[test]
    fn test_runs_each_requested_model() {
        let options = DetectionOptions {
            models: vec![ModelKind::IsolationForest, ModelKind::Prophet, ModelKind::Arima],
            ..Default::default()
        };
        let outcome = detector().detect_table(table(30), &options).unwrap();
        for kind in [ModelKind::IsolationForest, ModelKind::Prophet, ModelKind::Arima] {
            let result = outcome.get(kind).unwrap();
            assert_eq!(result.anomalies.len(), 9);
            assert_eq!(result.anomaly_scores.len(), 9);
        }

        let json = outcome.to_json().unwrap();
        let arima = &json["arima"];
        assert_eq!(arima["predictions"].as_array().unwrap().len(), 9);
        assert!(arima["predictions"][0]["timestamp"].is_string());
        assert!(arima.get("model").is_none());
        assert!(json["prophet"].get("threshold").is_none());
    }

    #[tokio::test]
    async fn test_empty_bytes_are_no_result() {
        let outcome = detector()
            .detect(&CaptureSource::Bytes(Vec::new()), &DetectionOptions::default())
            .await
            .unwrap();
        assert!(outcome.is_no_result());
    }

    #[tokio::test]
    async fn test_detection_waits_for_running_fit() {
        let detector = detector();
        let slot = detector.hold_fit_slot().await;

        let capture = CaptureSource::Bytes(Vec::new());
        let options = DetectionOptions::default();
        let waiting = tokio::time::timeout(
            Duration::from_millis(100),
            detector.detect(&capture, &options),
        )
        .await;
        assert!(waiting.is_err());

        drop(slot);
        let outcome = detector.detect(&capture, &options).await.unwrap();
        assert!(outcome.is_no_result());
    }

    #[tokio::test]
    async fn test_invalid_ratio_rejected_before_work() {
        let options = DetectionOptions {
            train_ratio: 1.5,
            ..Default::default()
        };
        let result = detector()
            .detect(&CaptureSource::Bytes(Vec::new()), &options)
            .await;
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }
}
