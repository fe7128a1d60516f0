use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::detection::Detector;
use crate::models::history::{AnalysisJob, History, HistoryPatch, HistoryStatus};
use crate::models::request::{CaptureSource, DetectionOptions};
use crate::queue::store::HistoryStore;
use crate::utils::error::{AppError, AppResult};

/// Work performed by the queue worker for one job
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: AnalysisJob) -> AppResult<()>;
}

/// Runs detection for history records and records the outcome
pub struct HistoryService {
    store: Arc<dyn HistoryStore>,
    detector: Detector,
    job_timeout: Duration,
}

impl HistoryService {
    pub fn new(store: Arc<dyn HistoryStore>, detector: Detector, job_timeout: Duration) -> Self {
        Self {
            store,
            detector,
            job_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.store
    }

    /// Creates a CREATED record for `capture`
    pub async fn create(
        &self,
        capture: CaptureSource,
        options: Option<DetectionOptions>,
    ) -> AppResult<History> {
        let options = options.unwrap_or_else(|| self.detector.default_options().clone());
        options.validate()?;
        let history = self.store.create(History::new(capture, options)).await?;
        info!("Created analysis job {} for {}", history.id, history.capture);
        Ok(history)
    }

    /// PROCESSING, detection, then DONE with the result or ERROR with the message.
    ///
    /// Detection failures end in ERROR and return `Ok`. Only a failed status
    /// write is returned as an error.
    pub async fn process_job(&self, job: AnalysisJob) -> AppResult<History> {
        let id = job.id();
        self.transition(id, HistoryPatch {
            status: Some(HistoryStatus::Processing),
            ..Default::default()
        })
        .await?;
        info!("Processing analysis job {}", id);

        // A timeout stops waiting but cannot cancel a fit already on the blocking
        // pool. The detector keeps that fit's slot until it returns, so the next job
        // waits for it instead of overlapping.
        let detection = tokio::time::timeout(
            self.job_timeout,
            self.detector.detect(&job.history.capture, &job.history.options),
        )
        .await;

        let patch = match detection {
            Ok(Ok(outcome)) => match outcome.to_json() {
                Ok(result) => HistoryPatch::done(result),
                Err(e) => HistoryPatch::failed(e.to_string()),
            },
            Ok(Err(e)) => {
                warn!("Analysis job {} failed: {}", id, e);
                HistoryPatch::failed(e.to_string())
            }
            Err(_) => {
                warn!(
                    "Analysis job {} exceeded {}s",
                    id,
                    self.job_timeout.as_secs()
                );
                HistoryPatch::failed("detection timed out")
            }
        };

        let history = self.transition(id, patch).await?;
        info!("Analysis job {} finished as {}", id, history.status);
        Ok(history)
    }

    async fn transition(&self, id: Uuid, patch: HistoryPatch) -> AppResult<History> {
        let target = patch.status;
        self.store.update(id, patch).await.map_err(|e| {
            error!("Failed to update status of job {}: {}", id, e);
            let target = target.map(|s| s.to_string()).unwrap_or_default();
            AppError::StatusTransition(format!("{} -> {}: {}", id, target, e))
        })
    }
}

#[async_trait]
impl JobHandler for HistoryService {
    async fn handle(&self, job: AnalysisJob) -> AppResult<()> {
        self.process_job(job).await.map(|_| ())
    }
}
