use log::info;
use std::sync::Arc;
use std::time::Duration;

use crate::detection::Detector;
use crate::models::config::AppConfig;
use crate::models::history::{AnalysisJob, History};
use crate::models::request::{CaptureSource, DetectionOptions};
use crate::queue::{AnalysisQueue, FileHistoryStore, HistoryService, HistoryStore};
use crate::utils::error::{AppError, AppResult};

/// Everything a running instance needs, wired once at startup
pub struct AppContext {
    pub config: AppConfig,
    pub store: Arc<dyn HistoryStore>,
    pub detector: Detector,
    pub service: Arc<HistoryService>,
    pub queue: AnalysisQueue,
}

impl AppContext {
    pub fn new(config: AppConfig, store: Arc<dyn HistoryStore>) -> AppResult<Self> {
        config.validate()?;
        let detector = Detector::from_config(&config)?;
        let service = Arc::new(HistoryService::new(
            Arc::clone(&store),
            detector.clone(),
            Duration::from_secs(config.queue.job_timeout_secs),
        ));
        let queue = AnalysisQueue::new(Arc::clone(&store), config.queue.clone());
        Ok(Self {
            config,
            store,
            detector,
            service,
            queue,
        })
    }

    /// Context backed by the JSON history file named in `[queue]`
    pub fn with_file_store(config: AppConfig) -> AppResult<Self> {
        let store = FileHistoryStore::open(config.queue.store_path.clone())?;
        Self::new(config, Arc::new(store))
    }

    /// Runs startup recovery and the worker
    pub async fn start(&self) -> AppResult<()> {
        self.queue.start(self.service.clone()).await
    }

    /// Creates a job record and queues it.
    ///
    /// A stopped queue is refused before anything is stored. A record created just
    /// as the queue stops stays CREATED and is picked up by the next `start`.
    pub async fn submit(
        &self,
        capture: CaptureSource,
        options: Option<DetectionOptions>,
    ) -> AppResult<History> {
        if !self.queue.is_accepting() {
            return Err(AppError::QueueStopped);
        }
        let history = self.service.create(capture, options).await?;
        self.queue.enqueue(AnalysisJob::new(history.clone()))?;
        Ok(history)
    }

    pub async fn shutdown(&self) {
        info!("Shutting down analysis queue ({} pending)", self.queue.pending());
        self.queue.stop().await;
    }
}
