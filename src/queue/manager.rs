use futures::FutureExt;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::config::{QueueConfig, RecoveryOrder};
use crate::models::history::{AnalysisJob, HistoryStatus};
use crate::queue::service::JobHandler;
use crate::queue::store::HistoryStore;
use crate::utils::error::{AppError, AppResult};

/// Single-worker FIFO queue of analysis jobs
pub struct AnalysisQueue {
    store: Arc<dyn HistoryStore>,
    config: QueueConfig,

    sender: mpsc::UnboundedSender<AnalysisJob>,

    /// Held by the running worker for its whole lifetime
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<AnalysisJob>>>,

    stop_tx: watch::Sender<bool>,

    state: Arc<QueueState>,

    worker: Mutex<Option<JoinHandle<()>>>,

    /// Serializes `start` so at most one worker is spawned
    start_lock: tokio::sync::Mutex<()>,
}

struct QueueState {
    accepting: AtomicBool,

    /// Enqueued or in-flight job ids
    pending: Mutex<HashSet<Uuid>>,

    in_flight: Mutex<Option<Uuid>>,

    idle: Notify,
}

impl QueueState {
    fn finish(&self, id: Uuid) {
        let empty = {
            let mut pending = self.pending.lock();
            pending.remove(&id);
            pending.is_empty()
        };
        if empty {
            self.idle.notify_waiters();
        }
    }
}

impl AnalysisQueue {
    pub fn new(store: Arc<dyn HistoryStore>, config: QueueConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (stop_tx, _) = watch::channel(false);
        Self {
            store,
            config,
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            stop_tx,
            state: Arc::new(QueueState {
                accepting: AtomicBool::new(true),
                pending: Mutex::new(HashSet::new()),
                in_flight: Mutex::new(None),
                idle: Notify::new(),
            }),
            worker: Mutex::new(None),
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Whether `enqueue` currently takes new jobs
    pub fn is_accepting(&self) -> bool {
        self.state.accepting.load(Ordering::SeqCst)
    }

    /// Adds a job to the back of the queue.
    ///
    /// Returns `false` when the same job is already pending.
    pub fn enqueue(&self, job: AnalysisJob) -> AppResult<bool> {
        if !self.state.accepting.load(Ordering::SeqCst) {
            return Err(AppError::QueueStopped);
        }
        let id = job.id();
        if !self.state.pending.lock().insert(id) {
            debug!("Job {} already queued", id);
            return Ok(false);
        }
        if self.sender.send(job).is_err() {
            self.state.finish(id);
            return Err(AppError::QueueStopped);
        }
        debug!("Queued job {}", id);
        Ok(true)
    }

    /// Starts the worker, running recovery first.
    ///
    /// Does nothing when a worker is already active. Without a worker no record can
    /// be legitimately PROCESSING, so every start resets those and re-enqueues every
    /// CREATED record. A recovery failure is returned and the worker is not started.
    pub async fn start(&self, handler: Arc<dyn JobHandler>) -> AppResult<()> {
        let _guard = self.start_lock.lock().await;
        if self.is_running() {
            debug!("Analysis worker already running");
            return Ok(());
        }
        self.state.accepting.store(true, Ordering::SeqCst);

        if let Err(e) = self.recover().await {
            self.state.accepting.store(false, Ordering::SeqCst);
            error!("Recovery failed: {}", e);
            return Err(e);
        }

        self.stop_tx.send_replace(false);
        let worker = tokio::spawn(run_worker(
            Arc::clone(&self.receiver),
            handler,
            Arc::clone(&self.state),
            self.stop_tx.subscribe(),
        ));
        *self.worker.lock() = Some(worker);
        Ok(())
    }

    /// Rejects new jobs, lets the in-flight job finish within the grace period,
    /// then aborts the worker. Queued jobs stay queued for the next `start`.
    pub async fn stop(&self) {
        self.state.accepting.store(false, Ordering::SeqCst);
        self.stop_tx.send_replace(true);

        let handle = self.worker.lock().take();
        let Some(mut handle) = handle else {
            return;
        };

        let grace = Duration::from_secs(self.config.stop_grace_secs);
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => info!("Analysis worker stopped"),
            Ok(Err(e)) if e.is_cancelled() => debug!("Analysis worker cancelled"),
            Ok(Err(e)) => error!("Analysis worker failed: {}", e),
            Err(_) => {
                warn!(
                    "In-flight job still running after {}s, aborting worker",
                    grace.as_secs()
                );
                handle.abort();
                let _ = handle.await;
                let abandoned = self.state.in_flight.lock().take();
                if let Some(id) = abandoned {
                    warn!("Job {} abandoned in PROCESSING", id);
                    self.state.finish(id);
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Number of queued plus in-flight jobs
    pub fn pending(&self) -> usize {
        self.state.pending.lock().len()
    }

    /// Resolves once no job is queued or in flight
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.state.idle.notified();
            if self.state.pending.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Resets orphaned PROCESSING records and re-enqueues every CREATED record
    async fn recover(&self) -> AppResult<usize> {
        let reset = self
            .store
            .update_status_batch(HistoryStatus::Processing, HistoryStatus::Created)
            .await
            .map_err(|e| {
                AppError::StatusTransition(format!("PROCESSING -> CREATED reset failed: {}", e))
            })?;
        if !reset.is_empty() {
            warn!("Reset {} interrupted jobs to CREATED", reset.len());
        }

        let mut created = self.store.get_all_by_status(HistoryStatus::Created).await?;
        match self.config.recovery_order {
            RecoveryOrder::NewestFirst => {
                created.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                if created.len() > 1 {
                    warn!(
                        "Recovering {} jobs newest-first; older jobs run last",
                        created.len()
                    );
                }
            }
            RecoveryOrder::OldestFirst => created.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        }

        let mut queued = 0;
        for history in created {
            if self.enqueue(AnalysisJob::new(history))? {
                queued += 1;
            }
        }
        info!("Recovery queued {} jobs", queued);
        Ok(queued)
    }
}

async fn run_worker(
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<AnalysisJob>>>,
    handler: Arc<dyn JobHandler>,
    state: Arc<QueueState>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut receiver = receiver.lock().await;
    info!("Analysis worker started");

    loop {
        if *stop_rx.borrow_and_update() {
            break;
        }
        let job = tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            job = receiver.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let id = job.id();
        *state.in_flight.lock() = Some(id);
        match AssertUnwindSafe(handler.handle(job)).catch_unwind().await {
            Ok(Ok(())) => debug!("Job {} handled", id),
            Ok(Err(e)) => error!("Job {} failed: {}", id, e),
            Err(_) => error!("Job {} panicked", id),
        }
        *state.in_flight.lock() = None;
        state.finish(id);
    }

    info!("Analysis worker stopped");
}
