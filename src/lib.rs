//! Packet capture time-series anomaly detection.
//!
//! Capture files are cut into fixed windows of traffic features, gap-filled and
//! enriched with rolling features, then scored by forecasting (ARIMA, SARIMA,
//! seasonal interval) and isolation-forest models. Analysis jobs run through a
//! single-worker queue that recovers interrupted work on startup.

pub mod capture;
pub mod context;
pub mod detection;
pub mod features;
pub mod models;
pub mod queue;
pub mod utils;

pub use context::AppContext;
pub use detection::{DetectionOutcome, Detector, ModelKind};
pub use utils::error::{AppError, AppResult};
