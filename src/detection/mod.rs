pub mod adf;
pub mod arima;
pub mod detector;
pub mod isolation_forest;
pub mod linalg;
pub mod model;
pub mod optimize;
pub mod prophet;

pub use detector::Detector;
pub use model::{DetectionOutcome, ModelKind, ModelOutcome};
