pub mod postprocess;
pub mod table;

pub use table::{FeatureTable, TimeSeries};
