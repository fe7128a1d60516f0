pub mod file_store;
pub mod manager;
pub mod service;
pub mod store;

pub use file_store::FileHistoryStore;
pub use manager::AnalysisQueue;
pub use service::{HistoryService, JobHandler};
pub use store::{HistoryStore, MemoryHistoryStore};
