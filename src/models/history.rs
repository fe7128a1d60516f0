use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::models::request::{CaptureSource, DetectionOptions};

/// Lifecycle of an analysis job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryStatus {
    Created,
    Processing,
    Done,
    Error,
}

impl HistoryStatus {
    /// DONE and ERROR are never left
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "CREATED",
            Self::Processing => "PROCESSING",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        };
        f.pad(name)
    }
}

/// Persisted record of one analysis request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    pub id: Uuid,
    pub capture: CaptureSource,
    #[serde(default)]
    pub options: DetectionOptions,
    pub status: HistoryStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl History {
    pub fn new(capture: CaptureSource, options: DetectionOptions) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            capture,
            options,
            status: HistoryStatus::Created,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies `patch` and bumps `updated_at`
    pub fn apply(&mut self, patch: HistoryPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(result) = patch.result {
            self.result = Some(result);
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update of a history record; unset fields are left alone
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryPatch {
    pub status: Option<HistoryStatus>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl HistoryPatch {
    pub fn done(result: Value) -> Self {
        Self {
            status: Some(HistoryStatus::Done),
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(HistoryStatus::Error),
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Transient queue handle around a history record
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub history: History,
}

impl AnalysisJob {
    pub fn new(history: History) -> Self {
        Self { history }
    }

    pub fn id(&self) -> Uuid {
        self.history.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn history() -> History {
        History::new(
            CaptureSource::Url("https://host/a.pcap".into()),
            DetectionOptions::default(),
        )
    }

    #[test]
    fn test_new_record_is_created() {
        let h = history();
        assert_eq!(h.status, HistoryStatus::Created);
        assert!(h.result.is_none() && h.error.is_none());
        assert_eq!(h.created_at, h.updated_at);
    }

    #[test]
    fn test_status_serializes_upper_case() {
        assert_eq!(
            serde_json::to_value(HistoryStatus::Processing).unwrap(),
            json!("PROCESSING")
        );
        assert_eq!(HistoryStatus::Done.to_string(), "DONE");
        assert!(HistoryStatus::Error.is_terminal());
        assert!(!HistoryStatus::Created.is_terminal());
    }

    #[test]
    fn test_apply_patch() {
        let mut h = history();
        h.apply(HistoryPatch::failed("boom"));
        assert_eq!(h.status, HistoryStatus::Error);
        assert_eq!(h.error.as_deref(), Some("boom"));
        assert!(h.result.is_none());

        let mut h = history();
        h.apply(HistoryPatch::done(json!({"arima": {}})));
        assert_eq!(h.status, HistoryStatus::Done);
        assert!(h.result.is_some());
        assert!(h.updated_at >= h.created_at);
    }

    #[test]
    fn test_record_json_shape() {
        let h = history();
        let value = serde_json::to_value(&h).unwrap();
        assert_eq!(value["status"], "CREATED");
        assert_eq!(value["capture"]["url"], "https://host/a.pcap");
        assert!(value["result"].is_null());

        let back: History = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, h.id);
    }
}
