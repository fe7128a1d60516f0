use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::history::{History, HistoryPatch, HistoryStatus};
use crate::utils::error::{AppError, AppResult};

/// Persistence of analysis history records
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Stores a new record
    async fn create(&self, history: History) -> AppResult<History>;

    async fn get(&self, id: Uuid) -> AppResult<History>;

    /// Every record currently in `status`
    async fn get_all_by_status(&self, status: HistoryStatus) -> AppResult<Vec<History>>;

    async fn update_status(&self, id: Uuid, status: HistoryStatus) -> AppResult<History>;

    async fn update(&self, id: Uuid, patch: HistoryPatch) -> AppResult<History>;

    /// Moves every record in `from` to `to` as a single commit and returns the moved ids.
    ///
    /// Either all matching records change or none do.
    async fn update_status_batch(
        &self,
        from: HistoryStatus,
        to: HistoryStatus,
    ) -> AppResult<Vec<Uuid>>;
}

/// Record map shared by the stores
pub(crate) type Records = HashMap<Uuid, History>;

pub(crate) fn with_status(records: &Records, status: HistoryStatus) -> Vec<History> {
    let mut matching: Vec<History> = records
        .values()
        .filter(|h| h.status == status)
        .cloned()
        .collect();
    matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    matching
}

pub(crate) fn patch_record(records: &mut Records, id: Uuid, patch: HistoryPatch) -> AppResult<History> {
    let history = records
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(id.to_string()))?;
    history.apply(patch);
    Ok(history.clone())
}

pub(crate) fn move_all(records: &mut Records, from: HistoryStatus, to: HistoryStatus) -> Vec<Uuid> {
    let mut moved = Vec::new();
    for history in records.values_mut().filter(|h| h.status == from) {
        history.apply(HistoryPatch {
            status: Some(to),
            ..Default::default()
        });
        moved.push(history.id);
    }
    moved
}

/// In-memory store, mostly for tests and one-shot runs
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: RwLock<Records>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn create(&self, history: History) -> AppResult<History> {
        self.records.write().insert(history.id, history.clone());
        Ok(history)
    }

    async fn get(&self, id: Uuid) -> AppResult<History> {
        self.records
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    async fn get_all_by_status(&self, status: HistoryStatus) -> AppResult<Vec<History>> {
        Ok(with_status(&self.records.read(), status))
    }

    async fn update_status(&self, id: Uuid, status: HistoryStatus) -> AppResult<History> {
        let patch = HistoryPatch {
            status: Some(status),
            ..Default::default()
        };
        patch_record(&mut self.records.write(), id, patch)
    }

    async fn update(&self, id: Uuid, patch: HistoryPatch) -> AppResult<History> {
        patch_record(&mut self.records.write(), id, patch)
    }

    async fn update_status_batch(
        &self,
        from: HistoryStatus,
        to: HistoryStatus,
    ) -> AppResult<Vec<Uuid>> {
        Ok(move_all(&mut self.records.write(), from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::{CaptureSource, DetectionOptions};
    use serde_json::json;

    fn history(name: &str) -> History {
        History::new(CaptureSource::Path(name.into()), DetectionOptions::default())
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryHistoryStore::new();
        let h = store.create(history("a.pcap")).await.unwrap();
        assert_eq!(store.get(h.id).await.unwrap().id, h.id);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_len_tracks_creates() {
        let store = MemoryHistoryStore::new();
        assert!(store.is_empty());
        let created = tokio_test::block_on(store.create(history("a.pcap")));
        tokio_test::assert_ok!(created);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_record() {
        let store = MemoryHistoryStore::new();
        let result = store.update_status(Uuid::new_v4(), HistoryStatus::Done).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_status_queries_are_oldest_first() {
        let store = MemoryHistoryStore::new();
        let mut old = history("old.pcap");
        old.created_at = old.created_at - chrono::Duration::seconds(60);
        let new = history("new.pcap");
        store.create(new.clone()).await.unwrap();
        store.create(old.clone()).await.unwrap();

        let created = store.get_all_by_status(HistoryStatus::Created).await.unwrap();
        let ids: Vec<Uuid> = created.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![old.id, new.id]);
    }

    #[tokio::test]
    async fn test_update_patch() {
        let store = MemoryHistoryStore::new();
        let h = store.create(history("a.pcap")).await.unwrap();
        let updated = store
            .update(h.id, HistoryPatch::done(json!({"result": null})))
            .await
            .unwrap();
        assert_eq!(updated.status, HistoryStatus::Done);
        assert!(updated.result.is_some());
    }

    #[tokio::test]
    async fn test_batch_moves_only_matching() {
        let store = MemoryHistoryStore::new();
        let a = store.create(history("a.pcap")).await.unwrap();
        let b = store.create(history("b.pcap")).await.unwrap();
        store.update_status(a.id, HistoryStatus::Processing).await.unwrap();

        let moved = store
            .update_status_batch(HistoryStatus::Processing, HistoryStatus::Created)
            .await
            .unwrap();
        assert_eq!(moved, vec![a.id]);
        assert!(store
            .get_all_by_status(HistoryStatus::Processing)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.get(b.id).await.unwrap().status, HistoryStatus::Created);
    }
}
