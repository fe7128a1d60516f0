use async_trait::async_trait;
use log::{debug, info};
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::models::history::{History, HistoryPatch, HistoryStatus};
use crate::queue::store::{move_all, patch_record, with_status, HistoryStore, Records};
use crate::utils::error::{AppError, AppResult};

/// History store persisted as one JSON array.
///
/// Every mutation rewrites the whole file through a temporary file in the same
/// directory followed by a rename, so a crash leaves either the old or the new
/// contents on disk. The write runs on the blocking pool and the in-memory copy
/// only changes once it succeeded.
pub struct FileHistoryStore {
    path: PathBuf,
    records: Mutex<Records>,

    /// Held for a whole commit so writes land in order
    write_lock: tokio::sync::Mutex<()>,
}

impl FileHistoryStore {
    /// Opens `path`, starting empty when it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let records = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let list: Vec<History> = if content.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&content)?
            };
            list.into_iter().map(|h| (h.id, h)).collect()
        } else {
            Records::new()
        };
        info!("Opened history store {} ({} records)", path.display(), records.len());
        Ok(Self {
            path,
            records: Mutex::new(records),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `change` to a copy of the records, persists it, then swaps it in
    async fn commit<T, F>(&self, change: F) -> AppResult<T>
    where
        T: Send,
        F: FnOnce(&mut Records) -> AppResult<T> + Send,
    {
        let _writing = self.write_lock.lock().await;
        let mut next = self.records.lock().clone();
        let value = change(&mut next)?;

        let mut list: Vec<History> = next.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_records(&path, &list))
            .await
            .map_err(|e| AppError::processing(format!("history write task failed: {}", e)))??;

        *self.records.lock() = next;
        Ok(value)
    }
}

fn write_records(path: &Path, list: &[History]) -> AppResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut file, list)?;
    file.flush()?;
    file.persist(path).map_err(|e| AppError::Io(e.error))?;
    debug!("Wrote {} records to {}", list.len(), path.display());
    Ok(())
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn create(&self, history: History) -> AppResult<History> {
        self.commit(|records| {
            records.insert(history.id, history.clone());
            Ok(history)
        })
        .await
    }

    async fn get(&self, id: Uuid) -> AppResult<History> {
        self.records
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    async fn get_all_by_status(&self, status: HistoryStatus) -> AppResult<Vec<History>> {
        Ok(with_status(&self.records.lock(), status))
    }

    async fn update_status(&self, id: Uuid, status: HistoryStatus) -> AppResult<History> {
        let patch = HistoryPatch {
            status: Some(status),
            ..Default::default()
        };
        self.commit(|records| patch_record(records, id, patch)).await
    }

    async fn update(&self, id: Uuid, patch: HistoryPatch) -> AppResult<History> {
        self.commit(|records| patch_record(records, id, patch)).await
    }

    async fn update_status_batch(
        &self,
        from: HistoryStatus,
        to: HistoryStatus,
    ) -> AppResult<Vec<Uuid>> {
        self.commit(|records| Ok(move_all(records, from, to))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::{CaptureSource, DetectionOptions};
    use std::sync::Arc;

    fn history() -> History {
        History::new(
            CaptureSource::Url("https://host/x.pcap".into()),
            DetectionOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");

        let store = FileHistoryStore::open(&path).unwrap();
        let a = store.create(history()).await.unwrap();
        let b = store.create(history()).await.unwrap();
        store.update_status(a.id, HistoryStatus::Processing).await.unwrap();
        drop(store);

        let reopened = FileHistoryStore::open(&path).unwrap();
        assert_eq!(reopened.get(a.id).await.unwrap().status, HistoryStatus::Processing);
        assert_eq!(reopened.get(b.id).await.unwrap().status, HistoryStatus::Created);
    }

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::open(dir.path().join("none.json")).unwrap();
        assert!(store
            .get_all_by_status(HistoryStatus::Created)
            .await
            .unwrap()
            .is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_failed_change_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let store = FileHistoryStore::open(&path).unwrap();
        store.create(history()).await.unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let result = store.update_status(Uuid::new_v4(), HistoryStatus::Done).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_all_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let store = Arc::new(FileHistoryStore::open(&path).unwrap());

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.create(history()).await })
            })
            .collect();
        let mut ids = Vec::new();
        for joined in futures::future::join_all(tasks).await {
            ids.push(joined.unwrap().unwrap().id);
        }

        let on_disk: Vec<History> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.len(), 16);
        let reopened = FileHistoryStore::open(&path).unwrap();
        for id in ids {
            assert_eq!(reopened.get(id).await.unwrap().status, HistoryStatus::Created);
        }
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(FileHistoryStore::open(&path), Err(AppError::Json(_))));
    }
}
