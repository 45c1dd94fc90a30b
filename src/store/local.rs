use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use super::Backend;
use super::document;
use crate::io::medium::Medium;
use crate::model::task::{NewTask, StoreError, Task, TaskPatch};

/// Task store persisted to a local [`Medium`], with simulated round-trip latency.
pub struct LocalStore<M> {
    medium: Arc<M>,
    latency: Duration,
    /// Serializes read-modify-write cycles issued through this store
    write_gate: Arc<Mutex<()>>,
}

impl<M> Clone for LocalStore<M> {
    fn clone(&self) -> Self {
        LocalStore {
            medium: Arc::clone(&self.medium),
            latency: self.latency,
            write_gate: Arc::clone(&self.write_gate),
        }
    }
}

impl<M: Medium> LocalStore<M> {
    pub fn new(medium: Arc<M>, latency: Duration) -> Self {
        LocalStore {
            medium,
            latency,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn medium(&self) -> &Arc<M> {
        &self.medium
    }

    /// Like [`Backend::list`], but read failures are returned instead of
    /// being replaced by an empty collection.
    pub async fn try_list(&self) -> Result<Vec<Task>, StoreError> {
        self.round_trip().await;
        let medium = Arc::clone(&self.medium);
        blocking(move || document::decode(medium.read()?.as_deref())).await
    }

    async fn round_trip(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    /// Load the full collection, let `edit` change it, and write it back as
    /// one unit. Nothing is written when `edit` fails.
    async fn mutate<R, F>(&self, edit: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Vec<Task>) -> Result<R, StoreError> + Send + 'static,
    {
        self.round_trip().await;
        let _gate = self.write_gate.lock().await;
        let medium = Arc::clone(&self.medium);
        blocking(move || {
            let _guard = medium.guard()?;
            let mut tasks = document::decode(medium.read()?.as_deref())?;
            let out = edit(&mut tasks)?;
            medium.write(&document::encode(&tasks)?)?;
            Ok(out)
        })
        .await
    }
}

impl<M: Medium> Backend for LocalStore<M> {
    async fn list(&self) -> Vec<Task> {
        match self.try_list().await {
            Ok(tasks) => tasks,
            Err(e) => {
                // Lenient read: callers see an empty list, not the failure.
                tracing::warn!(
                    medium = %self.medium.describe(),
                    error = %e,
                    "list failed, returning no tasks"
                );
                Vec::new()
            }
        }
    }

    async fn create(&self, input: NewTask) -> Result<Task, StoreError> {
        let result = self
            .mutate(move |tasks| {
                let (title, notes) = input.sanitize()?;
                let task = Task {
                    id: fresh_id(tasks),
                    title,
                    notes,
                    completed: false,
                };
                tasks.insert(0, task.clone());
                Ok(task)
            })
            .await;
        log_outcome("create", &result);
        result
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Task, StoreError> {
        let id = id.to_string();
        let result = self
            .mutate(move |tasks| {
                let slot = tasks
                    .iter_mut()
                    .find(|t| t.id == id)
                    .ok_or_else(|| StoreError::NotFound(id.clone()))?;
                *slot = patch.apply_to(slot)?;
                Ok(slot.clone())
            })
            .await;
        log_outcome("update", &result);
        result
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        let result = self
            .mutate(move |tasks| {
                let before = tasks.len();
                tasks.retain(|t| t.id != id);
                if tasks.len() == before {
                    tracing::debug!(id = %id, "remove of absent task");
                }
                Ok(())
            })
            .await;
        if let Err(e) = &result {
            tracing::warn!(op = "remove", error = %e, "store rejected mutation");
        }
        result
    }
}

fn log_outcome(op: &'static str, result: &Result<Task, StoreError>) {
    match result {
        Ok(task) => tracing::debug!(op, id = %task.id, "store accepted mutation"),
        Err(e) => tracing::warn!(op, error = %e, "store rejected mutation"),
    }
}

/// Run medium I/O off the async thread.
async fn blocking<R, F>(work: F) -> Result<R, StoreError>
where
    R: Send + 'static,
    F: FnOnce() -> Result<R, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::Unavailable(format!("storage task failed: {}", e)))?
}

/// `<unix-millis>-<6 hex>`, redrawn until it is unused in `existing`.
fn fresh_id(existing: &[Task]) -> String {
    loop {
        let entropy = uuid::Uuid::new_v4().simple().to_string();
        let id = format!("{}-{}", Utc::now().timestamp_millis(), &entropy[..6]);
        if !existing.iter().any(|t| t.id == id) {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::medium::{FileMedium, MemoryMedium};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn memory_store() -> (Arc<MemoryMedium>, LocalStore<MemoryMedium>) {
        let medium = Arc::new(MemoryMedium::new("todo.tasks.v1"));
        let store = LocalStore::new(Arc::clone(&medium), Duration::ZERO);
        (medium, store)
    }

    #[tokio::test]
    async fn create_then_list_contains_trimmed_record() {
        let (_, store) = memory_store();
        let created = store
            .create(NewTask::new("  Write tests  ", Some(" unit ".into())))
            .await
            .unwrap();

        let tasks = store.list().await;
        assert_eq!(tasks, vec![created.clone()]);
        assert_eq!(created.title, "Write tests");
        assert_eq!(created.notes, "unit");
        assert!(!created.completed);
        assert!(!created.is_placeholder());
    }

    #[tokio::test]
    async fn create_prepends_newest_first() {
        let (_, store) = memory_store();
        let first = store.create(NewTask::new("first", None)).await.unwrap();
        let second = store.create(NewTask::new("second", None)).await.unwrap();

        let ids: Vec<String> = store.list().await.into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn create_with_blank_title_adds_nothing() {
        let (medium, store) = memory_store();
        let err = store.create(NewTask::new("   ", None)).await.unwrap_err();
        assert_eq!(err, StoreError::Validation("title required".into()));
        assert!(store.list().await.is_empty());
        assert_eq!(medium.write_count(), 0);
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let (_, store) = memory_store();
        for i in 0..25 {
            store.create(NewTask::new(format!("t{}", i), None)).await.unwrap();
        }
        let mut ids: Vec<String> = store.list().await.into_iter().map(|t| t.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 25);
    }

    #[tokio::test]
    async fn update_applies_only_present_fields() {
        let (_, store) = memory_store();
        let task = store
            .create(NewTask::new("Draft", Some("keep me".into())))
            .await
            .unwrap();

        let updated = store
            .update(&task.id, TaskPatch::completed(true))
            .await
            .unwrap();
        assert!(updated.completed);
        assert_eq!(updated.title, "Draft");
        assert_eq!(updated.notes, "keep me");
        assert_eq!(store.list().await, vec![updated]);
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let (_, store) = memory_store();
        let err = store
            .update("123-abcdef", TaskPatch::completed(true))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound("123-abcdef".into()));
    }

    #[tokio::test]
    async fn update_blank_title_is_rejected_and_record_kept() {
        let (_, store) = memory_store();
        let task = store.create(NewTask::new("Keep", None)).await.unwrap();
        let err = store
            .update(&task.id, TaskPatch::content("  ", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(store.list().await, vec![task]);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (_, store) = memory_store();
        let a = store.create(NewTask::new("a", None)).await.unwrap();
        let b = store.create(NewTask::new("b", None)).await.unwrap();

        store.remove(&a.id).await.unwrap();
        let after_first = store.list().await;
        assert_eq!(after_first, vec![b]);

        store.remove(&a.id).await.unwrap();
        assert_eq!(store.list().await, after_first);
    }

    #[tokio::test]
    async fn write_failure_surfaces_as_unavailable() {
        let (medium, store) = memory_store();
        medium.set_fail_writes(true);
        let err = store.create(NewTask::new("x", None)).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(matches!(
            store.remove("1-a").await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn read_failure_degrades_list_to_empty() {
        let (medium, store) = memory_store();
        store.create(NewTask::new("x", None)).await.unwrap();
        medium.set_fail_reads(true);

        assert!(store.list().await.is_empty());
        assert!(matches!(
            store.try_list().await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.update("1-a", TaskPatch::completed(true)).await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_creates_do_not_lose_updates() {
        let (_, store) = memory_store();
        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create(NewTask::new(format!("t{}", i), None)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.list().await.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn operations_wait_for_latency() {
        let medium = Arc::new(MemoryMedium::new("todo.tasks.v1"));
        let store = LocalStore::new(medium, Duration::from_millis(220));
        let start = tokio::time::Instant::now();
        store.create(NewTask::new("slow", None)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(220));
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let open = || {
            let medium = Arc::new(FileMedium::new(tmp.path(), "todo.tasks.v1"));
            LocalStore::new(medium, Duration::ZERO)
        };

        let created = open()
            .create(NewTask::new("persist me", None))
            .await
            .unwrap();
        let reopened = open().list().await;
        assert_eq!(reopened, vec![created]);
    }
}
