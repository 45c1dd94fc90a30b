//! The persistence store: authoritative task records behind the [`Backend`] contract.

pub mod document;
pub mod local;

use std::future::Future;

use crate::io::medium::MediumError;
use crate::model::task::{NewTask, StoreError, Task, TaskPatch};

pub use local::LocalStore;

/// Contract the coordinator consumes. Any backend, local or remote, must
/// honor the same validation and failure semantics.
pub trait Backend: Send + Sync + 'static {
    /// All records, newest first. Failures degrade to an empty collection.
    fn list(&self) -> impl Future<Output = Vec<Task>> + Send;

    /// Validate, assign an id, prepend and persist.
    fn create(&self, input: NewTask) -> impl Future<Output = Result<Task, StoreError>> + Send;

    /// Apply the fields present in `patch` to record `id`.
    fn update(
        &self,
        id: &str,
        patch: TaskPatch,
    ) -> impl Future<Output = Result<Task, StoreError>> + Send;

    /// Drop record `id`. Removing an absent id succeeds.
    fn remove(&self, id: &str) -> impl Future<Output = Result<(), StoreError>> + Send;
}

impl From<MediumError> for StoreError {
    fn from(e: MediumError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}
