use serde::{Deserialize, Serialize};

use crate::model::task::{StoreError, Task};

/// Version written into every stored document.
pub const SCHEMA_VERSION: u32 = 1;

/// On-medium layout of one namespace
#[derive(Debug, Serialize, Deserialize)]
struct Document {
    schema_version: u32,
    #[serde(default)]
    tasks: Vec<Task>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Stored {
    Versioned(Document),
    /// Bare array written before the envelope existed
    Unversioned(Vec<Task>),
}

/// Parse a stored payload. `None` or blank means an empty collection.
pub fn decode(payload: Option<&str>) -> Result<Vec<Task>, StoreError> {
    let Some(text) = payload.filter(|t| !t.trim().is_empty()) else {
        return Ok(Vec::new());
    };
    let stored: Stored = serde_json::from_str(text)
        .map_err(|e| StoreError::Unavailable(format!("stored tasks are unreadable: {}", e)))?;
    let mut tasks = match stored {
        Stored::Unversioned(tasks) => tasks,
        Stored::Versioned(doc) if doc.schema_version <= SCHEMA_VERSION => doc.tasks,
        Stored::Versioned(doc) => {
            return Err(StoreError::Unavailable(format!(
                "stored tasks use schema version {}, newest supported is {}",
                doc.schema_version, SCHEMA_VERSION
            )));
        }
    };
    reclaim_reserved_ids(&mut tasks);
    Ok(tasks)
}

/// Placeholder ids belong to unconfirmed adds. A stored record carrying one
/// (hand-edited or legacy data) gets this prefix so it stays addressable.
const RECLAIMED_PREFIX: &str = "stored-";

fn reclaim_reserved_ids(tasks: &mut [Task]) {
    for i in 0..tasks.len() {
        if !tasks[i].is_placeholder() {
            continue;
        }
        let mut id = format!("{}{}", RECLAIMED_PREFIX, tasks[i].id);
        while tasks.iter().any(|t| t.id == id) {
            id = format!("{}{}", RECLAIMED_PREFIX, id);
        }
        tracing::info!(from = %tasks[i].id, to = %id, "renamed stored task with a reserved id");
        tasks[i].id = id;
    }
}

/// Serialize the full collection in the current layout.
pub fn encode(tasks: &[Task]) -> Result<String, StoreError> {
    let doc = Document {
        schema_version: SCHEMA_VERSION,
        tasks: tasks.to_vec(),
    };
    serde_json::to_string_pretty(&doc)
        .map_err(|e| StoreError::Unavailable(format!("could not serialize tasks: {}", e)))
}
