use serde::{Deserialize, Serialize};

/// Prefix reserved for ids minted by the coordinator before the store confirms a create.
/// Store-issued ids always start with a digit, so the two namespaces never meet.
pub const PLACEHOLDER_PREFIX: &str = "tmp-";

/// Error type for store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Caller-fixable input, e.g. an empty title
    #[error("{0}")]
    Validation(String),
    /// The target record does not exist (possibly deleted concurrently)
    #[error("task not found: {0}")]
    NotFound(String),
    /// The persistence medium could not be read or written
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    fn title_required() -> Self {
        StoreError::Validation("title required".into())
    }

    /// Short reason suitable for showing next to a failed action
    pub fn reason(&self) -> &str {
        match self {
            StoreError::Validation(_) => "Title is required.",
            StoreError::NotFound(_) => "The task no longer exists.",
            StoreError::Unavailable(_) => "Storage is unavailable.",
        }
    }
}

/// A task record, the unit of persistence and display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub completed: bool,
}

impl Task {
    /// True when the id was minted locally and has not been confirmed by the store
    pub fn is_placeholder(&self) -> bool {
        is_placeholder_id(&self.id)
    }
}

pub fn is_placeholder_id(id: &str) -> bool {
    id.starts_with(PLACEHOLDER_PREFIX)
}

pub fn placeholder_id(seq: u64) -> String {
    format!("{}{}", PLACEHOLDER_PREFIX, seq)
}

/// Input for creating a task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewTask {
    pub fn new(title: impl Into<String>, notes: Option<String>) -> Self {
        NewTask {
            title: title.into(),
            notes,
        }
    }

    /// Trim and validate into `(title, notes)`.
    pub fn sanitize(&self) -> Result<(String, String), StoreError> {
        let title = normalize_title(&self.title)?;
        let notes = self.notes.as_deref().map(normalize_notes).unwrap_or_default();
        Ok((title, notes))
    }
}

/// Partial update: only the fields that are `Some` change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl TaskPatch {
    pub fn completed(completed: bool) -> Self {
        TaskPatch {
            completed: Some(completed),
            ..Default::default()
        }
    }

    pub fn content(title: impl Into<String>, notes: impl Into<String>) -> Self {
        TaskPatch {
            title: Some(title.into()),
            notes: Some(notes.into()),
            completed: None,
        }
    }

    /// Apply this patch to a copy of `task`. On a validation failure the
    /// original is untouched and nothing is returned.
    pub fn apply_to(&self, task: &Task) -> Result<Task, StoreError> {
        let mut updated = task.clone();
        if let Some(title) = &self.title {
            updated.title = normalize_title(title)?;
        }
        if let Some(notes) = &self.notes {
            updated.notes = normalize_notes(notes);
        }
        if let Some(completed) = self.completed {
            updated.completed = completed;
        }
        Ok(updated)
    }
}

/// Trim a title, rejecting one that is empty afterwards
pub fn normalize_title(raw: &str) -> Result<String, StoreError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(StoreError::title_required());
    }
    Ok(title.to_string())
}

pub fn normalize_notes(raw: &str) -> String {
    raw.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Task {
        Task {
            id: "1700000000000-a1b2c3".into(),
            title: "Buy milk".into(),
            notes: String::new(),
            completed: false,
        }
    }

    #[test]
    fn sanitize_trims_title_and_notes() {
        let input = NewTask::new("  Write tests ", Some("  unit first\n".into()));
        let (title, notes) = input.sanitize().unwrap();
        assert_eq!(title, "Write tests");
        assert_eq!(notes, "unit first");
    }

    #[test]
    fn sanitize_defaults_notes_to_empty() {
        let (_, notes) = NewTask::new("x", None).sanitize().unwrap();
        assert_eq!(notes, "");
    }

    #[test]
    fn sanitize_rejects_blank_title() {
        let err = NewTask::new(" \t\n", None).sanitize().unwrap_err();
        assert_eq!(err, StoreError::Validation("title required".into()));
    }

    #[test]
    fn patch_only_touches_present_fields() {
        let task = sample();
        let updated = TaskPatch::completed(true).apply_to(&task).unwrap();
        assert!(updated.completed);
        assert_eq!(updated.title, task.title);
        assert_eq!(updated.notes, task.notes);
    }

    #[test]
    fn patch_trims_title_and_allows_empty_notes() {
        let task = Task {
            notes: "old".into(),
            ..sample()
        };
        let updated = TaskPatch::content(" Buy oat milk ", "   ")
            .apply_to(&task)
            .unwrap();
        assert_eq!(updated.title, "Buy oat milk");
        assert_eq!(updated.notes, "");
    }

    #[test]
    fn patch_with_blank_title_fails_without_change() {
        let task = sample();
        let patch = TaskPatch {
            title: Some("   ".into()),
            completed: Some(true),
            ..Default::default()
        };
        assert!(matches!(patch.apply_to(&task), Err(StoreError::Validation(_))));
        assert!(!task.completed);
    }

    #[test]
    fn placeholder_ids_are_recognized() {
        assert!(is_placeholder_id(&placeholder_id(7)));
        assert_eq!(placeholder_id(7), "tmp-7");
        assert!(!sample().is_placeholder());
    }

    #[test]
    fn task_deserializes_with_missing_optional_fields() {
        let task: Task = serde_json::from_str(r#"{"id":"1","title":"t"}"#).unwrap();
        assert_eq!(task.notes, "");
        assert!(!task.completed);
    }
}
