use std::fmt;

use crate::model::task::StoreError;

/// The user intent a mutation carries out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Add,
    Toggle,
    Save,
    Delete,
}

impl Intent {
    fn failure_text(self) -> &'static str {
        match self {
            Intent::Add => "Could not add task.",
            Intent::Toggle => "Could not update task.",
            Intent::Save => "Could not save changes.",
            Intent::Delete => "Could not delete task.",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Add => write!(f, "add"),
            Intent::Toggle => write!(f, "toggle"),
            Intent::Save => write!(f, "save"),
            Intent::Delete => write!(f, "delete"),
        }
    }
}

/// A rolled-back mutation, reported once to the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub intent: Intent,
    /// Id the intent targeted (a placeholder id for adds)
    pub task_id: String,
    pub error: StoreError,
}

impl Notice {
    pub fn new(intent: Intent, task_id: impl Into<String>, error: StoreError) -> Self {
        Notice {
            intent,
            task_id: task_id.into(),
            error,
        }
    }

    /// Human-readable message, e.g. "Could not save changes. Title is required."
    pub fn message(&self) -> String {
        format!("{} {}", self.intent.failure_text(), self.error.reason())
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for Notice {}
