use std::fmt;

use crate::model::task::Task;

/// Which tasks the list shows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskFilter {
    #[default]
    All,
    Active,
    Completed,
}

impl TaskFilter {
    pub fn parse_filter(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" => Some(TaskFilter::All),
            "active" | "open" => Some(TaskFilter::Active),
            "completed" | "done" => Some(TaskFilter::Completed),
            _ => None,
        }
    }

    fn admits(self, task: &Task) -> bool {
        match self {
            TaskFilter::All => true,
            TaskFilter::Active => !task.completed,
            TaskFilter::Completed => task.completed,
        }
    }
}

impl fmt::Display for TaskFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFilter::All => write!(f, "all"),
            TaskFilter::Active => write!(f, "active"),
            TaskFilter::Completed => write!(f, "completed"),
        }
    }
}

/// Tasks passing `filter` whose title or notes contain `query`
/// (case-insensitive, trimmed). Order is preserved; the input is not modified.
pub fn visible<'a>(tasks: &'a [Task], filter: TaskFilter, query: &str) -> Vec<&'a Task> {
    let needle = query.trim().to_lowercase();
    tasks
        .iter()
        .filter(|t| filter.admits(t))
        .filter(|t| {
            needle.is_empty()
                || t.title.to_lowercase().contains(&needle)
                || t.notes.to_lowercase().contains(&needle)
        })
        .collect()
}
