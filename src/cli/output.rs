use serde::Serialize;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::coordinator::{Intent, Notice};
use crate::model::task::{StoreError, Task};

/// Titles wider than this are cut with an ellipsis in text output
const TITLE_MAX_WIDTH: usize = 48;

pub const EMPTY_STATE: &str = "No tasks here yet. Add your first task to get started.";

// ---------------------------------------------------------------------------
// JSON output structs
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct TaskListJson<'a> {
    pub filter: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    pub tasks: Vec<&'a Task>,
}

#[derive(Serialize)]
pub struct MutationJson {
    pub intent: String,
    pub target: String,
    /// Collection as shown right after the optimistic step
    pub optimistic: Vec<Task>,
    /// Collection after reconcile or rollback
    pub settled: Vec<Task>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<NoticeJson>,
}

#[derive(Serialize)]
pub struct NoticeJson {
    pub kind: &'static str,
    pub message: String,
    pub detail: String,
}

pub fn notice_to_json(notice: &Notice) -> NoticeJson {
    let kind = match notice.error {
        StoreError::Validation(_) => "validation",
        StoreError::NotFound(_) => "not_found",
        StoreError::Unavailable(_) => "unavailable",
    };
    NoticeJson {
        kind,
        message: notice.message(),
        detail: notice.error.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Human-readable formatting
// ---------------------------------------------------------------------------

/// The part of an id worth typing: the random tail of a store id, or the
/// whole placeholder id.
pub fn short_id(id: &str) -> &str {
    if crate::model::task::is_placeholder_id(id) {
        return id;
    }
    id.rsplit('-').next().unwrap_or(id)
}

/// One line per task: checkbox, short id, title, and the first line of the
/// notes aligned in a column.
pub fn format_task_lines(tasks: &[&Task]) -> Vec<String> {
    let titles: Vec<String> = tasks
        .iter()
        .map(|t| truncate_to_width(&t.title, TITLE_MAX_WIDTH))
        .collect();
    let column = titles.iter().map(|t| t.width()).max().unwrap_or(0);

    tasks
        .iter()
        .zip(&titles)
        .map(|(task, title)| {
            let mark = if task.completed { 'x' } else { ' ' };
            let head = format!("[{}] {}  {}", mark, short_id(&task.id), title);
            match task.notes.lines().next() {
                Some(note) if !note.is_empty() => {
                    let pad = column - title.width();
                    format!("{}{}  {}", head, " ".repeat(pad), note)
                }
                _ => head,
            }
        })
        .collect()
}

/// Past-tense summary of a confirmed mutation
pub fn format_outcome(intent: Intent, task: Option<&Task>, target: &str) -> String {
    match (intent, task) {
        (Intent::Add, Some(t)) => format!("added {}  {}", short_id(&t.id), t.title),
        (Intent::Toggle, Some(t)) if t.completed => {
            format!("completed {}  {}", short_id(&t.id), t.title)
        }
        (Intent::Toggle, Some(t)) => format!("reopened {}  {}", short_id(&t.id), t.title),
        (Intent::Save, Some(t)) => format!("saved {}  {}", short_id(&t.id), t.title),
        (_, _) => format!("deleted {}", short_id(target)),
    }
}

fn truncate_to_width(s: &str, max: usize) -> String {
    if s.width() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for c in s.chars() {
        let w = c.width().unwrap_or(0);
        if used + w + 1 > max {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push('…');
    out
}
