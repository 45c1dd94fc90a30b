//! The UI-visible collection and the bookkeeping that makes rollback safe
//! while several mutations are in flight.
//!
//! Every mutation takes a [`Snapshot`] when it starts. A failed mutation
//! restores its own snapshot and then replays the journal: the effects of
//! every mutation that resolved after the snapshot was taken. With nothing
//! else in flight the journal is empty and the restore is exact.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::coordinator::notice::Notice;
use crate::model::task::{Task, is_placeholder_id, placeholder_id};

/// The collection as it was when a mutation started
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    tick: u64,
    tasks: Vec<Task>,
}

/// A resolved change to the collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Effect {
    /// The store accepted a create: the placeholder becomes `task`
    Confirmed { placeholder: String, task: Task },
    /// The store returned the authoritative version of an existing record
    Replaced(Task),
    /// The record is gone (deleted, or a create that never happened)
    Removed(String),
    /// A rejected mutation put the record back where it was
    Restored { task: Task, index: usize },
}

impl Effect {
    fn apply(&self, tasks: &mut Vec<Task>, replaying: bool) {
        match self {
            Effect::Confirmed { placeholder, task } => {
                if let Some(pos) = position(tasks, placeholder) {
                    tasks[pos] = task.clone();
                } else if replaying && position(tasks, &task.id).is_none() {
                    // Snapshot predates the create
                    tasks.insert(0, task.clone());
                }
            }
            Effect::Replaced(task) => {
                if let Some(pos) = position(tasks, &task.id) {
                    tasks[pos] = task.clone();
                }
            }
            Effect::Removed(id) => tasks.retain(|t| &t.id != id),
            Effect::Restored { task, index } => match position(tasks, &task.id) {
                Some(pos) => tasks[pos] = task.clone(),
                None => tasks.insert((*index).min(tasks.len()), task.clone()),
            },
        }
    }
}

pub(crate) fn position(tasks: &[Task], id: &str) -> Option<usize> {
    tasks.iter().position(|t| t.id == id)
}

#[derive(Debug)]
struct Entry {
    tick: u64,
    effect: Effect,
}

#[derive(Debug)]
pub(crate) struct Board {
    pub(crate) tasks: Vec<Task>,
    pub(crate) loading: bool,
    pub(crate) last_error: Option<Notice>,
    clock: u64,
    next_placeholder: u64,
    /// Snapshot ticks of mutations that have not resolved yet
    open: BTreeSet<u64>,
    journal: Vec<Entry>,
    /// Placeholder id → store-assigned id, once a create resolves
    aliases: HashMap<String, String>,
    /// Placeholders whose create was rejected
    abandoned: HashSet<String>,
}

impl Default for Board {
    fn default() -> Self {
        Board {
            tasks: Vec::new(),
            loading: true,
            last_error: None,
            clock: 0,
            next_placeholder: 0,
            open: BTreeSet::new(),
            journal: Vec::new(),
            aliases: HashMap::new(),
            abandoned: HashSet::new(),
        }
    }
}

impl Board {
    pub(crate) fn mint_placeholder(&mut self) -> String {
        self.next_placeholder += 1;
        placeholder_id(self.next_placeholder)
    }

    /// Capture the collection by value and mark a mutation as in flight.
    pub(crate) fn begin(&mut self) -> Snapshot {
        self.clock += 1;
        self.open.insert(self.clock);
        Snapshot {
            tick: self.clock,
            tasks: self.tasks.clone(),
        }
    }

    /// Apply a confirmed result and close the mutation.
    pub(crate) fn commit(&mut self, snapshot: &Snapshot, effect: Effect) {
        effect.apply(&mut self.tasks, false);
        if let Effect::Confirmed { placeholder, task } = &effect {
            self.aliases.insert(placeholder.clone(), task.id.clone());
        }
        self.record(effect);
        self.close(snapshot.tick);
    }

    /// Restore the snapshot, replay what resolved since, and close the mutation.
    /// `revert` tells other in-flight mutations how this record was put back.
    pub(crate) fn rollback(&mut self, snapshot: Snapshot, revert: Option<Effect>) {
        let Snapshot { tick, mut tasks } = snapshot;
        for entry in self.journal.iter().filter(|e| e.tick > tick) {
            entry.effect.apply(&mut tasks, true);
        }
        self.tasks = tasks;
        if let Some(Effect::Removed(id)) = &revert
            && is_placeholder_id(id)
        {
            self.abandoned.insert(id.clone());
        }
        if let Some(effect) = revert.and_then(|e| self.rebase(e)) {
            self.record(effect);
        }
        self.close(tick);
    }

    /// Point a revert at the record's current identity: a confirmed
    /// placeholder becomes its store id, an abandoned one is dropped.
    fn rebase(&self, effect: Effect) -> Option<Effect> {
        match effect {
            Effect::Restored { mut task, index } if task.is_placeholder() => {
                if self.abandoned.contains(&task.id) {
                    return None;
                }
                if let Some(confirmed) = self.aliases.get(&task.id) {
                    task.id = confirmed.clone();
                }
                Some(Effect::Restored { task, index })
            }
            other => Some(other),
        }
    }

    /// Map a possibly-placeholder id to the id the store knows.
    /// `None` means the placeholder was never confirmed.
    pub(crate) fn resolve(&self, id: &str) -> Option<String> {
        if !is_placeholder_id(id) {
            return Some(id.to_string());
        }
        if self.abandoned.contains(id) {
            return None;
        }
        self.aliases.get(id).cloned()
    }

    /// Drop what is remembered about a placeholder once no intent can
    /// still be waiting to resolve it.
    pub(crate) fn forget_placeholder(&mut self, id: &str) {
        self.aliases.remove(id);
        self.abandoned.remove(id);
    }

    #[cfg(test)]
    pub(crate) fn remembered_placeholders(&self) -> usize {
        self.aliases.len() + self.abandoned.len()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.open.len()
    }

    fn record(&mut self, effect: Effect) {
        self.clock += 1;
        self.journal.push(Entry {
            tick: self.clock,
            effect,
        });
    }

    fn close(&mut self, tick: u64) {
        self.open.remove(&tick);
        match self.open.first() {
            Some(&oldest) => self.journal.retain(|e| e.tick > oldest),
            None => self.journal.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn task(id: &str, title: &str, completed: bool) -> Task {
        Task {
            id: id.into(),
            title: title.into(),
            notes: String::new(),
            completed,
        }
    }

    fn board_with(tasks: Vec<Task>) -> Board {
        Board {
            tasks,
            loading: false,
            ..Default::default()
        }
    }

    #[test]
    fn isolated_rollback_is_exact() {
        let original = vec![task("1-a", "a", false), task("2-b", "b", true)];
        let mut board = board_with(original.clone());

        let snap = board.begin();
        board.tasks.remove(0);
        board.tasks[0].completed = false;
        let revert = Effect::Restored {
            task: original[0].clone(),
            index: 0,
        };
        board.rollback(snap, Some(revert));

        assert_eq!(board.tasks, original);
        assert_eq!(board.in_flight(), 0);
        assert!(board.journal.is_empty());
    }

    #[test]
    fn rollback_keeps_later_confirmation_on_another_record() {
        let mut board = board_with(vec![task("1-a", "a", false), task("2-b", "b", false)]);

        // toggle a, then toggle b
        let snap_a = board.begin();
        board.tasks[0].completed = true;
        let snap_b = board.begin();
        board.tasks[1].completed = true;

        // b confirmed first, then a rejected
        board.commit(&snap_b, Effect::Replaced(task("2-b", "b", true)));
        board.rollback(
            snap_a,
            Some(Effect::Restored { task: task("1-a", "a", false), index: 0 }),
        );

        assert_eq!(
            board.tasks,
            vec![task("1-a", "a", false), task("2-b", "b", true)]
        );
    }

    #[test]
    fn later_rollback_honours_earlier_revert() {
        let mut board = board_with(vec![task("1-a", "a", false), task("2-b", "b", false)]);

        let snap_a = board.begin();
        board.tasks[0].completed = true;
        let snap_b = board.begin(); // includes a's optimistic flip
        board.tasks[1].completed = true;

        board.rollback(
            snap_a,
            Some(Effect::Restored { task: task("1-a", "a", false), index: 0 }),
        );
        board.rollback(
            snap_b,
            Some(Effect::Restored { task: task("2-b", "b", false), index: 1 }),
        );

        assert_eq!(
            board.tasks,
            vec![task("1-a", "a", false), task("2-b", "b", false)]
        );
    }

    #[test]
    fn confirmation_replaces_placeholder_in_place() {
        let mut board = board_with(vec![task("1-a", "a", false)]);
        let tmp = board.mint_placeholder();

        let snap = board.begin();
        board.tasks.insert(0, task(&tmp, "new", false));
        board.tasks.push(task("9-z", "z", false));
        board.commit(
            &snap,
            Effect::Confirmed { placeholder: tmp.clone(), task: task("3-c", "new", false) },
        );

        let ids: Vec<&str> = board.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["3-c", "1-a", "9-z"]);
        assert_eq!(board.resolve(&tmp).as_deref(), Some("3-c"));
    }

    #[test]
    fn rollback_renames_confirmed_placeholder() {
        let mut board = board_with(Vec::new());
        let tmp = board.mint_placeholder();

        let snap_add = board.begin();
        board.tasks.insert(0, task(&tmp, "draft", false));
        let snap_save = board.begin();
        board.tasks[0].title = "draft v2".into();

        board.commit(
            &snap_add,
            Effect::Confirmed { placeholder: tmp.clone(), task: task("5-e", "draft", false) },
        );
        board.rollback(snap_save, None);

        assert_eq!(board.tasks, vec![task("5-e", "draft", false)]);
    }

    #[test]
    fn rollback_drops_abandoned_placeholder() {
        let mut board = board_with(Vec::new());
        let tmp = board.mint_placeholder();

        let snap_add = board.begin();
        board.tasks.insert(0, task(&tmp, "", false));
        let snap_toggle = board.begin();
        board.tasks[0].completed = true;

        board.rollback(snap_add, Some(Effect::Removed(tmp.clone())));
        assert!(board.resolve(&tmp).is_none());

        board.rollback(snap_toggle, None);
        assert!(board.tasks.is_empty());
    }

    #[test]
    fn snapshot_older_than_create_still_shows_created_task() {
        let mut board = board_with(vec![task("1-a", "a", false)]);

        let snap_toggle = board.begin();
        board.tasks[0].completed = true;

        let tmp = board.mint_placeholder();
        let snap_add = board.begin();
        board.tasks.insert(0, task(&tmp, "b", false));
        board.commit(
            &snap_add,
            Effect::Confirmed { placeholder: tmp, task: task("2-b", "b", false) },
        );

        board.rollback(
            snap_toggle,
            Some(Effect::Restored { task: task("1-a", "a", false), index: 0 }),
        );
        assert_eq!(
            board.tasks,
            vec![task("2-b", "b", false), task("1-a", "a", false)]
        );
    }

    #[test]
    fn store_ids_resolve_to_themselves() {
        let board = Board::default();
        assert_eq!(board.resolve("1-a").as_deref(), Some("1-a"));
        assert!(board.resolve("tmp-42").is_none());
    }

    #[test]
    fn forgotten_placeholder_no_longer_resolves() {
        let mut board = board_with(Vec::new());
        let placeholder = board.mint_placeholder();
        board.tasks.insert(0, task(&placeholder, "new", false));
        let snap = board.begin();
        board.commit(
            &snap,
            Effect::Confirmed {
                placeholder: placeholder.clone(),
                task: task("9-z", "new", false),
            },
        );
        assert_eq!(board.resolve(&placeholder).as_deref(), Some("9-z"));
        assert_eq!(board.remembered_placeholders(), 1);

        board.forget_placeholder(&placeholder);
        assert_eq!(board.resolve(&placeholder), None);
        assert_eq!(board.remembered_placeholders(), 0);
    }
}
