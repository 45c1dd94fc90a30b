//! Optimistic coordinator: applies every intent to the UI-visible collection
//! at once, then confirms it against the store or rolls it back.
//!
//! Intents must be issued from inside a tokio runtime; the store call and
//! its reconcile-or-rollback step run on a spawned task. The collection
//! lock is never held across an `.await`.

mod board;
mod notice;
mod turns;

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::model::task::{NewTask, StoreError, Task, TaskPatch, is_placeholder_id};
use crate::store::Backend;
use board::{Board, Effect, Snapshot, position};
use turns::{Turn, Turns};

pub use notice::{Intent, Notice};

/// Result of a mutation once the store has answered: the confirmed record
/// (`None` for deletes), or the notice describing the rollback.
pub type Outcome = Result<Option<Task>, Notice>;

const NOTICE_CAPACITY: usize = 64;

const INTERRUPTED: &str = "mutation was interrupted before the store answered";

/// Handle to a mutation whose optimistic step has already been applied.
pub struct Pending {
    intent: Intent,
    target: String,
    tasks: Vec<Task>,
    resolution: Resolution,
}

enum Resolution {
    Spawned(JoinHandle<Outcome>),
    Ready(Outcome),
}

impl Pending {
    fn spawned(
        intent: Intent,
        target: String,
        tasks: Vec<Task>,
        handle: JoinHandle<Outcome>,
    ) -> Self {
        Pending {
            intent,
            target,
            tasks,
            resolution: Resolution::Spawned(handle),
        }
    }

    /// The UI-visible collection right after the optimistic step.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Id the intent acted on; for adds this is the placeholder id.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    /// Wait for the store's answer. Reconcile or rollback has already been
    /// applied to the collection by the time this returns.
    pub async fn settle(self) -> Outcome {
        match self.resolution {
            Resolution::Ready(outcome) => outcome,
            // The task's Settlement already rolled back on the way out.
            Resolution::Spawned(handle) => handle.await.unwrap_or_else(|e| {
                tracing::error!(
                    intent = %self.intent,
                    id = %self.target,
                    error = %e,
                    "mutation task failed"
                );
                Err(Notice::new(
                    self.intent,
                    self.target,
                    StoreError::Unavailable(INTERRUPTED.to_string()),
                ))
            }),
        }
    }
}

struct Shared<B> {
    store: B,
    board: Mutex<Board>,
    turns: Turns,
    notices: broadcast::Sender<Notice>,
}

impl<B> Shared<B> {
    fn board(&self) -> MutexGuard<'_, Board> {
        self.board.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn commit(&self, snapshot: &Snapshot, effect: Effect) {
        tracing::debug!(effect = ?effect, "reconciled with store");
        self.board().commit(snapshot, effect);
    }

    fn rollback(&self, notice: Notice, snapshot: Snapshot, revert: Option<Effect>) -> Outcome {
        tracing::warn!(
            intent = %notice.intent,
            id = %notice.task_id,
            error = %notice.error,
            "store rejected mutation, rolling back"
        );
        let mut board = self.board();
        board.rollback(snapshot, revert);
        self.report(&mut board, notice)
    }

    fn report(&self, board: &mut Board, notice: Notice) -> Outcome {
        board.last_error = Some(notice.clone());
        // No subscribers is fine; the notice is also kept as last_error.
        let _ = self.notices.send(notice.clone());
        Err(notice)
    }

    /// Store id for `id`. Callers hold their turn, so any create this
    /// depends on has already settled.
    fn resolve(&self, id: &str) -> Result<String, StoreError> {
        self.board()
            .resolve(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Give up a turn. A placeholder nobody else is queued on no longer
    /// needs its alias or abandoned mark.
    fn release(&self, turn: Turn) {
        let key = turn.key().to_string();
        let mut board = self.board();
        drop(turn);
        if is_placeholder_id(&key) && !self.turns.is_queued(&key) {
            board.forget_placeholder(&key);
        }
    }
}

/// A mutation between its optimistic step and its resolution. Dropped
/// unresolved (the task panicked or was cancelled), it rolls back.
struct Settlement<B> {
    shared: Arc<Shared<B>>,
    intent: Intent,
    target: String,
    snapshot: Option<Snapshot>,
    revert: Option<Effect>,
}

impl<B> Settlement<B> {
    fn new(
        shared: &Arc<Shared<B>>,
        intent: Intent,
        target: &str,
        snapshot: Snapshot,
        revert: Option<Effect>,
    ) -> Self {
        Settlement {
            shared: Arc::clone(shared),
            intent,
            target: target.to_string(),
            snapshot: Some(snapshot),
            revert,
        }
    }

    fn reconcile(mut self, effect: Effect) {
        if let Some(snapshot) = self.snapshot.take() {
            self.shared.commit(&snapshot, effect);
        }
    }

    fn reject(mut self, error: StoreError) -> Outcome {
        let notice = Notice::new(self.intent, self.target.clone(), error);
        match self.snapshot.take() {
            Some(snapshot) => self.shared.rollback(notice, snapshot, self.revert.take()),
            None => Err(notice),
        }
    }
}

impl<B> Drop for Settlement<B> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            let error = StoreError::Unavailable(INTERRUPTED.to_string());
            let notice = Notice::new(self.intent, self.target.clone(), error);
            let _ = self.shared.rollback(notice, snapshot, self.revert.take());
        }
    }
}

/// Keeps the UI-visible task collection in step with a [`Backend`].
pub struct Coordinator<B> {
    shared: Arc<Shared<B>>,
}

impl<B> Clone for Coordinator<B> {
    fn clone(&self) -> Self {
        Coordinator {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: Backend> Coordinator<B> {
    pub fn new(store: B) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Coordinator {
            shared: Arc::new(Shared {
                store,
                board: Mutex::new(Board::default()),
                turns: Turns::default(),
                notices,
            }),
        }
    }

    pub fn store(&self) -> &B {
        &self.shared.store
    }

    /// Current UI-visible collection, by value.
    pub fn tasks(&self) -> Vec<Task> {
        self.shared.board().tasks.clone()
    }

    /// True until the first [`load`](Self::load) completes.
    pub fn is_loading(&self) -> bool {
        self.shared.board().loading
    }

    /// Most recent rollback notice; cleared when the next intent starts.
    pub fn last_error(&self) -> Option<Notice> {
        self.shared.board().last_error.clone()
    }

    /// Mutations issued but not yet resolved.
    pub fn in_flight(&self) -> usize {
        self.shared.board().in_flight()
    }

    /// Receive a [`Notice`] for every rolled-back mutation.
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.shared.notices.subscribe()
    }

    /// Initialize the collection from the store.
    pub async fn load(&self) -> Vec<Task> {
        self.shared.board().loading = true;
        let tasks = self.refresh().await;
        self.shared.board().loading = false;
        tasks
    }

    /// Replace the collection with the store's current list.
    pub async fn refresh(&self) -> Vec<Task> {
        let tasks = self.shared.store.list().await;
        tracing::debug!(count = tasks.len(), "loaded tasks from store");
        let mut board = self.shared.board();
        board.tasks = tasks;
        board.tasks.clone()
    }

    /// Show a placeholder at the top now; swap in the stored record later.
    pub fn add_task(&self, title: &str, notes: Option<&str>) -> Pending {
        let mut board = self.shared.board();
        board.last_error = None;
        let placeholder = board.mint_placeholder();
        let snapshot = board.begin();
        board.tasks.insert(
            0,
            Task {
                id: placeholder.clone(),
                title: title.to_string(),
                notes: notes.unwrap_or_default().to_string(),
                completed: false,
            },
        );
        let turn = self.shared.turns.reserve(&placeholder);
        let tasks = board.tasks.clone();
        drop(board);
        tracing::debug!(id = %placeholder, "optimistic add");

        let input = NewTask::new(title, notes.map(str::to_string));
        let revert = Effect::Removed(placeholder.clone());
        let settlement =
            Settlement::new(&self.shared, Intent::Add, &placeholder, snapshot, Some(revert));
        let shared = Arc::clone(&self.shared);
        let target = placeholder.clone();
        let handle = tokio::spawn(async move {
            let outcome = match shared.store.create(input).await {
                Ok(task) => {
                    settlement.reconcile(Effect::Confirmed {
                        placeholder,
                        task: task.clone(),
                    });
                    Ok(Some(task))
                }
                Err(e) => settlement.reject(e),
            };
            shared.release(turn);
            outcome
        });
        Pending::spawned(Intent::Add, target, tasks, handle)
    }

    /// Flip `completed` on a visible record.
    pub fn toggle_complete(&self, id: &str) -> Pending {
        let mut board = self.shared.board();
        board.last_error = None;
        let Some(index) = position(&board.tasks, id) else {
            let notice = Notice::new(Intent::Toggle, id, StoreError::NotFound(id.to_string()));
            let outcome = self.shared.report(&mut board, notice);
            return Pending {
                intent: Intent::Toggle,
                target: id.to_string(),
                tasks: board.tasks.clone(),
                resolution: Resolution::Ready(outcome),
            };
        };
        let snapshot = board.begin();
        let before = board.tasks[index].clone();
        let completed = !before.completed;
        board.tasks[index].completed = completed;
        let turn = self.shared.turns.reserve(id);
        let tasks = board.tasks.clone();
        drop(board);
        tracing::debug!(id, completed, "optimistic toggle");

        let revert = Effect::Restored {
            task: before,
            index,
        };
        let handle = self.update_in_background(
            Intent::Toggle,
            id,
            TaskPatch::completed(completed),
            snapshot,
            Some(revert),
            turn,
        );
        Pending::spawned(Intent::Toggle, id.to_string(), tasks, handle)
    }

    /// Replace a record's title and notes.
    pub fn save_task(&self, id: &str, title: &str, notes: &str) -> Pending {
        let mut board = self.shared.board();
        board.last_error = None;
        let snapshot = board.begin();
        let revert = position(&board.tasks, id).map(|index| {
            let before = board.tasks[index].clone();
            let edited = &mut board.tasks[index];
            edited.title = title.to_string();
            edited.notes = notes.to_string();
            Effect::Restored {
                task: before,
                index,
            }
        });
        let turn = self.shared.turns.reserve(id);
        let tasks = board.tasks.clone();
        drop(board);
        tracing::debug!(id, "optimistic save");

        let handle = self.update_in_background(
            Intent::Save,
            id,
            TaskPatch::content(title, notes),
            snapshot,
            revert,
            turn,
        );
        Pending::spawned(Intent::Save, id.to_string(), tasks, handle)
    }

    /// Remove a record from view now and from the store later.
    pub fn delete_task(&self, id: &str) -> Pending {
        let mut board = self.shared.board();
        board.last_error = None;
        let snapshot = board.begin();
        let revert = position(&board.tasks, id).map(|index| Effect::Restored {
            task: board.tasks.remove(index),
            index,
        });
        let turn = self.shared.turns.reserve(id);
        let tasks = board.tasks.clone();
        drop(board);
        tracing::debug!(id, "optimistic delete");

        let settlement = Settlement::new(&self.shared, Intent::Delete, id, snapshot, revert);
        let shared = Arc::clone(&self.shared);
        let target = id.to_string();
        let handle = tokio::spawn(async move {
            let mut turn = turn;
            turn.ready().await;
            let result = match shared.resolve(&target) {
                Ok(store_id) => shared.store.remove(&store_id).await.map(|_| store_id),
                Err(e) => Err(e),
            };
            let outcome = match result {
                Ok(store_id) => {
                    settlement.reconcile(Effect::Removed(store_id));
                    Ok(None)
                }
                Err(e) => settlement.reject(e),
            };
            shared.release(turn);
            outcome
        });
        Pending::spawned(Intent::Delete, id.to_string(), tasks, handle)
    }

    fn update_in_background(
        &self,
        intent: Intent,
        id: &str,
        patch: TaskPatch,
        snapshot: Snapshot,
        revert: Option<Effect>,
        turn: Turn,
    ) -> JoinHandle<Outcome> {
        let settlement = Settlement::new(&self.shared, intent, id, snapshot, revert);
        let shared = Arc::clone(&self.shared);
        let target = id.to_string();
        tokio::spawn(async move {
            let mut turn = turn;
            turn.ready().await;
            let result = match shared.resolve(&target) {
                Ok(store_id) => shared.store.update(&store_id, patch).await,
                Err(e) => Err(e),
            };
            let outcome = match result {
                Ok(task) => {
                    settlement.reconcile(Effect::Replaced(task.clone()));
                    Ok(Some(task))
                }
                Err(e) => settlement.reject(e),
            };
            shared.release(turn);
            outcome
        })
    }
}
