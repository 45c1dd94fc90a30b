//! Per-record FIFO queue: at most one store call per record is in flight.
//!
//! A turn is reserved synchronously when the intent is issued, so turns on
//! the same key run in the order the intents were made, regardless of how
//! the runtime schedules the spawned tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

type Tails = HashMap<String, (u64, oneshot::Receiver<()>)>;

#[derive(Default)]
pub(crate) struct Turns {
    tails: Arc<Mutex<Tails>>,
    next_generation: Mutex<u64>,
}

impl Turns {
    /// Join the back of the queue for `key`.
    pub(crate) fn reserve(&self, key: &str) -> Turn {
        let generation = {
            let mut next = self.next_generation.lock().unwrap_or_else(|e| e.into_inner());
            *next += 1;
            *next
        };
        let (release, tail) = oneshot::channel();
        let prior = self
            .tails
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), (generation, tail))
            .map(|(_, rx)| rx);
        Turn {
            key: key.to_string(),
            generation,
            prior,
            tails: Arc::clone(&self.tails),
            _release: release,
        }
    }

    /// True while some turn on `key` has not been dropped.
    pub(crate) fn is_queued(&self, key: &str) -> bool {
        self.tails
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    #[cfg(test)]
    pub(crate) fn queued_keys(&self) -> usize {
        self.tails.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// A place in a record's queue. Dropping it lets the next turn run.
pub(crate) struct Turn {
    key: String,
    generation: u64,
    prior: Option<oneshot::Receiver<()>>,
    tails: Arc<Mutex<Tails>>,
    _release: oneshot::Sender<()>,
}

impl Turn {
    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    /// Wait until every earlier turn on this key has been dropped.
    pub(crate) async fn ready(&mut self) {
        if let Some(prior) = self.prior.take() {
            // The sender is never used; a closed channel is the signal.
            let _ = prior.await;
        }
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        let mut tails = self.tails.lock().unwrap_or_else(|e| e.into_inner());
        if tails.get(&self.key).map(|(g, _)| *g) == Some(self.generation) {
            tails.remove(&self.key);
        }
    }
}
