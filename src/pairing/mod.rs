//! In-memory pairing queue and the background matcher that drains it.
//!
//! [`PairingQueue`] holds the set of users waiting for a partner. All
//! mutation and selection happen inside one short critical section, so an id
//! can never be handed out by two overlapping [`PairingQueue::try_match`]
//! calls. Selection is uniformly random, not FIFO.

pub mod matcher;

use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::seq::index;
use tokio::sync::Notify;
use tracing::trace;

use crate::types::UserId;

/// Set of waiting users with atomic random pair selection.
///
/// Uses a sync [`Mutex`] since the critical section is brief (no awaits).
#[derive(Debug, Default)]
pub struct PairingQueue {
    waiting: Mutex<Vec<UserId>>,
    wakeup: Notify,
}

impl PairingQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn waiting(&self) -> MutexGuard<'_, Vec<UserId>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `id` if absent. Returns `false` if it was already queued.
    pub fn enqueue(&self, id: UserId) -> bool {
        let added = {
            let mut waiting = self.waiting();
            if waiting.contains(&id) {
                false
            } else {
                waiting.push(id);
                true
            }
        };
        if added {
            trace!(user = %id, "enqueued");
            self.wakeup.notify_one();
        }
        added
    }

    /// Remove `id` if present. Returns whether it was queued.
    pub fn dequeue(&self, id: UserId) -> bool {
        let mut waiting = self.waiting();
        match waiting.iter().position(|w| *w == id) {
            Some(pos) => {
                waiting.swap_remove(pos);
                trace!(user = %id, "dequeued");
                true
            }
            None => false,
        }
    }

    /// Atomically remove and return two distinct, uniformly random waiting ids.
    ///
    /// Returns `None` if fewer than two users are waiting.
    pub fn try_match(&self) -> Option<(UserId, UserId)> {
        let mut waiting = self.waiting();
        if waiting.len() < 2 {
            return None;
        }
        let picked = index::sample(&mut rand::thread_rng(), waiting.len(), 2);
        let (i, j) = (picked.index(0), picked.index(1));
        // Remove the higher index first so the lower one stays valid.
        let (hi, lo) = if i > j { (i, j) } else { (j, i) };
        let second = waiting.swap_remove(hi);
        let first = waiting.swap_remove(lo);
        Some((first, second))
    }

    /// Number of waiting users. Diagnostics only.
    pub fn len(&self) -> usize {
        self.waiting().len()
    }

    /// Whether nobody is waiting.
    pub fn is_empty(&self) -> bool {
        self.waiting().is_empty()
    }

    /// Whether `id` is currently waiting.
    pub fn contains(&self, id: UserId) -> bool {
        self.waiting().contains(&id)
    }

    /// Resolve once an enqueue happened since the last wakeup.
    ///
    /// A permit is stored if nobody is waiting, so an enqueue that races
    /// ahead of this call is not lost.
    pub async fn wait_for_pair(&self) {
        self.wakeup.notified().await;
    }
}
