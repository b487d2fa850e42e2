//! Per-user async locks.
//!
//! Every transition holds the lock of each user whose record it rewrites.
//! Two-user transitions acquire both locks in ascending id order so that
//! concurrent operations on the same pair cannot deadlock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::types::UserId;

/// Idle lock entries are pruned once the table grows past this size.
const PRUNE_THRESHOLD: usize = 1024;

/// Held user locks; released on drop.
#[derive(Debug)]
pub struct Held {
    _guards: Vec<OwnedMutexGuard<()>>,
}

/// Table of per-user mutexes, created on demand.
#[derive(Debug, Default)]
pub struct UserLocks {
    table: Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: UserId) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if table.len() > PRUNE_THRESHOLD {
            // Only the table itself holds unused entries; clones are made
            // under this same std lock, so the count cannot race upwards.
            table.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(table.entry(id).or_default())
    }

    /// Lock one user.
    pub async fn lock(&self, id: UserId) -> Held {
        let guard = self.entry(id).lock_owned().await;
        Held {
            _guards: vec![guard],
        }
    }

    /// Lock two users in ascending id order. Locks once if `a == b`.
    pub async fn lock_pair(&self, a: UserId, b: UserId) -> Held {
        if a == b {
            return self.lock(a).await;
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first_guard = self.entry(first).lock_owned().await;
        let second_guard = self.entry(second).lock_owned().await;
        Held {
            _guards: vec![first_guard, second_guard],
        }
    }

    /// Entries currently in the table (diagnostics).
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
