//! In-process expiry timers for group tips and match offers.
//!
//! Each entity gets one tokio task that sleeps until its deadline and then
//! hands the idempotent expiry job to a fresh task. Rescheduling aborts the
//! previous timer; an abort never reaches a job that already started, so an
//! in-flight transaction is never cancelled.
//!
//! Timers live in this process only. Deadlines are persisted on the rows, and
//! the recovery scan plus the periodic sweep cover restarts and missed timers.

use crate::game::MatchId;
use crate::group_tip::GroupTipId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

/// Entity a timer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpiryKey {
    GroupTip(GroupTipId),
    Match(MatchId),
}

impl std::fmt::Display for ExpiryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpiryKey::GroupTip(id) => write!(f, "group tip {id}"),
            ExpiryKey::Match(id) => write!(f, "match {id}"),
        }
    }
}

struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

type TimerMap = HashMap<ExpiryKey, Timer>;

/// Per-entity expiry timers
#[derive(Clone, Default)]
pub struct ExpiryScheduler {
    timers: Arc<Mutex<TimerMap>>,
    next_generation: Arc<AtomicU64>,
}

fn lock(timers: &Mutex<TimerMap>) -> MutexGuard<'_, TimerMap> {
    // A panicked holder cannot leave the map half-updated
    timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ExpiryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` at `at`, replacing any timer already set for `key`
    ///
    /// A deadline in the past fires immediately.
    pub fn schedule<F, Fut>(&self, key: ExpiryKey, at: DateTime<Utc>, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let delay = (at - Utc::now()).to_std().unwrap_or_default();
        let timers = Arc::clone(&self.timers);

        // Held until the new timer is in the map, so it cannot fire unregistered
        let mut map = lock(&self.timers);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut map = lock(&timers);
                let current = map.get(&key).map(|t| t.generation);
                if current == Some(generation) {
                    map.remove(&key);
                }
            }
            log::debug!("Expiry timer fired for {key}");
            tokio::spawn(job());
        });

        let previous = map.insert(key, Timer { generation, handle });
        drop(map);
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }

    /// Forget the timer for `key`; returns whether one was pending
    pub fn cancel(&self, key: ExpiryKey) -> bool {
        match lock(&self.timers).remove(&key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, key: ExpiryKey) -> bool {
        lock(&self.timers).contains_key(&key)
    }

    /// Number of timers still waiting
    pub fn pending(&self) -> usize {
        lock(&self.timers).len()
    }

    /// Abort every waiting timer
    pub fn shutdown(&self) {
        let drained: Vec<Timer> = lock(&self.timers).drain().map(|(_, t)| t).collect();
        for timer in drained {
            timer.handle.abort();
        }
    }
}
