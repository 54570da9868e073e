//! Delayed "clear" jobs that follow every alert.
//!
//! Jobs live only in memory and are lost on restart. At most one clear is
//! pending per (code, kind); scheduling again restarts its timer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rift_proto::NotificationKind;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Delay before a ready-check notification is cleared.
pub const READY_CHECK_CLEAR_DELAY: Duration = Duration::from_secs(20);
/// Delay before a game-started notification is cleared.
pub const GAME_STARTED_CLEAR_DELAY: Duration = Duration::from_secs(120);

/// A clear that has come due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearJob {
    pub code: String,
    /// The alert kind this clear follows.
    pub kind: NotificationKind,
}

type PendingKey = (String, NotificationKind);

#[derive(Default)]
struct Pending {
    next_generation: u64,
    jobs: HashMap<PendingKey, (u64, JoinHandle<()>)>,
}

/// Timer queue emitting [`ClearJob`]s on a channel when they come due.
#[derive(Clone)]
pub struct ClearScheduler {
    pending: Arc<Mutex<Pending>>,
    due: mpsc::UnboundedSender<ClearJob>,
}

impl ClearScheduler {
    /// Create a scheduler and the receiver its due jobs arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClearJob>) {
        let (due, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            pending: Arc::default(),
            due,
        };
        (scheduler, rx)
    }

    pub const fn delay_for(kind: NotificationKind) -> Option<Duration> {
        match kind {
            NotificationKind::ReadyCheck => Some(READY_CHECK_CLEAR_DELAY),
            NotificationKind::GameStarted => Some(GAME_STARTED_CLEAR_DELAY),
            NotificationKind::Clear => None,
        }
    }

    /// Schedule the clear that follows a `kind` alert for `code`.
    ///
    /// Replaces a clear already pending for the same code and kind. Returns
    /// `false` for kinds that are not followed by a clear.
    pub fn schedule(&self, code: &str, kind: NotificationKind) -> bool {
        let Some(delay) = Self::delay_for(kind) else {
            return false;
        };

        let key: PendingKey = (code.to_string(), kind);
        let mut pending = self.lock();
        pending.next_generation += 1;
        let generation = pending.next_generation;

        let task = {
            let pending = Arc::clone(&self.pending);
            let due = self.due.clone();
            let key = key.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;

                if let Some(job) = fire(&pending, key, generation) {
                    let _ = due.send(job);
                }
            })
        };

        if let Some((_, previous)) = pending.jobs.insert(key, (generation, task)) {
            previous.abort();
            debug!(code = %code, kind = %kind, "Rescheduled pending clear");
        }
        true
    }

    /// Drop every pending clear for `code`. Returns how many were dropped.
    pub fn cancel(&self, code: &str) -> usize {
        let mut pending = self.lock();
        let before = pending.jobs.len();
        pending.jobs.retain(|(job_code, _), (_, task)| {
            if job_code == code {
                task.abort();
                false
            } else {
                true
            }
        });
        before - pending.jobs.len()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().jobs.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Claim the job for `key` if `generation` is still the pending one.
///
/// A timer past its sleep can no longer be aborted, so a job replaced or
/// cancelled in the meantime is caught here and yields nothing.
fn fire(pending: &Mutex<Pending>, key: PendingKey, generation: u64) -> Option<ClearJob> {
    let mut pending = pending.lock().unwrap_or_else(PoisonError::into_inner);
    if !pending.jobs.get(&key).is_some_and(|(g, _)| *g == generation) {
        return None;
    }
    pending.jobs.remove(&key);
    let (code, kind) = key;
    Some(ClearJob { code, kind })
}
