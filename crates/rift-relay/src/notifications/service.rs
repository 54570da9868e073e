//! Entry point the relay sockets and HTTP routes use for notifications.
//!
//! Broadcasts run on background tasks, one lane per code. A lane drains its
//! queue in submit order, so a clear never overtakes the alert it follows,
//! while a slow gateway call for one code leaves other codes unaffected.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use rift_proto::{NotificationKind, Payload, Platform};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::storage::{DatabaseError, RelayDatabase};

use super::{ClearJob, ClearScheduler, NotificationDispatcher};

/// Result of subscribing a device to a code's notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Subscribed,
    /// The device never registered a push token.
    UnknownDevice,
}

/// A broadcast waiting in its code's lane.
struct Broadcast {
    kind: NotificationKind,
    context: Option<Payload>,
}

/// Per-code FIFO queues in front of the dispatcher.
///
/// A lane task exists only while its queue is non-empty. Senders are only
/// reachable through the map, so a lane that finds its queue empty under the
/// lock can retire without losing work.
#[derive(Clone)]
struct Lanes {
    dispatcher: Arc<NotificationDispatcher>,
    queues: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Broadcast>>>>,
}

impl Lanes {
    fn new(dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self {
            dispatcher,
            queues: Arc::default(),
        }
    }

    fn push(&self, code: &str, kind: NotificationKind, context: Option<Payload>) {
        let mut queues = self.lock();
        let queue = queues.entry(code.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(self.clone().drain(code.to_string(), rx));
            tx
        });
        // The lane holds its receiver until it removes this entry.
        let _ = queue.send(Broadcast { kind, context });
    }

    async fn drain(self, code: String, mut rx: mpsc::UnboundedReceiver<Broadcast>) {
        loop {
            let Ok(job) = rx.try_recv() else {
                let mut queues = self.lock();
                if rx.is_empty() {
                    queues.remove(&code);
                    return;
                }
                continue;
            };

            if let Err(e) = self
                .dispatcher
                .broadcast(&code, job.kind, job.context.as_ref())
                .await
            {
                warn!(code = %code, kind = %job.kind, error = %e, "Broadcast failed");
            }
        }
    }

    fn active(&self) -> usize {
        self.lock().len()
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<Broadcast>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Dispatcher plus the clear scheduler, shared across the relay.
pub struct NotificationService {
    db: RelayDatabase,
    lanes: Lanes,
    scheduler: ClearScheduler,
}

impl NotificationService {
    /// Create the service and spawn the worker that broadcasts due clears.
    pub fn start(db: RelayDatabase, dispatcher: NotificationDispatcher) -> Self {
        let lanes = Lanes::new(Arc::new(dispatcher));
        let (scheduler, due) = ClearScheduler::new();
        tokio::spawn(run_clear_worker(lanes.clone(), due));

        Self {
            db,
            lanes,
            scheduler,
        }
    }

    /// Fire a notification for `code` in the background.
    ///
    /// Alerts schedule their follow-up clear. A clear replaces any clear
    /// still pending for the code. Broadcasts for one code reach the gateway
    /// in the order they were sent.
    pub fn send(&self, code: &str, kind: NotificationKind, context: Option<Payload>) {
        if kind == NotificationKind::Clear {
            let dropped = self.scheduler.cancel(code);
            debug!(code = %code, dropped, "Clearing notifications");
        } else {
            self.scheduler.schedule(code, kind);
        }

        self.lanes.push(code, kind, context);
    }

    /// Subscribe `device_id` to `kinds` for `code`, using the push token the
    /// device last registered.
    ///
    /// `platform` overrides the registered platform when given.
    #[instrument(skip(self, kinds), fields(code = %code, device_id = %device_id))]
    pub async fn subscribe(
        &self,
        code: &str,
        device_id: &str,
        platform: Option<Platform>,
        kinds: &[NotificationKind],
    ) -> Result<SubscribeOutcome, DatabaseError> {
        let Some(device) = self.db.device(device_id).await? else {
            warn!("Subscription for unregistered device ignored");
            return Ok(SubscribeOutcome::UnknownDevice);
        };

        let platform = platform.unwrap_or(device.platform);
        for &kind in kinds {
            self.db
                .upsert_push_token(code, device_id, platform, kind, Some(&device.token))
                .await?;
        }

        info!(platform = %platform, kinds = kinds.len(), "Device subscribed");
        Ok(SubscribeOutcome::Subscribed)
    }

    pub fn pending_clears(&self) -> usize {
        self.scheduler.pending_count()
    }

    /// Codes with broadcasts still queued or in flight.
    pub fn active_lanes(&self) -> usize {
        self.lanes.active()
    }
}

async fn run_clear_worker(lanes: Lanes, mut due: mpsc::UnboundedReceiver<ClearJob>) {
    while let Some(job) = due.recv().await {
        debug!(code = %job.code, after = %job.kind, "Scheduled clear due");
        lanes.push(&job.code, NotificationKind::Clear, None);
    }
}
