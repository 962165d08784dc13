use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;
use uuid::Uuid;

/// One logical timer slot. Claim expiry is per room; bot decisions are
/// per bot so a bot can never have two pending timers of the same kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKind {
    ClaimExpiry,
    BotFlip(Uuid),
    BotClaim(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub room: String,
    pub kind: TimerKind,
}

impl TimerKey {
    pub fn claim_expiry(room: &str) -> Self {
        TimerKey {
            room: room.to_string(),
            kind: TimerKind::ClaimExpiry,
        }
    }

    pub fn bot_flip(room: &str, bot_id: Uuid) -> Self {
        TimerKey {
            room: room.to_string(),
            kind: TimerKind::BotFlip(bot_id),
        }
    }

    pub fn bot_claim(room: &str, bot_id: Uuid) -> Self {
        TimerKey {
            room: room.to_string(),
            kind: TimerKind::BotClaim(bot_id),
        }
    }
}

/// Delivered on the timer channel when a scheduled delay elapses.
/// Dispatched against the registry like any inbound client event.
#[derive(Debug, Clone)]
pub enum TimerEvent {
    ClaimExpiry {
        room: String,
        window_id: Uuid,
    },
    BotFlip {
        room: String,
        bot_id: Uuid,
    },
    BotClaim {
        room: String,
        bot_id: Uuid,
        claim_id: Option<Uuid>,
    },
}

struct PendingTimer {
    token: Uuid,
    abort: AbortHandle,
}

/// Scheduler facade: the domain stores no runtime handles, it schedules
/// and cancels by key. A fired timer removes its own slot before
/// emitting the event, so cancellation after firing is a no-op and a
/// cancelled timer never emits.
#[derive(Clone)]
pub struct Timers {
    tx: UnboundedSender<TimerEvent>,
    pending: Arc<Mutex<HashMap<TimerKey, PendingTimer>>>,
}

impl Timers {
    pub fn new(tx: UnboundedSender<TimerEvent>) -> Self {
        Timers {
            tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedules `event` after `delay`, replacing (and cancelling) any
    /// timer already pending under `key`.
    pub fn schedule(&self, key: TimerKey, delay: Duration, event: TimerEvent) {
        let mut pending = self.pending.lock();
        let timer = self.spawn_timer(key.clone(), delay, event);
        if let Some(old) = pending.insert(key, timer) {
            old.abort.abort();
        }
    }

    /// Schedules only when nothing is pending under `key`. Returns
    /// whether a new timer was created.
    pub fn schedule_if_idle(&self, key: TimerKey, delay: Duration, event: TimerEvent) -> bool {
        let mut pending = self.pending.lock();
        if pending.contains_key(&key) {
            return false;
        }
        let timer = self.spawn_timer(key.clone(), delay, event);
        pending.insert(key, timer);
        true
    }

    pub fn cancel(&self, key: &TimerKey) {
        if let Some(timer) = self.pending.lock().remove(key) {
            timer.abort.abort();
        }
    }

    /// Cancels every outstanding timer for a room: the claim expiry and
    /// all of that room's bot timers. Mandatory on room teardown.
    pub fn cancel_room(&self, room: &str) {
        self.pending.lock().retain(|key, timer| {
            if key.room == room {
                timer.abort.abort();
                false
            } else {
                true
            }
        });
    }

    pub fn is_pending(&self, key: &TimerKey) -> bool {
        self.pending.lock().contains_key(key)
    }

    fn spawn_timer(&self, key: TimerKey, delay: Duration, event: TimerEvent) -> PendingTimer {
        let token = Uuid::new_v4();
        let tx = self.tx.clone();
        let pending = Arc::clone(&self.pending);
        // Anchor the deadline at schedule time, not at the task's first
        // poll, so the delay is measured from the `schedule` call.
        let deadline = tokio::time::Instant::now() + delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut map = pending.lock();
                match map.get(&key) {
                    // Only the timer that still owns the slot may fire.
                    Some(p) if p.token == token => {
                        map.remove(&key);
                    }
                    _ => return,
                }
            }
            let _ = tx.send(event);
        });
        PendingTimer {
            token,
            abort: handle.abort_handle(),
        }
    }
}
