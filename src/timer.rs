//! Deferred command execution
//!
//! "in five minutes turn off the lights" parks the action here; on
//! expiry the action text is re-injected into the dispatcher as a
//! `TimerFired` event. Timers live in memory only and do not survive a
//! pipeline restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::{PipelineEvent, TimerId};

/// Schedules and cancels deferred actions
#[derive(Clone)]
pub struct TimerService {
    events: mpsc::Sender<PipelineEvent>,
    active: Arc<Mutex<HashMap<TimerId, JoinHandle<()>>>>,
    next_id: Arc<AtomicU64>,
}

impl TimerService {
    /// Create a service that re-injects fired actions into `events`
    #[must_use]
    pub fn new(events: mpsc::Sender<PipelineEvent>) -> Self {
        Self {
            events,
            active: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Schedule `action` to fire after `delay`
    pub fn schedule(&self, delay: Duration, action: impl Into<String>) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let action = action.into();
        let events = self.events.clone();
        let active = Arc::clone(&self.active);

        tracing::info!(id, delay_secs = delay.as_secs(), action, "scheduled timer");

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            if let Ok(mut map) = active.lock() {
                map.remove(&id);
            }

            if events
                .send(PipelineEvent::TimerFired { id, action })
                .await
                .is_err()
            {
                tracing::warn!(id, "timer fired after dispatcher shut down");
            }
        });

        if let Ok(mut map) = self.active.lock() {
            map.insert(id, handle);
        }
        id
    }

    /// Abort every outstanding timer
    pub fn cancel_all(&self) {
        if let Ok(mut map) = self.active.lock() {
            let count = map.len();
            for (_, handle) in map.drain() {
                handle.abort();
            }
            if count > 0 {
                tracing::info!(count, "cancelled outstanding timers");
            }
        }
    }

    /// Number of timers currently pending
    #[must_use]
    pub fn pending(&self) -> usize {
        self.active.lock().map_or(0, |map| map.len())
    }
}
