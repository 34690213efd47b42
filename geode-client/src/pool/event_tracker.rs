//! Duplicate detection for subscription events.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use geode_core::protocol::EventId;

#[derive(Debug, Clone, Copy)]
struct Sequence {
    last: i64,
    seen_at: Instant,
}

/// Remembers the highest sequence id seen per `(member, thread)` so an event
/// delivered by more than one queue is applied once.
#[derive(Debug)]
pub struct EventTracker {
    threads: Mutex<HashMap<(Vec<u8>, i64), Sequence>>,
    pending_acks: Mutex<Vec<EventId>>,
    tracking_timeout: Duration,
}

impl EventTracker {
    /// Creates a tracker forgetting a thread after `tracking_timeout`
    /// without events.
    pub fn new(tracking_timeout: Duration) -> Self {
        Self {
            threads: Mutex::new(HashMap::new()),
            pending_acks: Mutex::new(Vec::new()),
            tracking_timeout,
        }
    }

    /// Records `id`; returns false if it was already seen.
    pub fn track(&self, id: &EventId) -> bool {
        let now = Instant::now();
        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        let key = (id.member_id.clone(), id.thread_id);
        match threads.get_mut(&key) {
            Some(sequence) if sequence.last >= id.sequence_id => {
                sequence.seen_at = now;
                tracing::trace!(thread = id.thread_id, sequence = id.sequence_id, "duplicate event");
                false
            }
            Some(sequence) => {
                sequence.last = id.sequence_id;
                sequence.seen_at = now;
                self.queue_ack(id);
                true
            }
            None => {
                threads.insert(
                    key,
                    Sequence {
                        last: id.sequence_id,
                        seen_at: now,
                    },
                );
                self.queue_ack(id);
                true
            }
        }
    }

    fn queue_ack(&self, id: &EventId) {
        self.pending_acks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(id.clone());
    }

    /// Takes the ids delivered since the last call.
    pub fn take_pending_acks(&self) -> Vec<EventId> {
        std::mem::take(&mut *self.pending_acks.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Forgets threads idle for longer than the tracking timeout.
    pub fn expire(&self) -> usize {
        let now = Instant::now();
        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        let before = threads.len();
        threads.retain(|_, s| now.duration_since(s.seen_at) < self.tracking_timeout);
        before - threads.len()
    }

    /// Returns the number of tracked threads.
    pub fn len(&self) -> usize {
        self.threads.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Returns true if no thread is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
