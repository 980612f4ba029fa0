//! Bounded, priority-aware event queue
//!
//! Producers (one task per IPC connection) call [`EventQueue::put`]
//! concurrently; a single consumer drains with [`EventQueue::get`].
//!
//! Two lanes share one capacity:
//! - Priority lane: ordered by caller priority (0 = highest), then insertion order
//! - Default lane: FIFO
//!
//! `get` always empties the priority lane before touching the default lane.

use crate::events::Event;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Behavior when accepting an event would exceed capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest default-lane entry, then accept
    #[default]
    DropOldest,
    /// Reject the incoming event
    DropNewest,
    /// Suspend the producer until space frees
    Block,
}

/// Point-in-time view of the queue counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub received: u64,
    pub processed: u64,
    pub dropped: u64,
    pub overflow_events: u64,
    pub depth: usize,
    pub priority_depth: usize,
}

struct PriorityEntry {
    priority: u8,
    seq: u64,
    event: Event,
}

// BinaryHeap is a max-heap; invert so the lowest (priority, seq) pops first.
impl Ord for PriorityEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

impl PartialOrd for PriorityEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PriorityEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for PriorityEntry {}

#[derive(Default)]
struct Lanes {
    priority: BinaryHeap<PriorityEntry>,
    default: VecDeque<Event>,
    next_seq: u64,
    closed: bool,
}

impl Lanes {
    fn len(&self) -> usize {
        self.priority.len() + self.default.len()
    }

    fn push(&mut self, event: Event, priority: Option<u8>) {
        match priority {
            Some(priority) => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.priority.push(PriorityEntry {
                    priority,
                    seq,
                    event,
                });
            }
            None => self.default.push_back(event),
        }
    }

    fn pop(&mut self) -> Option<Event> {
        self.priority
            .pop()
            .map(|entry| entry.event)
            .or_else(|| self.default.pop_front())
    }
}

enum Offer {
    Accepted,
    Rejected,
    Full(Event),
}

/// Bounded two-lane event queue
pub struct EventQueue {
    capacity: usize,
    policy: OverflowPolicy,
    lanes: Mutex<Lanes>,
    not_empty: Notify,
    not_full: Notify,
    received: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    overflow_events: AtomicU64,
}

impl EventQueue {
    /// Create a queue holding at most `capacity` events (minimum 1)
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            capacity: capacity.max(1),
            policy,
            lanes: Mutex::new(Lanes::default()),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            received: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            overflow_events: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Enqueue an event; `priority = None` selects the default lane
    ///
    /// Under [`OverflowPolicy::Block`] this suspends until space frees or the
    /// queue is closed. Returns whether the event was accepted.
    pub async fn put(&self, event: Event, priority: Option<u8>) -> bool {
        self.received.fetch_add(1, Ordering::Relaxed);

        let mut pending = event;
        let mut overflow_counted = false;

        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.offer(pending, priority, true) {
                Offer::Accepted => return true,
                Offer::Rejected => return false,
                Offer::Full(event) => {
                    if !overflow_counted {
                        self.overflow_events.fetch_add(1, Ordering::Relaxed);
                        overflow_counted = true;
                        debug!("Event queue full, producer waiting for space");
                    }
                    pending = event;
                    notified.await;
                }
            }
        }
    }

    /// Enqueue without ever suspending
    ///
    /// Identical to [`put`](Self::put) except that a full queue under
    /// [`OverflowPolicy::Block`] rejects the event instead of waiting.
    pub fn try_put(&self, event: Event, priority: Option<u8>) -> bool {
        self.received.fetch_add(1, Ordering::Relaxed);
        match self.offer(event, priority, false) {
            Offer::Accepted => true,
            Offer::Rejected | Offer::Full(_) => false,
        }
    }

    fn offer(&self, event: Event, priority: Option<u8>, may_wait: bool) -> Offer {
        let mut lanes = self.lanes();

        if lanes.closed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Offer::Rejected;
        }

        if lanes.len() < self.capacity {
            lanes.push(event, priority);
            drop(lanes);
            self.not_empty.notify_one();
            return Offer::Accepted;
        }

        match self.policy {
            OverflowPolicy::DropOldest => {
                self.overflow_events.fetch_add(1, Ordering::Relaxed);
                self.dropped.fetch_add(1, Ordering::Relaxed);

                // Eviction only ever considers the default lane.
                if lanes.default.pop_front().is_some() {
                    lanes.push(event, priority);
                    drop(lanes);
                    self.not_empty.notify_one();
                    Offer::Accepted
                } else {
                    warn!("Event queue full of priority events, rejecting incoming event");
                    Offer::Rejected
                }
            }
            OverflowPolicy::DropNewest => {
                self.overflow_events.fetch_add(1, Ordering::Relaxed);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Offer::Rejected
            }
            OverflowPolicy::Block if may_wait => Offer::Full(event),
            OverflowPolicy::Block => {
                self.overflow_events.fetch_add(1, Ordering::Relaxed);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Offer::Rejected
            }
        }
    }

    /// Wait up to `timeout` for the next event
    ///
    /// Returns `None` on timeout, or once the queue is closed and drained.
    pub async fn get(&self, timeout: Duration) -> Option<Event> {
        tokio::time::timeout(timeout, self.recv()).await.ok().flatten()
    }

    /// Wait for the next event without a deadline
    pub async fn recv(&self) -> Option<Event> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut lanes = self.lanes();
                if let Some(event) = lanes.pop() {
                    drop(lanes);
                    self.processed.fetch_add(1, Ordering::Relaxed);
                    self.not_full.notify_one();
                    return Some(event);
                }
                if lanes.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Refuse further events and wake every waiter
    ///
    /// Events already buffered can still be drained.
    pub fn close(&self) {
        self.lanes().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lanes().closed
    }

    pub fn len(&self) -> usize {
        self.lanes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> QueueMetrics {
        let lanes = self.lanes();
        QueueMetrics {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            overflow_events: self.overflow_events.load(Ordering::Relaxed),
            depth: lanes.len(),
            priority_depth: lanes.priority.len(),
        }
    }

    fn lanes(&self) -> MutexGuard<'_, Lanes> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
