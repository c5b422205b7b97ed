use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::config::OverflowPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest entry.
    DroppedOldest,
    /// The queue was full and the new entry was refused.
    DroppedNewest,
    Closed,
}

impl PushOutcome {
    pub fn dropped(self) -> bool {
        matches!(self, PushOutcome::DroppedOldest | PushOutcome::DroppedNewest)
    }
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded single-consumer queue between the run-loop and a slow sink.
///
/// `push` never waits: when the queue is full the overflow policy decides
/// which message is lost. The consumer side drains whatever is left after
/// `close` and then sees `None`.
#[derive(Debug)]
pub struct HandoffQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Notify,
    capacity: usize,
    policy: OverflowPolicy,
}

impl<T> HandoffQueue<T> {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(4096)),
                closed: false,
            }),
            ready: Notify::new(),
            capacity,
            policy,
        }
    }

    pub fn push(&self, item: T) -> PushOutcome {
        let outcome = {
            let mut state = self.lock();
            if state.closed {
                return PushOutcome::Closed;
            }
            if state.items.len() < self.capacity {
                state.items.push_back(item);
                PushOutcome::Queued
            } else {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        state.items.pop_front();
                        state.items.push_back(item);
                        PushOutcome::DroppedOldest
                    }
                    OverflowPolicy::DropNewest => PushOutcome::DroppedNewest,
                }
            }
        };
        if outcome != PushOutcome::DroppedNewest {
            self.ready.notify_one();
        }
        outcome
    }

    /// Wait for the next item. `None` once the queue is closed and empty.
    ///
    /// Cancel safe: an item is only removed when this returns it.
    pub async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            self.ready.notified().await;
        }
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_one();
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState<T>> {
        // A panic while holding this lock cannot leave the deque half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
