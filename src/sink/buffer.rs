use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;

use super::{Sink, SinkKind};
use crate::message::Message;
use crate::utils::SinkError;

/// Sequence numbers a poller asked for that are no longer buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Gap {
    pub first_missing: u64,
    pub last_missing: u64,
}

/// One answer to an incremental poll.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Present when messages after the requested sequence were evicted.
    pub gap: Option<Gap>,
    /// Pass this as `since` on the next poll.
    pub next_since: u64,
}

#[derive(Debug, Default)]
struct Ring {
    messages: VecDeque<Arc<Message>>,
    evicted: u64,
}

/// The in-memory bounded buffer sink. Keeps the `capacity` most recent
/// messages of one session and evicts the oldest on overflow.
#[derive(Debug)]
pub struct MessageBuffer {
    capacity: usize,
    ring: Mutex<Ring>,
}

impl MessageBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ring: Mutex::new(Ring::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, message: Arc<Message>) {
        let mut ring = self.lock();
        if ring.messages.len() == self.capacity {
            ring.messages.pop_front();
            ring.evicted += 1;
        }
        ring.messages.push_back(message);
    }

    /// Messages with `sequence_number > since`, oldest first.
    ///
    /// Polling is side-effect free, so a caller may re-poll from any earlier
    /// sequence.
    pub fn since(&self, since: u64) -> MessagePage {
        let ring = self.lock();
        let start = ring
            .messages
            .partition_point(|m| m.sequence_number <= since);
        let messages: Vec<Message> = ring
            .messages
            .iter()
            .skip(start)
            .map(|m| Message::clone(m))
            .collect();

        let gap = ring.messages.front().and_then(|oldest| {
            let first_missing = since + 1;
            (ring.evicted > 0 && first_missing < oldest.sequence_number).then_some(Gap {
                first_missing,
                last_missing: oldest.sequence_number - 1,
            })
        });

        let next_since = messages.last().map_or(since, |m| m.sequence_number);
        MessagePage {
            messages,
            gap,
            next_since,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evicted(&self) -> u64 {
        self.lock().evicted
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Sink for MessageBuffer {
    fn name(&self) -> &str {
        "memory"
    }

    fn kind(&self) -> SinkKind {
        SinkKind::BoundedBuffer
    }

    fn may_block(&self) -> bool {
        false
    }

    async fn write(&self, message: Arc<Message>) -> Result<(), SinkError> {
        self.push(message);
        Ok(())
    }
}
