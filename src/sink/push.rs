use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{Sink, SinkKind};
use crate::message::Message;
use crate::utils::SinkError;

/// Fire-and-forget fan-out to live listeners (UI sockets and the like).
///
/// Backed by a broadcast channel: a listener that falls behind by more than
/// the channel capacity loses the oldest messages and sees `Lagged`. Having
/// no listener at all is normal.
#[derive(Debug, Clone)]
pub struct PushChannel {
    sender: broadcast::Sender<Arc<Message>>,
}

impl PushChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Message>> {
        self.sender.subscribe()
    }

    pub fn listeners(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl Sink for PushChannel {
    fn name(&self) -> &str {
        "push"
    }

    fn kind(&self) -> SinkKind {
        SinkKind::PushChannel
    }

    fn may_block(&self) -> bool {
        false
    }

    async fn write(&self, message: Arc<Message>) -> Result<(), SinkError> {
        // Err only means nobody is listening right now.
        let _ = self.sender.send(message);
        Ok(())
    }
}
