use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sled::{Db, Tree};
use tracing::debug;

use crate::message::Message;
use crate::sink::{Sink, SinkKind};
use crate::utils::SinkError;

/// A message as read back from the store.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub session_id: String,
    pub topic: String,
    pub sequence_number: u64,
    pub received_at: DateTime<Utc>,
    pub qos: u8,
    pub retain: bool,
    pub format: String,
    pub payload: serde_json::Value,
}

/// Embedded store shared by all sessions. Each session gets its own tree
/// keyed by the big-endian sequence number, so iteration order is sequence
/// order.
#[derive(Clone)]
pub struct MessageStore {
    db: Db,
    max_messages_per_session: Option<usize>,
}

impl MessageStore {
    pub fn open(path: impl AsRef<Path>, max_messages_per_session: Option<usize>) -> Result<Self, SinkError> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            max_messages_per_session,
        })
    }

    fn tree(&self, session_id: &str) -> Result<Tree, SinkError> {
        Ok(self.db.open_tree(format!("session:{session_id}"))?)
    }

    /// Sink writing into this session's tree.
    ///
    /// Sequence numbers restart with every run of a session, so the first
    /// write of the new sink clears whatever a previous run with the same id
    /// left behind. A sink that never writes leaves the tree untouched.
    pub fn sink_for(&self, session_id: &str) -> Result<StoreSink, SinkError> {
        Ok(StoreSink {
            db: self.db.clone(),
            tree: Arc::new(SessionTree {
                session_id: session_id.to_string(),
                tree: self.tree(session_id)?,
                max_messages: self.max_messages_per_session,
                fresh: AtomicBool::new(true),
            }),
        })
    }

    pub fn load_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>, SinkError> {
        let tree = self.tree(session_id)?;
        let mut messages = Vec::new();
        for entry in tree.iter() {
            let (_, value) = entry?;
            messages.push(serde_json::from_slice(&value)?);
        }
        Ok(messages)
    }
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("db", &"sled::Db")
            .field("max_messages_per_session", &self.max_messages_per_session)
            .finish()
    }
}

/// The external-store sink of one session.
///
/// `sled` calls block the calling thread, so writes run on tokio's blocking
/// pool. A write abandoned by the pipeline's timeout still finishes there;
/// keys are sequence numbers, so a late insert cannot reorder the tree.
pub struct StoreSink {
    db: Db,
    tree: Arc<SessionTree>,
}

struct SessionTree {
    session_id: String,
    tree: Tree,
    max_messages: Option<usize>,
    fresh: AtomicBool,
}

impl SessionTree {
    fn insert(&self, message: &Message) -> Result<(), SinkError> {
        if self.fresh.swap(false, Ordering::Relaxed) && !self.tree.is_empty() {
            debug!(session = %self.session_id, "Clearing stored messages of previous run");
            self.tree.clear()?;
        }

        let value = serde_json::to_vec(message)?;
        let seq = message.sequence_number;
        self.tree.insert(seq.to_be_bytes(), value)?;

        if let Some(max) = self.max_messages {
            // Keep the newest `max` sequence numbers.
            let keep_from = seq.saturating_sub(max as u64) + 1;
            for key in self.tree.range(..keep_from.to_be_bytes()).keys() {
                self.tree.remove(key?)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for StoreSink {
    fn name(&self) -> &str {
        "store"
    }

    fn kind(&self) -> SinkKind {
        SinkKind::ExternalStore
    }

    fn may_block(&self) -> bool {
        true
    }

    async fn write(&self, message: Arc<Message>) -> Result<(), SinkError> {
        let tree = Arc::clone(&self.tree);
        tokio::task::spawn_blocking(move || tree.insert(&message))
            .await
            .map_err(|err| SinkError::Io(std::io::Error::other(err)))?
    }

    async fn flush(&self) -> Result<(), SinkError> {
        self.db.flush_async().await?;
        Ok(())
    }
}
