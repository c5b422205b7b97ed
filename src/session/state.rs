use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rumqttc::QoS;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::config::SessionConfig;
use crate::connection::Publication;
use crate::message::Message;
use crate::sink::{MessageBuffer, PipelineCounters, PushChannel};
use crate::subscription::{SubscriptionRegistry, qos_to_u8};
use crate::utils::{IngestError, LinkError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SessionState {
    Initializing,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed)
    }

    pub fn accepts_topic_changes(self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Reconnecting)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Initializing => "Initializing",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Reconnecting => "Reconnecting",
            SessionState::Stopped => "Stopped",
            SessionState::Failed => "Failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topic changes forwarded from the manager to the session's run-loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Subscribe { filter: String, qos: QoS },
    Unsubscribe { filter: String },
}

/// Everything about a session that changes while it runs. Kept behind one
/// lock so a status read sees a consistent picture.
#[derive(Debug)]
pub(crate) struct SessionStatus {
    pub state: SessionState,
    pub registry: SubscriptionRegistry,
    pub last_error: Option<String>,
    pub message_count: u64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    next_sequence: u64,
}

/// One named ingestion session, shared between the manager's table and the
/// session's run-loop.
pub struct Session {
    pub id: String,
    pub config: SessionConfig,
    pub broker: String,
    pub created_at: DateTime<Utc>,
    pub(crate) status: Mutex<SessionStatus>,
    pub(crate) commands: mpsc::Sender<Command>,
    pub(crate) cancel: CancellationToken,
    pub(crate) task: Mutex<Option<JoinHandle<()>>>,
    /// Flips to `true` once the run-loop has closed its link and drained its
    /// sinks.
    finished: watch::Sender<bool>,
    pub(crate) buffer: Arc<MessageBuffer>,
    pub(crate) push: Option<PushChannel>,
    pub(crate) counters: Arc<PipelineCounters>,
}

impl Session {
    pub(crate) fn new(
        config: SessionConfig,
        broker: String,
        commands: mpsc::Sender<Command>,
        buffer: Arc<MessageBuffer>,
        push: Option<PushChannel>,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        let mut registry = SubscriptionRegistry::new();
        for topic in &config.topics {
            registry.add(topic, config.qos);
        }

        Self {
            id: config.session_id.clone(),
            config,
            broker,
            created_at: Utc::now(),
            status: Mutex::new(SessionStatus {
                state: SessionState::Initializing,
                registry,
                last_error: None,
                message_count: 0,
                last_message_at: None,
                reconnect_attempts: 0,
                next_sequence: 1,
            }),
            commands,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            finished: watch::Sender::new(false),
            buffer,
            push,
            counters,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionStatus> {
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Terminal sessions may be replaced by a new start with the same id.
    pub fn is_live(&self) -> bool {
        !self.state().is_terminal()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut self.lock().state, state);
        if previous != state {
            info!(session = %self.id, from = %previous, to = %state, "Session state changed");
        }
    }

    /// Enter `Connected` after the subscriptions were replayed. Returns the
    /// state it came from.
    pub(crate) fn mark_connected(&self) -> SessionState {
        let previous = {
            let mut status = self.lock();
            std::mem::replace(&mut status.state, SessionState::Connected)
        };
        info!(session = %self.id, from = %previous, broker = %self.broker, "Session connected");
        previous
    }

    /// A connection attempt failed or the link dropped and another attempt
    /// is scheduled.
    pub(crate) fn begin_retry(&self, err: &LinkError) -> u32 {
        let mut status = self.lock();
        status.state = SessionState::Reconnecting;
        status.last_error = Some(err.to_string());
        status.reconnect_attempts += 1;
        status.reconnect_attempts
    }

    pub(crate) fn fail(&self, reason: String) {
        let previous = {
            let mut status = self.lock();
            status.last_error = Some(reason.clone());
            std::mem::replace(&mut status.state, SessionState::Failed)
        };
        info!(session = %self.id, from = %previous, to = "Failed", error = %reason, "Session failed");
    }

    pub(crate) fn set_last_error(&self, error: String) {
        self.lock().last_error = Some(error);
    }

    /// The broker refused a filter. It is dropped from the registry so it is
    /// not replayed on the next reconnect.
    pub(crate) fn reject_filter(&self, filter: &str, err: &LinkError) {
        let mut status = self.lock();
        status.registry.remove(filter);
        status.last_error = Some(err.to_string());
    }

    /// Stamp a publication with the next sequence number and the receive
    /// time, which also becomes the session's `last_message_at`.
    pub(crate) fn record(&self, publication: Publication) -> Message {
        let received_at = Utc::now();
        let sequence = {
            let mut status = self.lock();
            let sequence = status.next_sequence;
            status.next_sequence += 1;
            status.message_count += 1;
            status.last_message_at = Some(received_at);
            sequence
        };
        Message::new(self.id.clone(), publication.topic, sequence, publication.payload)
            .with_delivery(qos_to_u8(publication.qos), publication.retain)
            .with_received_at(received_at)
    }

    pub fn topics(&self) -> Vec<String> {
        self.lock().registry.list()
    }

    pub(crate) fn topic_entries(&self) -> Vec<(String, QoS)> {
        self.lock().registry.entries()
    }

    /// Registers the filter; the run-loop subscribes on its next turn.
    /// Returns `false` when it was already registered.
    pub(crate) fn add_topic(&self, filter: &str, qos: QoS) -> Result<bool, IngestError> {
        let mut status = self.lock();
        self.check_topic_change(status.state)?;
        Ok(status.registry.add(filter, qos))
    }

    pub(crate) fn remove_topic(&self, filter: &str) -> Result<bool, IngestError> {
        let mut status = self.lock();
        self.check_topic_change(status.state)?;
        Ok(status.registry.remove(filter))
    }

    fn check_topic_change(&self, state: SessionState) -> Result<(), IngestError> {
        if state.accepts_topic_changes() && !self.cancel.is_cancelled() {
            Ok(())
        } else {
            Err(IngestError::InvalidState {
                id: self.id.clone(),
                state: state.to_string(),
            })
        }
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.send_replace(true);
    }

    /// Resolves once the run-loop is done, however many callers wait.
    pub(crate) async fn finished(&self) {
        let mut done = self.finished.subscribe();
        // The sender lives in `self`, so this cannot see a closed channel.
        let _ = done.wait_for(|finished| *finished).await;
    }

    pub(crate) fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}
