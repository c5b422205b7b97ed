use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use rumqttc::QoS;
use tokio::sync::{OnceCell, broadcast, mpsc};
use tracing::{info, warn};

use super::config::{SessionConfig, SessionRequest};
use super::run_loop::RunLoop;
use super::state::{Command, Session};
use super::status::{SessionView, StatusReporter};
use crate::config::IngestSettings;
use crate::connection::{Backoff, Connector, MqttConnector};
use crate::message::Message;
use crate::persistence::MessageStore;
use crate::sink::{
    AppendLog, MessageBuffer, MessagePage, PipelineCounters, PushChannel, Sink, SinkKind,
    SinkPipeline,
};
use crate::utils::IngestError;

const COMMAND_CAPACITY: usize = 64;

/// Result of a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub session_id: String,
    /// `false` when an identical live session already existed.
    pub created: bool,
}

/// Sinks opened for a session that has not been spawned yet.
struct SessionSinks {
    buffer: Arc<MessageBuffer>,
    push: Option<PushChannel>,
    all: Vec<Arc<dyn Sink>>,
}

/// Creates, supervises and stops ingestion sessions.
///
/// Each session runs as its own tokio task (the run-loop) and is tracked in a
/// sharded table keyed by session id. The manager is cheap to share behind an
/// `Arc`; every operation only locks the table entry and the session it
/// touches, so concurrent callers working on different sessions never wait on
/// each other.
///
/// Starting the same session id twice never opens a second connection: the
/// table entry is claimed before the run-loop is spawned.
pub struct SessionManager {
    sessions: Arc<DashMap<String, Arc<Session>>>,
    connector: Arc<dyn Connector>,
    settings: IngestSettings,
    store: OnceCell<MessageStore>,
}

impl SessionManager {
    /// Creates a manager that connects to real brokers with `rumqttc`.
    pub fn new(settings: IngestSettings) -> Self {
        let connector = Arc::new(MqttConnector::from_settings(&settings));
        Self::with_connector(settings, connector)
    }

    /// Creates a manager with a custom connector.
    /// Tests use this to script broker behaviour.
    pub fn with_connector(settings: IngestSettings, connector: Arc<dyn Connector>) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            connector,
            settings,
            store: OnceCell::new(),
        }
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    /// Validates the request and starts a session for it.
    ///
    /// If a live session with the same id already exists, an identical
    /// request returns it (`created == false`) and a different one is a
    /// `Conflict`. A terminal (`Failed` or `Stopped`) session with the same
    /// id is replaced.
    pub async fn start_session(&self, request: &SessionRequest) -> Result<StartOutcome, IngestError> {
        let config = request.validate()?;
        let id = config.session_id.clone();

        if let Some(existing) = self.get(&id) {
            if existing.is_live() {
                return same_session(&existing, &config);
            }
        }

        // Opening sinks may touch the filesystem, so it happens before the
        // table entry is claimed. A request that loses the race below only
        // drops what it opened.
        let sinks = self.open_sinks(&config).await?;

        let session = match self.sessions.entry(id.clone()) {
            Entry::Occupied(entry) if entry.get().is_live() => {
                return same_session(entry.get(), &config);
            }
            Entry::Occupied(mut entry) => {
                let session = self.spawn(config, sinks);
                entry.insert(Arc::clone(&session));
                session
            }
            Entry::Vacant(entry) => {
                let session = self.spawn(config, sinks);
                entry.insert(Arc::clone(&session));
                session
            }
        };

        info!(
            session = %session.id,
            broker = %session.broker,
            topics = ?session.config.topics,
            "Session started"
        );
        Ok(StartOutcome {
            session_id: id,
            created: true,
        })
    }

    async fn open_sinks(&self, config: &SessionConfig) -> Result<SessionSinks, IngestError> {
        let buffer = Arc::new(MessageBuffer::new(self.settings.buffer_capacity));
        let mut push = None;
        let mut all: Vec<Arc<dyn Sink>> = Vec::new();

        for kind in &config.sinks {
            match kind {
                SinkKind::BoundedBuffer => all.push(buffer.clone()),
                SinkKind::PushChannel => {
                    let channel = PushChannel::new(self.settings.buffer_capacity);
                    all.push(Arc::new(channel.clone()));
                    push = Some(channel);
                }
                SinkKind::AppendLog => {
                    let log = AppendLog::open(
                        &self.settings.log_dir,
                        &config.session_id,
                        self.settings.flush_policy,
                        self.settings.flush_interval(),
                    )
                    .await?;
                    all.push(Arc::new(log));
                }
                SinkKind::ExternalStore => {
                    let store = self
                        .store
                        .get_or_try_init(|| async {
                            MessageStore::open(
                                &self.settings.store_path,
                                self.settings.store_max_messages,
                            )
                        })
                        .await?;
                    all.push(Arc::new(store.sink_for(&config.session_id)?));
                }
            }
        }

        Ok(SessionSinks { buffer, push, all })
    }

    /// Builds the session and spawns its run-loop. Must not await: it runs
    /// while the table entry is held.
    fn spawn(&self, config: SessionConfig, sinks: SessionSinks) -> Arc<Session> {
        let endpoint = config.endpoint(std::time::Duration::from_secs(self.settings.keep_alive_secs));
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let counters = Arc::new(PipelineCounters::default());

        let session = Arc::new(Session::new(
            config,
            endpoint.address(),
            commands_tx,
            sinks.buffer,
            sinks.push,
            Arc::clone(&counters),
        ));
        let pipeline = SinkPipeline::new(&session.id, sinks.all, &self.settings, counters);

        let run_loop = RunLoop {
            session: Arc::clone(&session),
            connector: Arc::clone(&self.connector),
            endpoint,
            backoff: Backoff::from_settings(&self.settings),
            pipeline,
            commands: commands_rx,
            cancel: session.cancel.clone(),
            drain_timeout: self.settings.drain_timeout(),
        };
        let handle = tokio::spawn(run_loop.run());
        *session
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);

        session
    }

    /// Stops a session and waits until its connection is closed and its
    /// sinks have drained. Concurrent calls for the same id all wait for the
    /// same run-loop to finish; afterwards the id is unknown.
    pub async fn stop_session(&self, session_id: &str) -> Result<(), IngestError> {
        let session = self
            .get(session_id)
            .ok_or_else(|| IngestError::NotFound(session_id.to_string()))?;

        session.cancel.cancel();
        match session.take_task() {
            Some(handle) => {
                if let Err(err) = handle.await {
                    warn!(session = %session_id, error = %err, "Run-loop ended abnormally");
                }
                // A panicked run-loop never got to mark itself.
                session.mark_finished();
            }
            None => session.finished().await,
        }

        self.sessions
            .remove_if(session_id, |_, current| Arc::ptr_eq(current, &session));
        info!(session = %session_id, "Session stopped");
        Ok(())
    }

    pub fn status(&self, session_id: &str) -> Result<SessionView, IngestError> {
        Ok(self.session(session_id)?.view())
    }

    /// Buffered messages with a sequence number above `since` (all of them
    /// without `since`), oldest first, plus a gap marker when some of the
    /// requested ones were already evicted.
    pub fn list_messages(&self, session_id: &str, since: Option<u64>) -> Result<MessagePage, IngestError> {
        Ok(self.session(session_id)?.buffer.since(since.unwrap_or(0)))
    }

    /// Adds a topic filter to a connected or reconnecting session.
    /// Returns `false` when the filter was already registered.
    pub async fn add_topic(&self, session_id: &str, filter: &str, qos: QoS) -> Result<bool, IngestError> {
        let session = self.session(session_id)?;
        if !session.add_topic(filter, qos)? {
            return Ok(false);
        }
        self.forward(
            &session,
            Command::Subscribe {
                filter: filter.to_string(),
                qos,
            },
        )
        .await;
        Ok(true)
    }

    /// Removes a topic filter. Returns `false` when it was not registered.
    pub async fn remove_topic(&self, session_id: &str, filter: &str) -> Result<bool, IngestError> {
        let session = self.session(session_id)?;
        if !session.remove_topic(filter)? {
            return Ok(false);
        }
        self.forward(
            &session,
            Command::Unsubscribe {
                filter: filter.to_string(),
            },
        )
        .await;
        Ok(true)
    }

    pub fn topics(&self, session_id: &str) -> Result<Vec<String>, IngestError> {
        Ok(self.session(session_id)?.topics())
    }

    /// Live feed of the session's messages. Only sessions started with a
    /// push channel sink have one.
    pub fn subscribe_push(&self, session_id: &str) -> Result<broadcast::Receiver<Arc<Message>>, IngestError> {
        let session = self.session(session_id)?;
        session.push.as_ref().map(PushChannel::subscribe).ok_or_else(|| {
            IngestError::Config(format!("session {session_id} has no push-channel sink"))
        })
    }

    pub fn reporter(&self) -> StatusReporter {
        StatusReporter::new(Arc::clone(&self.sessions))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stops every session concurrently. Used on process exit.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        if ids.is_empty() {
            return;
        }
        info!(sessions = ids.len(), "Stopping all sessions");
        let stops = ids.iter().map(|id| self.stop_session(id));
        for result in join_all(stops).await {
            if let Err(err) = result {
                warn!(error = %err, "Session already gone during shutdown");
            }
        }
    }

    async fn forward(&self, session: &Session, command: Command) {
        if session.commands.send(command).await.is_err() {
            warn!(session = %session.id, "Run-loop is gone, topic change only recorded");
        }
    }

    fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn session(&self, session_id: &str) -> Result<Arc<Session>, IngestError> {
        self.get(session_id)
            .ok_or_else(|| IngestError::NotFound(session_id.to_string()))
    }
}

fn same_session(existing: &Session, config: &SessionConfig) -> Result<StartOutcome, IngestError> {
    if existing.config == *config {
        Ok(StartOutcome {
            session_id: existing.id.clone(),
            created: false,
        })
    } else {
        Err(IngestError::Conflict(existing.id.clone()))
    }
}
