//! The supervised per-session task.
//!
//! One `RunLoop` owns one session's broker link, its command receiver and its
//! sink pipeline. It connects, replays the registered filters, then moves
//! publications into the pipeline until the link drops, in which case it
//! backs off and starts over. It exits on cancellation (`Stopped`), on an
//! authentication failure or when a configured retry cap runs out (`Failed`).
//!
//! No lock is held across an await; session status is updated through the
//! short critical sections on [`Session`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{Command, Session, SessionState};
use crate::connection::{Backoff, BrokerEndpoint, BrokerLink, Connector, Publication};
use crate::sink::SinkPipeline;
use crate::utils::LinkError;
use crate::utils::logging::preview;

const PREVIEW_CHARS: usize = 100;

enum Exit {
    Cancelled,
    Failed(String),
}

enum Served {
    Cancelled,
    Lost(LinkError),
}

enum Wake {
    Cancelled,
    Command(Command),
    Publication(Result<Publication, LinkError>),
}

pub(crate) struct RunLoop {
    pub session: Arc<Session>,
    pub connector: Arc<dyn Connector>,
    pub endpoint: BrokerEndpoint,
    pub backoff: Backoff,
    pub pipeline: SinkPipeline,
    pub commands: mpsc::Receiver<Command>,
    pub cancel: CancellationToken,
    pub drain_timeout: Duration,
}

impl RunLoop {
    /// The session turns terminal only after its sinks drained.
    pub async fn run(mut self) {
        let exit = self.supervise().await;

        let session = Arc::clone(&self.session);
        self.pipeline.shutdown(self.drain_timeout).await;

        match exit {
            Exit::Cancelled => session.set_state(SessionState::Stopped),
            Exit::Failed(reason) => session.fail(reason),
        }
        session.mark_finished();
        debug!(session = %session.id, "Run-loop finished");
    }

    async fn supervise(&mut self) -> Exit {
        let cancel = self.cancel.clone();
        // Consecutive failures since the last successful connect.
        let mut failures: u32 = 0;

        self.session.set_state(SessionState::Connecting);

        loop {
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Exit::Cancelled,
                opened = self.connector.open(&self.endpoint) => opened,
            };

            let err = match opened {
                Ok(link) => match self.serve(link, &mut failures).await {
                    Served::Cancelled => return Exit::Cancelled,
                    Served::Lost(err) => err,
                },
                Err(err) => err,
            };
            if err.is_terminal() {
                return Exit::Failed(err.to_string());
            }

            if self.backoff.exhausted(failures) {
                return Exit::Failed(format!("gave up after {failures} reconnect attempts: {err}"));
            }
            failures += 1;

            let attempts = self.session.begin_retry(&err);
            let delay = self.backoff.delay(failures);
            warn!(
                session = %self.session.id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Broker connection lost, retrying"
            );

            if !self.wait(delay, &cancel).await {
                return Exit::Cancelled;
            }
        }
    }

    /// Sleep out a backoff delay. Topic commands that arrive meanwhile are
    /// already reflected in the registry, which the next connect replays.
    async fn wait(&mut self, delay: Duration, cancel: &CancellationToken) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = &mut sleep => return true,
                Some(command) = self.commands.recv() => {
                    debug!(session = %self.session.id, ?command, "Deferred until reconnected");
                }
            }
        }
    }

    async fn serve(&mut self, mut link: Box<dyn BrokerLink>, failures: &mut u32) -> Served {
        let cancel = self.cancel.clone();
        let mut active: HashSet<String> = HashSet::new();

        for (filter, qos) in self.session.topic_entries() {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = link.subscribe(&filter, qos) => Some(result),
            };
            match result {
                None => {
                    link.close().await;
                    return Served::Cancelled;
                }
                Some(Ok(())) => {
                    active.insert(filter);
                }
                Some(Err(err @ LinkError::Rejected { .. })) => {
                    warn!(session = %self.session.id, %filter, error = %err, "Subscription rejected");
                    self.session.reject_filter(&filter, &err);
                }
                Some(Err(err)) => return Served::Lost(err),
            }
        }

        let previous = self.session.mark_connected();
        if previous == SessionState::Reconnecting {
            info!(session = %self.session.id, topics = active.len(), "Subscriptions replayed");
        }
        *failures = 0;

        loop {
            let wake = tokio::select! {
                biased;
                _ = cancel.cancelled() => Wake::Cancelled,
                Some(command) = self.commands.recv() => Wake::Command(command),
                next = link.next_publication() => Wake::Publication(next),
            };

            match wake {
                Wake::Cancelled => {
                    link.close().await;
                    return Served::Cancelled;
                }
                Wake::Publication(Ok(publication)) => self.ingest(publication).await,
                Wake::Publication(Err(err)) => return Served::Lost(err),
                Wake::Command(command) => {
                    let applied = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        result = apply(&self.session, link.as_mut(), &mut active, command) => Some(result),
                    };
                    match applied {
                        None => {
                            link.close().await;
                            return Served::Cancelled;
                        }
                        Some(Ok(())) => {}
                        Some(Err(err)) => return Served::Lost(err),
                    }
                }
            }
        }
    }

    async fn ingest(&mut self, publication: Publication) {
        let message = self.session.record(publication);
        debug!(
            session = %self.session.id,
            topic = %message.topic,
            sequence = message.sequence_number,
            payload = %preview(&message.payload, PREVIEW_CHARS),
            "Received message"
        );
        self.pipeline.deliver(Arc::new(message)).await;
    }
}

/// Bring the live link in line with one topic change. `active` tracks what
/// this link is subscribed to, so commands that the replay already covered
/// are skipped. Only a transport failure is returned as an error.
async fn apply(
    session: &Session,
    link: &mut dyn BrokerLink,
    active: &mut HashSet<String>,
    command: Command,
) -> Result<(), LinkError> {
    match command {
        Command::Subscribe { filter, qos } => {
            if active.contains(&filter) {
                return Ok(());
            }
            match link.subscribe(&filter, qos).await {
                Ok(()) => {
                    info!(session = %session.id, %filter, "Subscribed");
                    active.insert(filter);
                    Ok(())
                }
                Err(err @ LinkError::Rejected { .. }) => {
                    warn!(session = %session.id, %filter, error = %err, "Subscription rejected");
                    session.reject_filter(&filter, &err);
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }
        Command::Unsubscribe { filter } => {
            if !active.remove(&filter) {
                return Ok(());
            }
            match link.unsubscribe(&filter).await {
                Ok(()) => {
                    info!(session = %session.id, %filter, "Unsubscribed");
                    Ok(())
                }
                Err(err @ LinkError::Rejected { .. }) => {
                    warn!(session = %session.id, %filter, error = %err, "Unsubscribe refused");
                    session.set_last_error(err.to_string());
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }
    }
}
