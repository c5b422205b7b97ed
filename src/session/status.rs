use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use super::state::{Session, SessionState};
use crate::sink::SinkKind;

/// Read-only copy of one session's status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: String,
    pub state: SessionState,
    pub broker: String,
    pub topics: Vec<String>,
    pub sinks: Vec<SinkKind>,
    pub last_error: Option<String>,
    pub message_count: u64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub reconnect_attempts: u32,
    pub dropped_messages: u64,
    pub sink_errors: u64,
}

impl Session {
    pub fn view(&self) -> SessionView {
        let status = self.lock();
        SessionView {
            session_id: self.id.clone(),
            state: status.state,
            broker: self.broker.clone(),
            topics: status.registry.list(),
            sinks: self.config.sinks.clone(),
            last_error: status.last_error.clone(),
            message_count: status.message_count,
            last_message_at: status.last_message_at,
            created_at: self.created_at,
            reconnect_attempts: status.reconnect_attempts,
            dropped_messages: self.counters.dropped(),
            sink_errors: self.counters.errors(),
        }
    }
}

/// Session counts for liveness checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSummary {
    pub status: &'static str,
    pub sessions: usize,
    pub states: BTreeMap<SessionState, usize>,
}

/// Aggregates per-session status for API consumers. It only reads the
/// session table, one session lock at a time.
#[derive(Clone)]
pub struct StatusReporter {
    sessions: Arc<DashMap<String, Arc<Session>>>,
}

impl StatusReporter {
    pub(crate) fn new(sessions: Arc<DashMap<String, Arc<Session>>>) -> Self {
        Self { sessions }
    }

    pub fn snapshot(&self) -> BTreeMap<String, SessionView> {
        // Clone the handles first so no table shard stays locked while the
        // session locks are taken.
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        sessions
            .into_iter()
            .map(|session| (session.id.clone(), session.view()))
            .collect()
    }

    pub fn health(&self) -> HealthSummary {
        let snapshot = self.snapshot();
        let mut states = BTreeMap::new();
        for view in snapshot.values() {
            *states.entry(view.state).or_insert(0) += 1;
        }
        HealthSummary {
            status: "ok",
            sessions: snapshot.len(),
            states,
        }
    }
}
