//! The `error` module defines the error types used across the ingestion core.
//!
//! Errors are split by the layer that produces them:
//!
//! - [`IngestError`] is what callers of the session manager see. Configuration
//!   problems are reported before any network activity. Broker failures never
//!   show up here: they land in the session's state and last error.
//! - [`LinkError`] comes out of the broker connection. Only `Auth` is terminal;
//!   `Transport` is retried with backoff and `Rejected` is attached to the
//!   session as its last error.
//! - [`SinkError`] is local to one sink. The pipeline counts and logs it and
//!   never lets it reach the session or other sinks.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Missing or invalid session parameters.
    #[error("invalid session config: {0}")]
    Config(String),

    #[error("session not found: {0}")]
    NotFound(String),

    /// A live session with the same id exists and was started with a
    /// different configuration.
    #[error("session {0} already exists with a different configuration")]
    Conflict(String),

    #[error("session {id} is {state}; topics can only change while connected or reconnecting")]
    InvalidState { id: String, state: String },

    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    /// The broker refused the credentials. Never retried.
    #[error("broker rejected credentials: {0}")]
    Auth(String),

    /// Network level failure, timeout or broker initiated disconnect.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The broker refused a single subscription.
    #[error("subscription to '{filter}' rejected: {reason}")]
    Rejected { filter: String, reason: String },
}

impl LinkError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkError::Auth(_))
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    #[error("sink write timed out after {0:?}")]
    Timeout(Duration),
}
