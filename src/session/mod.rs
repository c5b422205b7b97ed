//! Ingestion sessions.
//!
//! A session is one named, independently controllable subscription to one
//! broker. Its lifecycle:
//!
//! `Initializing → Connecting → Connected ⇄ Reconnecting → Stopped | Failed`
//!
//! - [`SessionManager`] owns the session table and is the only entry point
//!   for starting, stopping and changing sessions.
//! - Each session is driven by a supervised run-loop task that owns the
//!   broker link and the sink pipeline.
//! - [`StatusReporter`] gives read-only views for API consumers.

pub mod config;
pub mod manager;
mod run_loop;
pub mod state;
pub mod status;

pub use config::{PortValue, SessionConfig, SessionRequest};
pub use manager::{SessionManager, StartOutcome};
pub use state::{Session, SessionState};
pub use status::{HealthSummary, SessionView, StatusReporter};
