//! The `transport` module is the HTTP control surface of the ingestion core.
//!
//! It defines the JSON request and response bodies and the axum routes that
//! forward them to the [`SessionManager`](crate::session::SessionManager).
//! Connection level failures never show up here as raw errors; callers poll
//! session status instead.

pub mod http;
pub mod message;

pub use http::{AppState, router, serve};
