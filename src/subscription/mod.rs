//! Per-session topic filter bookkeeping.
//!
//! The registry is the source of truth for what a session should be
//! subscribed to; the run-loop replays it on every (re)connect.

pub mod registry;

pub use registry::{SubscriptionRegistry, TopicFilter, qos_from_u8, qos_to_u8};

#[cfg(test)]
mod tests;
