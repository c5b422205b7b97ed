//! The `persistence` module provides the external-store sink.
//!
//! Messages are kept in `sled`, an embedded key-value store, so a session's
//! recent history outlives the in-memory buffer and the process itself.

pub mod sled_store;

pub use sled_store::{MessageStore, StoreSink, StoredMessage};

#[cfg(test)]
mod tests;
