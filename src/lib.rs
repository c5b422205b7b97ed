//! # mqtt-ingest
//!
//! `mqtt-ingest` is a supervised, multi-session MQTT ingestion core built with
//! Rust and tokio. Callers start named sessions against MQTT brokers; each
//! session keeps its own connection, reconnects with backoff, replays its
//! subscriptions and fans every received message out to a set of sinks.
//!
//! ## Core Modules
//!
//! - `session`: The central component. Starts, supervises and stops sessions and
//!   reports their status.
//! - `connection`: Broker links (`rumqttc`), endpoints and the reconnect policy.
//! - `subscription`: The per-session topic filter registry.
//! - `sink`: The delivery pipeline and the in-memory, append-log and push sinks.
//! - `persistence`: The `sled` backed external-store sink.
//! - `message`: The ingested message type.
//! - `config`: Loads server, logging and ingestion settings.
//! - `transport`: The HTTP control surface.
//! - `utils`: Error types and logging helpers.

pub mod config;
pub mod connection;
pub mod message;
pub mod persistence;
pub mod session;
pub mod sink;
pub mod subscription;
pub mod transport;
pub mod utils;
