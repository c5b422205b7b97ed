//! Broker connections.
//!
//! A [`Connector`] opens [`BrokerLink`]s; a link is one live connection to one
//! broker. The session run-loop owns the reconnect policy ([`Backoff`]) and
//! replays subscriptions, so links themselves never reconnect.

pub mod backoff;
pub mod endpoint;
pub mod link;
pub mod mqtt;

#[cfg(test)]
pub(crate) mod scripted;

pub use backoff::Backoff;
pub use endpoint::BrokerEndpoint;
pub use link::{BrokerLink, Connector, Publication};
pub use mqtt::MqttConnector;
