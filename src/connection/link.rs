use async_trait::async_trait;
use rumqttc::QoS;

use super::endpoint::BrokerEndpoint;
use crate::utils::LinkError;

/// One publication as the broker delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl Publication {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }
}

/// Opens broker links. Each successful `open` is one live connection.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect and wait for the broker's CONNACK. A credential rejection must
    /// come back as [`LinkError::Auth`] so the caller does not retry it.
    async fn open(&self, endpoint: &BrokerEndpoint) -> Result<Box<dyn BrokerLink>, LinkError>;
}

/// A single established connection.
///
/// Methods take `&mut self`: one link is driven by exactly one session
/// run-loop, so calls never overlap.
#[async_trait]
pub trait BrokerLink: Send {
    /// Subscribe and wait for the SUBACK. Publications that arrive while
    /// waiting are kept and returned by later `next_publication` calls, in
    /// order.
    async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), LinkError>;

    async fn unsubscribe(&mut self, filter: &str) -> Result<(), LinkError>;

    /// Next publication in broker delivery order. An error means the link is
    /// gone and must be reopened.
    ///
    /// Must be cancel safe: the run-loop polls it inside `select!`.
    async fn next_publication(&mut self) -> Result<Publication, LinkError>;

    /// Disconnect politely. Dropping a link without closing it must still
    /// release the connection.
    async fn close(&mut self);
}
