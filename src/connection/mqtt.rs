//! `rumqttc` backed broker links
//!
//! `rumqttc` is driven by polling its `EventLoop`. Each link spawns a driver
//! task that polls it and forwards publications, acks and the eventual loss of
//! the connection over a bounded channel; the session run-loop only ever reads
//! that channel. The driver stops at the first connection error instead of
//! letting `rumqttc` reconnect on its own, because reconnect timing and
//! subscription replay belong to the session.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, SubscribeReasonCode, Transport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::endpoint::BrokerEndpoint;
use super::link::{BrokerLink, Connector, Publication};
use crate::config::IngestSettings;
use crate::utils::LinkError;

/// rumqttc refuses keep-alive intervals below this.
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct MqttConnector {
    connect_timeout: Duration,
    request_capacity: usize,
    event_capacity: usize,
}

impl MqttConnector {
    pub fn new(connect_timeout: Duration, event_capacity: usize) -> Self {
        Self {
            connect_timeout,
            request_capacity: 64,
            event_capacity: event_capacity.max(1),
        }
    }

    pub fn from_settings(settings: &IngestSettings) -> Self {
        Self::new(settings.connect_timeout(), settings.event_channel_capacity)
    }
}

impl Default for MqttConnector {
    fn default() -> Self {
        Self::from_settings(&IngestSettings::default())
    }
}

/// Build the `rumqttc` options for an endpoint.
pub fn mqtt_options(endpoint: &BrokerEndpoint) -> MqttOptions {
    let mut options = MqttOptions::new(
        endpoint.client_id.clone(),
        endpoint.host.clone(),
        endpoint.port,
    );
    options.set_keep_alive(endpoint.keep_alive.max(MIN_KEEP_ALIVE));
    options.set_clean_session(true);

    if let Some((username, password)) = endpoint.credentials() {
        options.set_credentials(username, password);
    }

    if endpoint.tls {
        options.set_transport(Transport::Tls(Default::default()));
    }

    options
}

#[async_trait]
impl Connector for MqttConnector {
    async fn open(&self, endpoint: &BrokerEndpoint) -> Result<Box<dyn BrokerLink>, LinkError> {
        let (client, mut eventloop) = AsyncClient::new(mqtt_options(endpoint), self.request_capacity);

        match tokio::time::timeout(self.connect_timeout, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(LinkError::Transport(format!(
                    "connect to {} timed out after {:?}",
                    endpoint.address(),
                    self.connect_timeout
                )));
            }
        }

        info!(broker = %endpoint.address(), client_id = %endpoint.client_id, "Connected to broker");

        let (tx, rx) = mpsc::channel(self.event_capacity);
        let driver = tokio::spawn(drive(eventloop, tx));

        Ok(Box::new(MqttLink {
            client,
            events: rx,
            pending: VecDeque::new(),
            driver,
        }))
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), LinkError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(refusal(code)),
                };
            }
            Ok(_) => continue,
            Err(e) => return Err(classify(e)),
        }
    }
}

/// Map a CONNACK refusal onto the retry taxonomy: credential problems are
/// terminal, everything else is worth another attempt.
pub fn refusal(code: ConnectReturnCode) -> LinkError {
    match code {
        ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => {
            LinkError::Auth(format!("connection refused: {code:?}"))
        }
        other => LinkError::Transport(format!("connection refused: {other:?}")),
    }
}

fn classify(err: ConnectionError) -> LinkError {
    match err {
        ConnectionError::ConnectionRefused(code) => refusal(code),
        other => LinkError::Transport(other.to_string()),
    }
}

#[derive(Debug)]
enum DriverEvent {
    Publish(Publication),
    SubAck(Vec<SubscribeReasonCode>),
    UnsubAck,
    Lost(LinkError),
}

async fn drive(mut eventloop: EventLoop, events: mpsc::Sender<DriverEvent>) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => DriverEvent::Publish(Publication {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
                qos: publish.qos,
                retain: publish.retain,
            }),
            Ok(Event::Incoming(Packet::SubAck(ack))) => DriverEvent::SubAck(ack.return_codes),
            Ok(Event::Incoming(Packet::UnsubAck(_))) => DriverEvent::UnsubAck,
            Ok(Event::Incoming(Packet::Disconnect)) => {
                DriverEvent::Lost(LinkError::Transport("broker sent DISCONNECT".to_string()))
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("Client disconnect sent, stopping driver");
                break;
            }
            Ok(_) => continue,
            Err(e) => DriverEvent::Lost(classify(e)),
        };

        let lost = matches!(event, DriverEvent::Lost(_));
        if events.send(event).await.is_err() || lost {
            break;
        }
    }
}

struct MqttLink {
    client: AsyncClient,
    events: mpsc::Receiver<DriverEvent>,
    /// Publications that arrived while waiting for an ack.
    pending: VecDeque<Publication>,
    driver: JoinHandle<()>,
}

impl MqttLink {
    fn request_failed(&self, filter: &str, err: rumqttc::ClientError) -> LinkError {
        // The client also refuses filters it considers invalid; only a dead
        // driver means the connection is gone.
        if self.driver.is_finished() {
            LinkError::Transport(format!("connection closed: {err}"))
        } else {
            LinkError::Rejected {
                filter: filter.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), LinkError> {
        if let Err(e) = self.client.subscribe(filter, qos).await {
            return Err(self.request_failed(filter, e));
        }

        loop {
            match self.events.recv().await {
                Some(DriverEvent::Publish(p)) => self.pending.push_back(p),
                Some(DriverEvent::SubAck(codes)) => {
                    return match codes.first() {
                        Some(SubscribeReasonCode::Success(_)) => Ok(()),
                        _ => Err(LinkError::Rejected {
                            filter: filter.to_string(),
                            reason: "broker returned failure".to_string(),
                        }),
                    };
                }
                Some(DriverEvent::UnsubAck) => continue,
                Some(DriverEvent::Lost(e)) => return Err(e),
                None => return Err(LinkError::Transport("connection driver stopped".to_string())),
            }
        }
    }

    async fn unsubscribe(&mut self, filter: &str) -> Result<(), LinkError> {
        if let Err(e) = self.client.unsubscribe(filter).await {
            return Err(self.request_failed(filter, e));
        }

        loop {
            match self.events.recv().await {
                Some(DriverEvent::Publish(p)) => self.pending.push_back(p),
                Some(DriverEvent::UnsubAck) => return Ok(()),
                Some(DriverEvent::SubAck(_)) => continue,
                Some(DriverEvent::Lost(e)) => return Err(e),
                None => return Err(LinkError::Transport("connection driver stopped".to_string())),
            }
        }
    }

    async fn next_publication(&mut self) -> Result<Publication, LinkError> {
        if let Some(p) = self.pending.pop_front() {
            return Ok(p);
        }

        loop {
            match self.events.recv().await {
                Some(DriverEvent::Publish(p)) => return Ok(p),
                Some(DriverEvent::SubAck(_)) | Some(DriverEvent::UnsubAck) => continue,
                Some(DriverEvent::Lost(e)) => return Err(e),
                None => return Err(LinkError::Transport("connection driver stopped".to_string())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "Disconnect request not delivered");
        }
        if tokio::time::timeout(Duration::from_secs(1), &mut self.driver)
            .await
            .is_err()
        {
            warn!("Connection driver did not stop in time, aborting it");
            self.driver.abort();
        }
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
