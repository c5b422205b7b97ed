use std::time::Duration;

use rumqttc::QoS;
use serde::Deserialize;
use uuid::Uuid;

use crate::connection::BrokerEndpoint;
use crate::sink::SinkKind;
use crate::subscription::qos_from_u8;
use crate::utils::IngestError;

const MAX_SESSION_ID_LEN: usize = 128;

/// Ports arrive as JSON numbers from most callers and as strings from form
/// posts.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PortValue {
    Number(i64),
    Text(String),
}

/// A start request as the caller sent it. Nothing is checked yet; see
/// [`SessionRequest::validate`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub host: Option<String>,
    pub port: Option<PortValue>,
    #[serde(alias = "topic_name", alias = "topic")]
    pub topic_name: Option<String>,
    pub topics: Option<Vec<String>>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(alias = "session_id")]
    pub session_id: Option<String>,
    pub tls: Option<bool>,
    pub qos: Option<u8>,
    #[serde(alias = "client_id")]
    pub client_id: Option<String>,
    pub sinks: Option<Vec<SinkKind>>,
}

/// A validated session configuration.
///
/// Two start requests are "the same session" when their configs compare
/// equal, so everything that changes what the session does lives here.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub session_id: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    /// Caller supplied client id. Sessions without one get a generated id
    /// that is not part of the comparison.
    pub client_id: Option<String>,
    pub topics: Vec<String>,
    pub qos: QoS,
    pub sinks: Vec<SinkKind>,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl SessionRequest {
    /// Check the request and fill in defaults. Fails before any network
    /// activity when host, port or topic is missing or malformed.
    pub fn validate(&self) -> Result<SessionConfig, IngestError> {
        let host = non_empty(self.host.as_ref())
            .ok_or_else(|| IngestError::Config("host is required".to_string()))?;
        let port = parse_port(self.port.as_ref())?;
        let topics = self.collect_topics()?;

        let qos = match self.qos {
            Some(level) => qos_from_u8(level)
                .ok_or_else(|| IngestError::Config(format!("qos must be 0, 1 or 2, got {level}")))?,
            None => QoS::AtMostOnce,
        };

        let session_id = match &self.session_id {
            Some(id) => {
                let id = id.trim();
                if id.is_empty() {
                    return Err(IngestError::Config("sessionId must not be empty".to_string()));
                }
                if id.len() > MAX_SESSION_ID_LEN {
                    return Err(IngestError::Config(format!(
                        "sessionId is longer than {MAX_SESSION_ID_LEN} characters"
                    )));
                }
                id.to_string()
            }
            None => Uuid::new_v4().to_string(),
        };

        Ok(SessionConfig {
            session_id,
            host,
            port,
            username: non_empty(self.username.as_ref()),
            password: self.password.clone().filter(|p| !p.is_empty()),
            tls: self.tls.unwrap_or(false),
            client_id: non_empty(self.client_id.as_ref()),
            topics,
            qos,
            sinks: normalize_sinks(self.sinks.as_deref()),
        })
    }

    fn collect_topics(&self) -> Result<Vec<String>, IngestError> {
        let mut topics: Vec<String> = Vec::new();
        let listed = self.topics.iter().flatten();
        for topic in self.topic_name.iter().chain(listed) {
            let topic = topic.trim();
            if !topic.is_empty() && !topics.iter().any(|t| t == topic) {
                topics.push(topic.to_string());
            }
        }
        if topics.is_empty() {
            return Err(IngestError::Config("topic is required".to_string()));
        }
        Ok(topics)
    }
}

fn parse_port(port: Option<&PortValue>) -> Result<u16, IngestError> {
    let raw = match port {
        None => return Err(IngestError::Config("port is required".to_string())),
        Some(PortValue::Number(n)) => *n,
        Some(PortValue::Text(text)) => text
            .trim()
            .parse::<i64>()
            .map_err(|_| IngestError::Config(format!("port '{text}' is not a number")))?,
    };
    match u16::try_from(raw) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(IngestError::Config(format!("port {raw} is out of range"))),
    }
}

/// The memory buffer backs message polling, so it is always attached.
/// Without an explicit list a session also gets a push channel.
fn normalize_sinks(requested: Option<&[SinkKind]>) -> Vec<SinkKind> {
    let requested = requested.unwrap_or(&[SinkKind::PushChannel]);
    let mut sinks = vec![SinkKind::BoundedBuffer];
    for kind in requested {
        if !sinks.contains(kind) {
            sinks.push(*kind);
        }
    }
    sinks
}

impl SessionConfig {
    pub fn has_sink(&self, kind: SinkKind) -> bool {
        self.sinks.contains(&kind)
    }

    pub fn endpoint(&self, keep_alive: Duration) -> BrokerEndpoint {
        let client_id = self.client_id.clone().unwrap_or_else(generated_client_id);
        BrokerEndpoint::new(self.host.clone(), self.port, client_id)
            .with_credentials(self.username.clone(), self.password.clone())
            .with_tls(self.tls)
            .with_keep_alive(keep_alive)
    }
}

fn generated_client_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("ingest-{}", &id[..16])
}
