use std::collections::BTreeMap;

use rumqttc::QoS;

pub type TopicFilter = String;

/// The topic filters one session is subscribed to, with the QoS requested for
/// each.
///
/// Filters are stored verbatim. Wildcard syntax (`+`, `#`) is the broker's
/// business: a malformed filter is accepted here and rejected at SUBACK time.
/// Duplicate adds are a no-op.
///
/// Concurrency note: callers must synchronize access (the session keeps its
/// registry under the same lock as the rest of its status).
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    filters: BTreeMap<TopicFilter, QoS>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter. Returns `false` without touching anything when the
    /// filter is already present.
    pub fn add(&mut self, filter: &str, qos: QoS) -> bool {
        if self.filters.contains_key(filter) {
            return false;
        }
        self.filters.insert(filter.to_string(), qos);
        true
    }

    /// Remove a filter. Returns whether it was registered.
    pub fn remove(&mut self, filter: &str) -> bool {
        self.filters.remove(filter).is_some()
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.filters.contains_key(filter)
    }

    /// Filter names in lexical order.
    pub fn list(&self) -> Vec<TopicFilter> {
        self.filters.keys().cloned().collect()
    }

    /// Filters with their QoS, in the order they are replayed after a
    /// reconnect.
    pub fn entries(&self) -> Vec<(TopicFilter, QoS)> {
        self.filters
            .iter()
            .map(|(filter, qos)| (filter.clone(), *qos))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Parse a numeric MQTT QoS level.
pub fn qos_from_u8(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

pub fn qos_to_u8(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}
