use super::registry::{SubscriptionRegistry, qos_from_u8, qos_to_u8};
use rumqttc::QoS;

#[test]
fn test_registry_new() {
    let registry = SubscriptionRegistry::new();
    assert!(registry.is_empty());
    assert!(registry.list().is_empty());
}

#[test]
fn test_registry_add() {
    let mut registry = SubscriptionRegistry::new();
    assert!(registry.add("cam/01", QoS::AtLeastOnce));
    assert!(registry.contains("cam/01"));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_registry_duplicate_add_is_noop() {
    let mut registry = SubscriptionRegistry::new();
    assert!(registry.add("cam/01", QoS::AtMostOnce));
    assert!(!registry.add("cam/01", QoS::ExactlyOnce));

    // The original QoS is kept.
    assert_eq!(registry.entries(), vec![("cam/01".to_string(), QoS::AtMostOnce)]);
}

#[test]
fn test_registry_remove() {
    let mut registry = SubscriptionRegistry::new();
    registry.add("cam/01", QoS::AtMostOnce);
    assert!(registry.remove("cam/01"));
    assert!(!registry.remove("cam/01"));
    assert!(!registry.contains("cam/01"));
}

#[test]
fn test_registry_accepts_wildcards_and_malformed_filters() {
    let mut registry = SubscriptionRegistry::new();
    assert!(registry.add("cam/+/status", QoS::AtMostOnce));
    assert!(registry.add("cam/#", QoS::AtMostOnce));
    // Validation is left to the broker.
    assert!(registry.add("cam/#/broken", QoS::AtMostOnce));
    assert_eq!(
        registry.list(),
        vec!["cam/#", "cam/#/broken", "cam/+/status"]
    );
}

#[test]
fn test_qos_conversions() {
    assert_eq!(qos_from_u8(0), Some(QoS::AtMostOnce));
    assert_eq!(qos_from_u8(2), Some(QoS::ExactlyOnce));
    assert_eq!(qos_from_u8(3), None);
    assert_eq!(qos_to_u8(QoS::AtLeastOnce), 1);
}
