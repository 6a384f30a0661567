//! Subscription registry and packet identifiers.

use crate::types::QoS;

/// Topic filters the client has subscribed to, in subscription order.
///
/// Filters are unique. The registry survives reconnects: after every
/// accepted CONNACK each entry is sent again as its own SUBSCRIBE.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    entries: Vec<(String, QoS)>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.entries.iter().any(|(t, _)| t == topic)
    }

    /// Record a filter. Returns false if it was already present.
    pub fn insert(&mut self, topic: &str, qos: QoS) -> bool {
        if self.contains(topic) {
            return false;
        }
        self.entries.push((topic.to_string(), qos));
        true
    }

    /// Forget a filter. Returns false if it was not present.
    pub fn remove(&mut self, topic: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(t, _)| t != topic);
        self.entries.len() != before
    }

    /// Topic filters in subscription order.
    pub fn topics(&self) -> Vec<String> {
        self.entries.iter().map(|(t, _)| t.clone()).collect()
    }

    /// Filters with their requested QoS, in subscription order.
    pub fn entries(&self) -> Vec<(String, QoS)> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 16-bit packet identifier counter. Identifier 0 is never handed out.
#[derive(Debug, Clone)]
pub struct PacketIds {
    next: u16,
}

impl Default for PacketIds {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl PacketIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> u16 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        if self.next == 0 {
            self.next = 1;
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_is_a_set() {
        let mut registry = SubscriptionRegistry::new();
        assert!(registry.insert("a/b", QoS::AtMostOnce));
        assert!(registry.insert("c/#", QoS::AtLeastOnce));
        assert!(!registry.insert("a/b", QoS::ExactlyOnce));

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.entries(),
            vec![
                ("a/b".to_string(), QoS::AtMostOnce),
                ("c/#".to_string(), QoS::AtLeastOnce)
            ]
        );

        assert!(registry.remove("a/b"));
        assert!(!registry.remove("a/b"));
        assert_eq!(registry.topics(), vec!["c/#".to_string()]);
    }

    #[test]
    fn test_packet_ids_skip_zero() {
        let mut ids = PacketIds::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);

        let mut ids = PacketIds { next: u16::MAX };
        assert_eq!(ids.next_id(), u16::MAX);
        assert_eq!(ids.next_id(), 1);
    }
}
