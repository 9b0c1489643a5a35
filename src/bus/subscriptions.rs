//! Counted topic-prefix subscriptions
//!
//! Used on both ends of the bus: the egress endpoint keeps one set per
//! consumer to filter frames, and producers keep one fed by the intents the
//! proxy forwards upstream.

use std::collections::HashMap;

use bytes::Bytes;

use crate::protocol::{Action, SubscriptionIntent};

/// Multiset of topic prefixes
///
/// Subscribing to the same prefix twice needs two unsubscribes before the
/// prefix stops matching.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSet {
    prefixes: HashMap<Bytes, usize>,
}

impl SubscriptionSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one reference to `prefix`
    pub fn subscribe(&mut self, prefix: Bytes) {
        *self.prefixes.entry(prefix).or_insert(0) += 1;
    }

    /// Drop one reference to `prefix`
    ///
    /// Returns false if the prefix was not held.
    pub fn unsubscribe(&mut self, prefix: &Bytes) -> bool {
        match self.prefixes.get_mut(prefix) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.prefixes.remove(prefix);
                true
            }
            None => false,
        }
    }

    /// Apply a decoded intent
    ///
    /// Returns false for an unsubscribe of a prefix that was not held.
    pub fn apply(&mut self, intent: &SubscriptionIntent) -> bool {
        match intent.action {
            Action::Subscribe => {
                self.subscribe(intent.prefix.clone());
                true
            }
            Action::Unsubscribe => self.unsubscribe(&intent.prefix),
        }
    }

    /// Whether `topic` starts with any held prefix
    pub fn matches(&self, topic: &[u8]) -> bool {
        self.prefixes
            .keys()
            .any(|prefix| topic.starts_with(prefix))
    }

    /// Reference count held for `prefix`
    pub fn count(&self, prefix: &[u8]) -> usize {
        self.prefixes.get(prefix).copied().unwrap_or(0)
    }

    /// Whether nothing is subscribed
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Number of distinct prefixes
    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    /// Every held subscription, repeated by its reference count
    pub fn held(&self) -> impl Iterator<Item = &Bytes> + '_ {
        self.prefixes
            .iter()
            .flat_map(|(prefix, &count)| std::iter::repeat(prefix).take(count))
    }

    /// Remove everything, returning one entry per held subscription
    pub fn drain(&mut self) -> Vec<Bytes> {
        let held = self.held().cloned().collect();
        self.prefixes.clear();
        held
    }
}
