//! # Subscription Keys
//!
//! A [`SubscriptionKey`] names one (topic, subscription) pair. Keys compare and
//! hash by value and are ordered so that a [`DiscoveredSubscriptionSet`] iterates
//! the same way for the same registry state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Immutable (topic, subscription) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    topic_name: String,
    subscription_name: String,
}

impl SubscriptionKey {
    pub fn new(topic_name: impl Into<String>, subscription_name: impl Into<String>) -> Self {
        Self {
            topic_name: topic_name.into(),
            subscription_name: subscription_name.into(),
        }
    }

    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    pub fn subscription_name(&self) -> &str {
        &self.subscription_name
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic_name, self.subscription_name)
    }
}

impl<T: Into<String>, S: Into<String>> From<(T, S)> for SubscriptionKey {
    fn from((topic, subscription): (T, S)) -> Self {
        Self::new(topic, subscription)
    }
}

/// Distinct keys produced by one discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredSubscriptionSet {
    keys: BTreeSet<SubscriptionKey>,
}

impl DiscoveredSubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key, returning false when it was already present
    pub fn insert(&mut self, key: SubscriptionKey) -> bool {
        self.keys.insert(key)
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubscriptionKey> {
        self.keys.iter()
    }
}

impl Extend<SubscriptionKey> for DiscoveredSubscriptionSet {
    fn extend<I: IntoIterator<Item = SubscriptionKey>>(&mut self, iter: I) {
        self.keys.extend(iter);
    }
}

impl FromIterator<SubscriptionKey> for DiscoveredSubscriptionSet {
    fn from_iter<I: IntoIterator<Item = SubscriptionKey>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for DiscoveredSubscriptionSet {
    type Item = SubscriptionKey;
    type IntoIter = std::collections::btree_set::IntoIter<SubscriptionKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.into_iter()
    }
}

impl<'a> IntoIterator for &'a DiscoveredSubscriptionSet {
    type Item = &'a SubscriptionKey;
    type IntoIter = std::collections::btree_set::Iter<'a, SubscriptionKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_keys_compare_by_value() {
        let a = SubscriptionKey::new("orders", "sub-a");
        let b: SubscriptionKey = ("orders", "sub-a").into();
        assert_eq!(a, b);

        let mut hashed = HashSet::new();
        hashed.insert(a);
        assert!(!hashed.insert(b));
    }

    #[test]
    fn test_set_collapses_duplicates() {
        let set: DiscoveredSubscriptionSet = vec![
            SubscriptionKey::new("orders", "sub-a"),
            SubscriptionKey::new("invoices", "sub-b"),
            SubscriptionKey::new("orders", "sub-a"),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.len(), 2);
        // BTreeSet ordering: invoices before orders
        let topics: Vec<&str> = set.iter().map(|k| k.topic_name()).collect();
        assert_eq!(topics, vec!["invoices", "orders"]);
    }

    #[test]
    fn test_display() {
        assert_eq!(SubscriptionKey::new("orders", "sub-a").to_string(), "orders/sub-a");
    }
}
