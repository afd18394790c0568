//! # Event Filter
//!
//! Read-only pattern matched against messages: a message passes when it
//! carries every (name, value) pair of the filter. No wildcards, no ranges.

use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Exact-match property filter for subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventFilter {
    properties: BTreeMap<String, String>,
}

impl EventFilter {
    /// Create an empty filter (matches everything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required property. Empty names or values are ignored.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) -> &mut Self {
        let name = name.as_ref();
        let value = value.into();
        if !name.is_empty() && !value.is_empty() {
            self.properties.insert(name.to_owned(), value);
        }
        self
    }

    #[must_use]
    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    #[must_use]
    pub fn get(&self, name: impl AsRef<str>) -> Option<&str> {
        self.properties.get(name.as_ref()).map(String::as_str)
    }

    /// Check if a message matches this filter.
    #[must_use]
    pub fn matches(&self, message: &Message) -> bool {
        message.contains_all(self)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for EventFilter {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut filter = Self::new();
        for (name, value) in iter {
            filter.set(name, value);
        }
        filter
    }
}
