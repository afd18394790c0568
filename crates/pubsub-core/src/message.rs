//! # Messages
//!
//! A message is a flat string-to-string property bag. Loose typing is
//! intentional: the bus may be distributed, and flat properties marshal in
//! O(n) without any cross-process type compatibility concerns.
//!
//! Domain specific messages are plain constructor functions that set the
//! properties they need and, when the event is sensitive, attach an
//! [`AccessControlled`] association.

use crate::error::BusError;
use crate::filter::EventFilter;
use crate::permission::AccessControlled;
use crate::props::EventProps;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// One event flowing through the bus.
#[derive(Clone, Default)]
pub struct Message {
    properties: BTreeMap<String, String>,
    access: Option<Arc<dyn AccessControlled>>,
}

impl Message {
    /// Create a message with the default properties (timestamp and UUID).
    #[must_use]
    pub fn new() -> Self {
        let mut message = Self::bare();
        message.set(EventProps::EventTimestamp, current_millis().to_string());
        message.set(EventProps::EventUuid, Uuid::new_v4().to_string());
        message
    }

    /// Create a message without any properties.
    #[must_use]
    pub fn bare() -> Self {
        Self::default()
    }

    /// Build a message from an existing property map. Entries with an empty
    /// name or value are dropped, as with [`Message::set`].
    #[must_use]
    pub fn from_properties(mut properties: BTreeMap<String, String>) -> Self {
        properties.retain(|name, value| !name.is_empty() && !value.is_empty());
        Self {
            properties,
            access: None,
        }
    }

    /// Set a property. Empty names or values are ignored.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) -> &mut Self {
        let name = name.as_ref();
        let value = value.into();
        if !name.is_empty() && !value.is_empty() {
            self.properties.insert(name.to_owned(), value);
        }
        self
    }

    /// Builder form of [`Message::set`].
    #[must_use]
    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    #[must_use]
    pub fn get(&self, name: impl AsRef<str>) -> Option<&str> {
        self.properties.get(name.as_ref()).map(String::as_str)
    }

    pub fn remove(&mut self, name: impl AsRef<str>) -> Option<String> {
        self.properties.remove(name.as_ref())
    }

    #[must_use]
    pub fn contains_key(&self, name: impl AsRef<str>) -> bool {
        self.properties.contains_key(name.as_ref())
    }

    #[must_use]
    pub fn channel_name(&self) -> Option<&str> {
        self.get(EventProps::ChannelName)
    }

    pub fn set_channel_name(&mut self, channel: impl Into<String>) -> &mut Self {
        self.set(EventProps::ChannelName, channel)
    }

    #[must_use]
    pub fn with_channel(self, channel: impl Into<String>) -> Self {
        self.with(EventProps::ChannelName, channel)
    }

    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        self.get(EventProps::EventName)
    }

    pub fn set_event_name(&mut self, event: impl Into<String>) -> &mut Self {
        self.set(EventProps::EventName, event)
    }

    #[must_use]
    pub fn with_event(self, event: impl Into<String>) -> Self {
        self.with(EventProps::EventName, event)
    }

    #[must_use]
    pub fn object_type(&self) -> Option<&str> {
        self.get(EventProps::ObjectType)
    }

    #[must_use]
    pub fn object_name(&self) -> Option<&str> {
        self.get(EventProps::ObjectName)
    }

    #[must_use]
    pub fn object_id(&self) -> Option<&str> {
        self.get(EventProps::ObjectId)
    }

    #[must_use]
    pub fn object_url(&self) -> Option<&str> {
        self.get(EventProps::ObjectUrl)
    }

    #[must_use]
    pub fn timestamp(&self) -> Option<&str> {
        self.get(EventProps::EventTimestamp)
    }

    /// The event timestamp as epoch millis, if set and numeric.
    #[must_use]
    pub fn timestamp_millis(&self) -> Option<u64> {
        self.timestamp().and_then(|ts| ts.parse().ok())
    }

    #[must_use]
    pub fn event_uuid(&self) -> Option<&str> {
        self.get(EventProps::EventUuid)
    }

    /// Does this message carry every (name, value) pair of `filter`?
    ///
    /// An empty filter matches every message.
    #[must_use]
    pub fn contains_all(&self, filter: &EventFilter) -> bool {
        filter
            .iter()
            .all(|(name, value)| self.get(name) == Some(value))
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

    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// The access-control association, if this message is guarded.
    #[must_use]
    pub fn access(&self) -> Option<&Arc<dyn AccessControlled>> {
        self.access.as_ref()
    }

    #[must_use]
    pub fn with_access(mut self, access: Arc<dyn AccessControlled>) -> Self {
        self.access = Some(access);
        self
    }

    pub fn set_access(&mut self, access: Option<Arc<dyn AccessControlled>>) -> &mut Self {
        self.access = access;
        self
    }

    /// Property-only copy handed to a subscriber.
    ///
    /// The copy owns its properties and carries no access-control
    /// association, so a subscriber mutating it affects nobody else.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        Self::from_properties(self.properties.clone())
    }

    /// Flat JSON object of all properties.
    pub fn to_json(&self) -> Result<String, BusError> {
        Ok(serde_json::to_string(&self.properties)?)
    }

    /// Parse a flat JSON object. Nested values are rejected.
    pub fn from_json(json: &str) -> Result<Self, BusError> {
        let properties: BTreeMap<String, String> = serde_json::from_str(json)?;
        Ok(Self::from_properties(properties))
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("properties", &self.properties)
            .field("access_controlled", &self.access.is_some())
            .finish()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(&self.properties).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.properties.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::deserialize(deserializer).map(Self::from_properties)
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Message {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut message = Self::bare();
        for (name, value) in iter {
            message.set(name, value);
        }
        message
    }
}

fn current_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
