//! # Event Properties
//!
//! Pre-defined message property names. Any string is a valid property name;
//! these exist so that publishers and subscribers agree on the common ones.

use std::fmt;

/// Well-known property names carried by most messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventProps {
    /// The channel on which the message is published.
    ChannelName,
    /// The event name.
    EventName,
    /// Millisecond timestamp of when the event happened.
    EventTimestamp,
    /// Random event UUID.
    EventUuid,
    /// Type of the domain object the event is about.
    ObjectType,
    /// Full name of the domain object.
    ObjectName,
    /// Unique ID of the domain object.
    ObjectId,
    /// URL of the domain object.
    ObjectUrl,
}

impl EventProps {
    /// The property key as it appears in the message and on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChannelName => "channel_name",
            Self::EventName => "event_name",
            Self::EventTimestamp => "event_timestamp",
            Self::EventUuid => "event_uuid",
            Self::ObjectType => "object_type",
            Self::ObjectName => "object_name",
            Self::ObjectId => "object_id",
            Self::ObjectUrl => "object_url",
        }
    }
}

impl AsRef<str> for EventProps {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for EventProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
