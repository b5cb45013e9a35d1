use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::RoomCode;

/// Table whose inserts the chat panel listens to.
pub const MESSAGES_TABLE: &str = "messages";

/// Scope of a push subscription: one table, filtered to one room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub table: String,
    pub room: RoomCode,
}

impl SubscriptionKey {
    pub fn new(table: impl Into<String>, room: RoomCode) -> Self {
        Self {
            table: table.into(),
            room,
        }
    }

    pub fn messages(room: RoomCode) -> Self {
        Self::new(MESSAGES_TABLE, room)
    }

    /// Channel topic used on the realtime socket.
    pub fn topic(&self) -> String {
        format!("realtime:{}:{}", self.table, self.room)
    }

    /// Row filter understood by the backend, e.g. `room_id=eq.ABC123`.
    pub fn filter(&self) -> String {
        format!("room_id=eq.{}", self.room)
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.room)
    }
}

/// A row-insert notification, scoped to the key it was published under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowEvent {
    pub key: SubscriptionKey,
    pub record: serde_json::Value,
}

impl RowEvent {
    pub fn new(key: SubscriptionKey, record: serde_json::Value) -> Self {
        Self { key, record }
    }

    /// Decode the inserted row into a typed record.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.record)
    }
}
