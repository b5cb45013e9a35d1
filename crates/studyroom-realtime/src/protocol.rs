//! Channel frames spoken on the hosted backend's realtime socket (JSON, vsn 1.0.0).

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use studyroom_types::SubscriptionKey;

pub const PHOENIX_TOPIC: &str = "phoenix";
pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_ACCESS_TOKEN: &str = "access_token";
pub const EVENT_POSTGRES_CHANGES: &str = "postgres_changes";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl ChannelFrame {
    fn new(topic: impl Into<String>, event: &str, payload: Value, reference: u64) -> Self {
        Self {
            topic: topic.into(),
            event: event.to_string(),
            payload,
            reference: Some(reference.to_string()),
        }
    }

    /// Join the key's topic, asking for INSERTs on its table filtered to its room.
    pub fn join(key: &SubscriptionKey, access_token: Option<&str>, reference: u64) -> Self {
        let mut payload = json!({
            "config": {
                "broadcast": {"self": false},
                "presence": {"key": ""},
                "postgres_changes": [{
                    "event": "INSERT",
                    "schema": "public",
                    "table": key.table,
                    "filter": key.filter(),
                }],
            },
        });
        if let Some(token) = access_token {
            payload["access_token"] = Value::String(token.to_string());
        }
        Self::new(key.topic(), EVENT_JOIN, payload, reference)
    }

    pub fn leave(topic: &str, reference: u64) -> Self {
        Self::new(topic, EVENT_LEAVE, json!({}), reference)
    }

    pub fn heartbeat(reference: u64) -> Self {
        Self::new(PHOENIX_TOPIC, EVENT_HEARTBEAT, json!({}), reference)
    }

    pub fn access_token(topic: &str, token: &str, reference: u64) -> Self {
        Self::new(topic, EVENT_ACCESS_TOKEN, json!({"access_token": token}), reference)
    }

    /// The inserted row, when this frame is an INSERT change notification.
    pub fn inserted_record(&self) -> Option<&Value> {
        if self.event != EVENT_POSTGRES_CHANGES {
            return None;
        }
        let data = self.payload.get("data")?;
        if data.get("type").and_then(Value::as_str) != Some("INSERT") {
            return None;
        }
        data.get("record")
    }

    /// `Some(true)` for an `ok` reply, `Some(false)` for any other reply status.
    pub fn reply_ok(&self) -> Option<bool> {
        if self.event != EVENT_REPLY {
            return None;
        }
        Some(self.payload.get("status").and_then(Value::as_str) == Some("ok"))
    }
}

/// Websocket endpoint for a project URL: `http(s)` becomes `ws(s)`.
pub fn socket_url(project_url: &str, anon_key: &str) -> Option<String> {
    let base = project_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        return None;
    };
    Some(format!(
        "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
        ws_base, anon_key
    ))
}
