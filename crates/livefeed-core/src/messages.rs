//! Wire messages and consumer notifications.
//!
//! Outbound control frames have the shape
//! `{"action": "subscribe" | "unsubscribe", "channel": <topic>}`.
//! Inbound frames are arbitrary JSON; the only structure the feed looks at
//! is an optional string `channel` (or `topic`) field used for routing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;
use crate::topic::Topic;

/// Subscription control verb.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    /// Start receiving a topic.
    Subscribe,
    /// Stop receiving a topic.
    Unsubscribe,
}

/// Outbound subscription control frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// What to do.
    pub action: ControlAction,
    /// Which topic.
    pub channel: Topic,
}

impl ControlMessage {
    /// `{"action":"subscribe","channel":<topic>}`
    pub fn subscribe(topic: Topic) -> Self {
        Self {
            action: ControlAction::Subscribe,
            channel: topic,
        }
    }

    /// `{"action":"unsubscribe","channel":<topic>}`
    pub fn unsubscribe(topic: Topic) -> Self {
        Self {
            action: ControlAction::Unsubscribe,
            channel: topic,
        }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A successfully parsed inbound payload.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// The parsed JSON body.
    pub payload: Value,
    /// When the frame was parsed.
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Wrap an already-parsed payload, stamped with the current time.
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            received_at: Utc::now(),
        }
    }

    /// Parse wire text. Anything that is valid JSON is accepted.
    pub fn parse(text: &str) -> Result<Self> {
        let payload: Value = serde_json::from_str(text)?;
        Ok(Self::new(payload))
    }

    /// Routing key: the string `channel` field, falling back to `topic`.
    pub fn route(&self) -> Option<&str> {
        let object = self.payload.as_object()?;
        object
            .get("channel")
            .and_then(Value::as_str)
            .or_else(|| object.get("topic").and_then(Value::as_str))
    }
}

/// Out-of-band events surfaced to consumers alongside status changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A channel opened and subscriptions were replayed.
    ConnectionEstablished,
    /// The retry cap was reached; no further automatic attempts.
    ConnectionLost {
        /// Reconnect attempts made before giving up.
        attempts: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    use crate::errors::CoreError;

    #[test]
    fn subscribe_wire_shape() {
        let msg = ControlMessage::subscribe("prices".into());
        let parsed: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(parsed, json!({"action": "subscribe", "channel": "prices"}));
    }

    #[test]
    fn unsubscribe_wire_shape() {
        let msg = ControlMessage::unsubscribe("prices".into());
        let parsed: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(parsed, json!({"action": "unsubscribe", "channel": "prices"}));
    }

    #[test]
    fn parse_accepts_any_json() {
        assert!(InboundMessage::parse("{\"a\":1}").is_ok());
        assert!(InboundMessage::parse("[1,2,3]").is_ok());
        assert!(InboundMessage::parse("42").is_ok());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_matches!(InboundMessage::parse("not json"), Err(CoreError::Json(_)));
        assert_matches!(InboundMessage::parse(""), Err(CoreError::Json(_)));
    }

    #[test]
    fn route_prefers_channel_over_topic() {
        let msg = InboundMessage::new(json!({"channel": "a", "topic": "b"}));
        assert_eq!(msg.route(), Some("a"));
        let msg = InboundMessage::new(json!({"topic": "b"}));
        assert_eq!(msg.route(), Some("b"));
    }

    #[test]
    fn route_ignores_non_string_and_non_object() {
        assert_eq!(InboundMessage::new(json!({"channel": 7})).route(), None);
        assert_eq!(InboundMessage::new(json!(["channel"])).route(), None);
        assert_eq!(InboundMessage::new(json!({"data": 1})).route(), None);
    }

    #[test]
    fn notification_wire_shape() {
        let json = serde_json::to_value(Notification::ConnectionLost { attempts: 5 }).unwrap();
        assert_eq!(json, json!({"type": "connection_lost", "attempts": 5}));
        let json = serde_json::to_value(Notification::ConnectionEstablished).unwrap();
        assert_eq!(json, json!({"type": "connection_established"}));
    }
}
