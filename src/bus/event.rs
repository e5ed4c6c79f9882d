//! Application events
//!
//! An event is an opaque key-value payload tagged with the live match it
//! targets. The bus never interprets the payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An application-level message broadcast from host to viewers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Live match the event belongs to
    pub live_match_id: String,
    /// Application-defined payload
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Event {
    /// Create an event with an empty payload
    pub fn new(live_match_id: impl Into<String>) -> Self {
        Self {
            live_match_id: live_match_id.into(),
            payload: Map::new(),
        }
    }

    /// Create an event from an existing payload
    pub fn with_payload(live_match_id: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            live_match_id: live_match_id.into(),
            payload,
        }
    }

    /// Set a payload field
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// The conventional `type` field, if it is a string
    pub fn event_type(&self) -> Option<&str> {
        self.payload.get("type").and_then(Value::as_str)
    }
}
