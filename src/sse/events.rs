//! Decoded stream events and their classification.
//!
//! A [`StreamEvent`] is one frame's payload: an optional `event`
//! discriminator plus an arbitrary `data` value. The `data` field takes a
//! handful of shapes depending on the event; [`EventData`] names them
//! explicitly so each extractor is a single match arm instead of ad-hoc
//! field probing.

use std::collections::HashMap;

use serde_json::Value;

use crate::route;
use crate::sse::payloads::MessagePayload;

/// Discriminator prefix shared by assistant message deltas
/// ("messages", "messages/partial", "messages/complete").
pub const MESSAGE_EVENT_PREFIX: &str = "messages";
/// Discriminator of the per-message source metadata event.
pub const METADATA_EVENT: &str = "messages/metadata";
/// Discriminator of upstream failure events.
pub const ERROR_EVENT: &str = "error";
/// Error payload sent when a run is cancelled cooperatively. Not a real
/// failure, and never surfaced to the user.
pub const INTERRUPT_MESSAGE: &str = "interrupt";

/// One decoded event from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// Event discriminator, when the payload carried one.
    pub event: Option<String>,
    /// Event payload, shape depending on the discriminator.
    pub data: Option<Value>,
}

/// Assistant content extracted from a message event.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageChunk {
    /// Full accumulated text of the assistant message so far. Each chunk
    /// carries the whole message, not a delta.
    pub content: String,
    /// Identifier of the message the content belongs to, when present.
    pub message_id: Option<String>,
}

/// The shapes a `data` payload can take.
#[derive(Debug)]
enum EventData {
    /// Bare list of message-like entries.
    Messages(Vec<MessagePayload>),
    /// Object wrapping a `messages` list.
    Envelope(Vec<MessagePayload>),
    /// Error-shaped payload: a bare string, or an object carrying
    /// `message` or `error`.
    ErrorShape(Option<String>),
    /// Anything else.
    Other,
}

impl EventData {
    fn classify(value: &Value) -> Self {
        match value {
            Value::Array(entries) => {
                Self::Messages(entries.iter().map(MessagePayload::from_entry).collect())
            }
            Value::Object(map) => {
                if let Some(Value::Array(entries)) = map.get("messages") {
                    Self::Envelope(entries.iter().map(MessagePayload::from_entry).collect())
                } else if map.contains_key("message") || map.contains_key("error") {
                    let message = map
                        .get("message")
                        .and_then(Value::as_str)
                        .or_else(|| map.get("error").and_then(Value::as_str))
                        .map(str::to_string);
                    Self::ErrorShape(message)
                } else {
                    Self::Other
                }
            }
            Value::String(message) => Self::ErrorShape(Some(message.clone())),
            _ => Self::Other,
        }
    }
}

impl StreamEvent {
    /// Build an event from one frame's decoded JSON document.
    ///
    /// Objects contribute their conventional `event` and `data` fields; any
    /// other JSON value becomes an undiscriminated payload.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(mut map) => {
                let event = match map.remove("event") {
                    Some(Value::String(name)) => Some(name),
                    _ => None,
                };
                Self {
                    event,
                    data: map.remove("data"),
                }
            }
            other => Self {
                event: None,
                data: Some(other),
            },
        }
    }

    /// Whether this is an upstream failure event.
    pub fn is_error(&self) -> bool {
        self.event.as_deref() == Some(ERROR_EVENT)
    }

    /// Whether this is the cooperative-cancellation error. Interrupts are
    /// the expected result of stopping a run and must not reach the user as
    /// failures.
    pub fn is_interrupt(&self) -> bool {
        self.is_error() && self.error_message().as_deref() == Some(INTERRUPT_MESSAGE)
    }

    /// Human-readable message of an error event.
    ///
    /// Prefers the payload itself when it is a string, then its `message`
    /// field, then its `error` field.
    pub fn error_message(&self) -> Option<String> {
        if !self.is_error() {
            return None;
        }
        match EventData::classify(self.data.as_ref()?) {
            EventData::ErrorShape(message) => message,
            _ => None,
        }
    }

    /// Extract assistant content from a message event.
    ///
    /// Returns `None` unless the discriminator starts with the message
    /// prefix, the payload resolves to a non-empty message list, the last
    /// entry is assistant output with non-empty content, and the content is
    /// neither an internal routing payload (bounded by `route_limit`) nor
    /// literal JSON text.
    pub fn message_chunk(&self, route_limit: usize) -> Option<MessageChunk> {
        let name = self.event.as_deref()?;
        if !name.starts_with(MESSAGE_EVENT_PREFIX) {
            return None;
        }

        let list = match EventData::classify(self.data.as_ref()?) {
            EventData::Messages(list) | EventData::Envelope(list) => list,
            _ => return None,
        };
        let last = list.last()?;
        if !last.is_assistant_like() {
            return None;
        }

        let content = normalize_content(last.content.as_ref()?)?;
        if content.starts_with('{')
            || route::is_route_control_payload_with_limit(&content, route_limit)
        {
            return None;
        }

        Some(MessageChunk {
            content,
            message_id: last.id.clone(),
        })
    }

    /// Map of message id to the graph node that produced the message.
    ///
    /// Only the metadata event carries this; every other event yields an
    /// empty map.
    pub fn node_sources(&self) -> HashMap<String, String> {
        let mut sources = HashMap::new();
        if self.event.as_deref() != Some(METADATA_EVENT) {
            return sources;
        }
        let Some(Value::Object(map)) = self.data.as_ref() else {
            return sources;
        };

        for (message_id, wrapper) in map {
            let node = wrapper
                .get("metadata")
                .and_then(|meta| meta.get("langgraph_node").or_else(|| meta.get("node")))
                .and_then(Value::as_str);
            if let Some(node) = node {
                sources.insert(message_id.clone(), node.to_string());
            }
        }
        sources
    }

    /// Run identifier stamped on the event, if any. The graph runtime puts
    /// it on the first metadata event of a run.
    pub fn run_id(&self) -> Option<String> {
        self.data
            .as_ref()?
            .get("run_id")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Normalize a raw content value to trimmed text.
///
/// Strings pass through; a list of parts maps each part to its `text` field
/// (or the part itself when it is already a string), concatenated. Empty
/// results and any other shape normalize to `None`.
fn normalize_content(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.clone(),
        Value::Array(parts) => {
            let mut text = String::new();
            for part in parts {
                match part {
                    Value::String(s) => text.push_str(s),
                    Value::Object(map) => {
                        if let Some(Value::String(s)) = map.get("text") {
                            text.push_str(s);
                        }
                    }
                    _ => {}
                }
            }
            text
        }
        _ => return None,
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::ROUTE_PAYLOAD_MAX_LEN;
    use serde_json::json;

    fn event(value: Value) -> StreamEvent {
        StreamEvent::from_value(value)
    }

    fn chunk(value: Value) -> Option<MessageChunk> {
        event(value).message_chunk(ROUTE_PAYLOAD_MAX_LEN)
    }

    #[test]
    fn test_from_value_object() {
        let e = event(json!({ "event": "messages", "data": [] }));
        assert_eq!(e.event.as_deref(), Some("messages"));
        assert_eq!(e.data, Some(json!([])));
    }

    #[test]
    fn test_from_value_non_string_event_ignored() {
        let e = event(json!({ "event": 7, "data": [] }));
        assert!(e.event.is_none());
    }

    #[test]
    fn test_is_error() {
        assert!(event(json!({ "event": "error" })).is_error());
        assert!(!event(json!({ "event": "messages" })).is_error());
        assert!(!event(json!({})).is_error());
    }

    #[test]
    fn test_is_interrupt() {
        let e = event(json!({ "event": "error", "data": { "message": "interrupt" } }));
        assert!(e.is_interrupt());

        let e = event(json!({ "event": "error", "data": "interrupt" }));
        assert!(e.is_interrupt());

        let e = event(json!({ "event": "error", "data": { "message": "boom" } }));
        assert!(!e.is_interrupt());

        // Interrupt text under a non-error event is not an interrupt.
        let e = event(json!({ "event": "messages", "data": "interrupt" }));
        assert!(!e.is_interrupt());
    }

    #[test]
    fn test_error_message_preference_order() {
        let e = event(json!({ "event": "error", "data": "plain failure" }));
        assert_eq!(e.error_message().as_deref(), Some("plain failure"));

        let e = event(json!({ "event": "error", "data": { "message": "from message", "error": "from error" } }));
        assert_eq!(e.error_message().as_deref(), Some("from message"));

        let e = event(json!({ "event": "error", "data": { "error": "from error" } }));
        assert_eq!(e.error_message().as_deref(), Some("from error"));

        let e = event(json!({ "event": "error", "data": { "code": 500 } }));
        assert!(e.error_message().is_none());

        let e = event(json!({ "event": "error" }));
        assert!(e.error_message().is_none());
    }

    #[test]
    fn test_message_chunk_bare_list() {
        let c = chunk(json!({
            "event": "messages",
            "data": [{ "type": "ai", "content": "hello" }],
        }))
        .unwrap();
        assert_eq!(c.content, "hello");
        assert!(c.message_id.is_none());
    }

    #[test]
    fn test_message_chunk_envelope() {
        let c = chunk(json!({
            "event": "messages/partial",
            "data": { "messages": [{ "type": "ai", "content": "hi", "id": "m-1" }] },
        }))
        .unwrap();
        assert_eq!(c.content, "hi");
        assert_eq!(c.message_id.as_deref(), Some("m-1"));
    }

    #[test]
    fn test_message_chunk_uses_last_entry() {
        let c = chunk(json!({
            "event": "messages",
            "data": [
                { "type": "human", "content": "question" },
                { "type": "ai", "content": "answer" },
            ],
        }))
        .unwrap();
        assert_eq!(c.content, "answer");
    }

    #[test]
    fn test_message_chunk_non_assistant_role() {
        assert!(chunk(json!({
            "event": "messages",
            "data": [{ "type": "human", "content": "hi" }],
        }))
        .is_none());
    }

    #[test]
    fn test_message_chunk_missing_type_defaults_to_assistant() {
        let c = chunk(json!({
            "event": "messages",
            "data": [{ "content": "untyped delta" }],
        }))
        .unwrap();
        assert_eq!(c.content, "untyped delta");
    }

    #[test]
    fn test_message_chunk_content_part_list() {
        let c = chunk(json!({
            "event": "messages",
            "data": [{
                "type": "ai",
                "content": [{ "text": "one " }, "two", { "other": true }],
            }],
        }))
        .unwrap();
        assert_eq!(c.content, "one two");
    }

    #[test]
    fn test_message_chunk_rejects_empty_and_whitespace() {
        assert!(chunk(json!({
            "event": "messages",
            "data": [{ "type": "ai", "content": "   " }],
        }))
        .is_none());
        assert!(chunk(json!({
            "event": "messages",
            "data": [],
        }))
        .is_none());
        assert!(chunk(json!({
            "event": "messages",
            "data": [{ "type": "ai" }],
        }))
        .is_none());
    }

    #[test]
    fn test_message_chunk_filters_route_decisions() {
        assert!(chunk(json!({
            "event": "messages",
            "data": [{ "type": "ai", "content": "{\"route\":\"direct\"}" }],
        }))
        .is_none());
        assert!(chunk(json!({
            "event": "messages",
            "data": [{ "type": "ai", "content": "retrieve" }],
        }))
        .is_none());
    }

    #[test]
    fn test_message_chunk_filters_json_looking_text() {
        assert!(chunk(json!({
            "event": "messages",
            "data": [{ "type": "ai", "content": "{\"anything\": 1}" }],
        }))
        .is_none());
    }

    #[test]
    fn test_message_chunk_wrong_event() {
        assert!(chunk(json!({
            "event": "values",
            "data": [{ "type": "ai", "content": "hello" }],
        }))
        .is_none());
        assert!(chunk(json!({
            "data": [{ "type": "ai", "content": "hello" }],
        }))
        .is_none());
    }

    #[test]
    fn test_message_chunk_other_shapes() {
        assert!(chunk(json!({ "event": "messages", "data": "plain" })).is_none());
        assert!(chunk(json!({ "event": "messages", "data": 42 })).is_none());
        assert!(chunk(json!({ "event": "messages" })).is_none());
    }

    #[test]
    fn test_node_sources() {
        let e = event(json!({
            "event": "messages/metadata",
            "data": {
                "m-1": { "metadata": { "langgraph_node": "retrieve" } },
                "m-2": { "metadata": { "node": "direct_answer" } },
                "m-3": { "metadata": { "langgraph_node": 5 } },
                "m-4": {},
            },
        }));
        let sources = e.node_sources();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources.get("m-1").map(String::as_str), Some("retrieve"));
        assert_eq!(sources.get("m-2").map(String::as_str), Some("direct_answer"));
    }

    #[test]
    fn test_node_sources_wrong_event() {
        let e = event(json!({
            "event": "messages",
            "data": { "m-1": { "metadata": { "langgraph_node": "retrieve" } } },
        }));
        assert!(e.node_sources().is_empty());
    }

    #[test]
    fn test_run_id_extraction() {
        let e = event(json!({
            "event": "messages/metadata",
            "data": { "run_id": "run-42" },
        }));
        assert_eq!(e.run_id().as_deref(), Some("run-42"));

        assert!(event(json!({ "event": "messages", "data": [] })).run_id().is_none());
        assert!(event(json!({ "data": { "run_id": 9 } })).run_id().is_none());
    }

    #[test]
    fn test_normalize_content_shapes() {
        assert_eq!(normalize_content(&json!("  text  ")).as_deref(), Some("text"));
        assert_eq!(
            normalize_content(&json!([{ "text": "a" }, { "text": "b" }])).as_deref(),
            Some("ab")
        );
        assert!(normalize_content(&json!("")).is_none());
        assert!(normalize_content(&json!([])).is_none());
        assert!(normalize_content(&json!({ "text": "not a list" })).is_none());
        assert!(normalize_content(&json!(12)).is_none());
    }
}
