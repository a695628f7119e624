//! Deserialization structs for message-like payloads.
//!
//! The graph streams message lists whose entries vary in shape between
//! runtime versions, so every field is optional and `content` stays a raw
//! value until normalization.

use serde::Deserialize;
use serde_json::Value;

/// One message-like entry from a messages event payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct MessagePayload {
    /// Role discriminator. The upstream omits it on assistant deltas, so
    /// absence means assistant.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Raw content: a string, a list of content parts, or something else.
    #[serde(default)]
    pub content: Option<Value>,
    /// Stable identifier of the message this delta belongs to.
    #[serde(default)]
    pub id: Option<String>,
}

impl MessagePayload {
    /// Whether this entry carries assistant output.
    pub fn is_assistant_like(&self) -> bool {
        match self.kind.as_deref() {
            None => true,
            Some(kind) => matches!(kind, "ai" | "assistant"),
        }
    }

    /// Convert a raw list entry, tolerating entries that are not objects.
    pub fn from_entry(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}
