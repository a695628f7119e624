//! Per-frame payload parsing.
//!
//! Each complete frame is expected to be a single `data: <json>` line.
//! Anything else (comments, other SSE fields, malformed JSON) is dropped
//! without interrupting the stream.

use crate::sse::events::StreamEvent;

/// Prefix of a frame that carries an event payload.
pub const DATA_PREFIX: &str = "data:";

/// Parse one frame into its decoded event.
///
/// Returns `None` for frames that do not start with the data prefix and for
/// payloads that are not valid JSON. Neither case is an error for the
/// stream as a whole; dropped frames are logged for diagnostics only.
pub fn parse_data_line(frame: &str) -> Option<StreamEvent> {
    let line = frame.trim();
    let payload = line.strip_prefix(DATA_PREFIX)?;

    match serde_json::from_str(payload.trim()) {
        Ok(value) => Some(StreamEvent::from_value(value)),
        Err(e) => {
            tracing::debug!("dropping malformed frame: {}", e);
            None
        }
    }
}
