//! Stream wire-format parsing.
//!
//! The graph service streams events as frames separated by a blank line;
//! each frame is a `data: <json>` line whose document carries an optional
//! `event` discriminator and a polymorphic `data` payload. Frames can be
//! split across network reads at arbitrary byte boundaries.
//!
//! # Module structure
//! - `decoder` - frame splitting with carry-over, incremental UTF-8 decoding
//! - `parser` - per-frame payload parsing (prefix strip + JSON decode)
//! - `events` - decoded event classification and extraction
//! - `payloads` - message payload deserialization structs

mod decoder;
mod events;
mod parser;
mod payloads;

// Re-export public types
pub use decoder::{split_frames, FrameDecoder, Utf8Decoder, FRAME_DELIMITER};
pub use events::{
    MessageChunk, StreamEvent, ERROR_EVENT, INTERRUPT_MESSAGE, MESSAGE_EVENT_PREFIX,
    METADATA_EVENT,
};
pub use parser::{parse_data_line, DATA_PREFIX};
