//! Frame decoding for the streamed wire format.
//!
//! The graph service emits events as frames separated by a blank line.
//! Network reads can cut the stream at any byte boundary, including in the
//! middle of the delimiter or of a multi-byte character, so decoding is done
//! in two stages: [`Utf8Decoder`] reassembles text from raw byte chunks, and
//! [`FrameDecoder`] carries the unterminated tail of that text across reads.

/// Separator between two frames in the wire format.
pub const FRAME_DELIMITER: &str = "\n\n";

/// Split `buffer` into complete frames and the unterminated remainder.
///
/// The final segment is never a frame, even when the buffer ends exactly on
/// a delimiter (the segment is then empty): a frame only exists once the
/// delimiter that closes it has been seen. The remainder must be prepended
/// to the next inbound chunk, which is what [`FrameDecoder::feed`] does.
pub fn split_frames(buffer: &str) -> (Vec<String>, String) {
    if buffer.is_empty() {
        return (Vec::new(), String::new());
    }

    let mut segments: Vec<&str> = buffer.split(FRAME_DELIMITER).collect();
    let remainder = segments.pop().unwrap_or_default().to_string();
    let frames = segments.into_iter().map(str::to_string).collect();
    (frames, remainder)
}

/// Stateful frame splitter that carries the remainder between reads.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Text received but not yet closed by a delimiter.
    buffer: String,
}

impl FrameDecoder {
    /// Create a new frame decoder with an empty carry-over buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `text` to the buffer and drain every complete frame from it.
    pub fn feed(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);
        let (frames, remainder) = split_frames(&self.buffer);
        self.buffer = remainder;
        frames
    }

    /// Text still waiting for its closing delimiter.
    pub fn remainder(&self) -> &str {
        &self.buffer
    }

    /// Clear any carried text, e.g. when starting a new stream.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Incremental UTF-8 decoder for byte chunks read off the wire.
///
/// A multi-byte sequence split across two chunks is held back until the
/// bytes that finish it arrive; invalid sequences decode to U+FFFD and
/// decoding continues.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    /// Trailing bytes of an incomplete multi-byte sequence.
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Create a decoder with no pending bytes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, joined with any bytes held back previously.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let bytes = std::mem::take(&mut self.pending);

        let mut out = String::with_capacity(bytes.len());
        let mut start = 0;
        while start < bytes.len() {
            match std::str::from_utf8(&bytes[start..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let end = start + err.valid_up_to();
                    if let Ok(valid) = std::str::from_utf8(&bytes[start..end]) {
                        out.push_str(valid);
                    }
                    match err.error_len() {
                        // Genuinely invalid bytes: substitute and move past them.
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = end + len;
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.pending = bytes[end..].to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Whether a partial multi-byte sequence is being held back.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
