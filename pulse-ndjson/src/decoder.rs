//! Line-framed NDJSON decoding.
//!
//! The decoder owns the text buffer produced by the [`Utf8Reassembler`],
//! cuts it on `\n` and parses each complete line as one JSON value:
//!
//! ```text
//! {"word":"发热","weight":0.42}
//! {"word":"腹痛","weight":0.31}
//! {"answer":"..."}
//! ```
//!
//! A line that fails to parse is reported as a [`Frame::Malformed`] and
//! decoding carries on with the next line.

use serde::Serialize;
use serde_json::Value;

use crate::reassembler::Utf8Reassembler;

/// Record separator.
const SEPARATOR: char = '\n';

/// Lifecycle of an [`NdjsonDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Constructed, nothing fed yet.
    Idle,
    /// Accepting chunks.
    Streaming,
    /// End of stream reached, flushing the remainder.
    Draining,
    /// Terminal. Further input is ignored.
    Closed,
}

/// One JSON value decoded from one line of the stream.
///
/// The decoder does not interpret the value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Zero-based position among the records of this stream.
    pub index: u64,
    /// The decoded value.
    pub value: Value,
}

/// A line that was complete but not valid JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedLine {
    /// The line as received, without its separator.
    pub raw_line: String,
    /// Parser error message.
    pub error: String,
}

/// Output of the decoder, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A successfully decoded record.
    Record(Record),
    /// A line that could not be decoded. Not fatal.
    Malformed(MalformedLine),
}

impl Frame {
    /// The record, if this frame carries one.
    pub fn into_record(self) -> Option<Record> {
        match self {
            Frame::Record(record) => Some(record),
            Frame::Malformed(_) => None,
        }
    }
}

/// Incremental NDJSON decoder.
///
/// Feed raw body chunks with [`feed`](Self::feed) and call
/// [`finish`](Self::finish) once the transport reports end of stream.
/// Between calls the internal buffer never holds a separator, so every
/// complete record has already been returned.
#[derive(Debug)]
pub struct NdjsonDecoder {
    state: DecoderState,
    text: Utf8Reassembler,
    buffer: String,
    records_emitted: u64,
    malformed_lines: u64,
}

impl Default for NdjsonDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl NdjsonDecoder {
    /// Create a decoder in the [`DecoderState::Idle`] state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DecoderState::Idle,
            text: Utf8Reassembler::new(),
            buffer: String::new(),
            records_emitted: 0,
            malformed_lines: 0,
        }
    }

    /// Decode one chunk and return the frames it completes.
    ///
    /// The trailing unterminated segment stays buffered until a later chunk
    /// supplies its separator or [`finish`](Self::finish) drains it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        match self.state {
            DecoderState::Idle => self.state = DecoderState::Streaming,
            DecoderState::Streaming => {}
            DecoderState::Draining | DecoderState::Closed => {
                tracing::warn!(
                    bytes = chunk.len(),
                    "chunk fed to a closed NDJSON decoder, ignoring"
                );
                return Vec::new();
            }
        }

        let text = self.text.feed(chunk);
        let mut frames = Vec::new();

        // The buffer holds no separator yet, so the last one is in `text`.
        let Some(pos) = text.rfind(SEPARATOR) else {
            self.buffer.push_str(&text);
            return frames;
        };

        self.buffer.push_str(&text[..pos]);
        let complete = std::mem::replace(&mut self.buffer, text[pos + 1..].to_string());
        for line in complete.split(SEPARATOR) {
            self.decode_line(line, &mut frames);
        }
        frames
    }

    /// Drain the buffer at end of stream and close the decoder.
    ///
    /// Whatever remains after flushing the reassembler gets exactly one
    /// parse attempt; nothing is attempted when the remainder is blank.
    pub fn finish(&mut self) -> Vec<Frame> {
        if self.state == DecoderState::Closed {
            tracing::warn!("finish called on a closed NDJSON decoder");
            return Vec::new();
        }
        self.state = DecoderState::Draining;

        let tail = self.text.finish();
        self.buffer.push_str(&tail);
        let rest = std::mem::take(&mut self.buffer);

        let mut frames = Vec::new();
        self.decode_line(&rest, &mut frames);

        self.state = DecoderState::Closed;
        tracing::debug!(
            records = self.records_emitted,
            malformed = self.malformed_lines,
            "NDJSON stream drained"
        );
        frames
    }

    fn decode_line(&mut self, line: &str, frames: &mut Vec<Frame>) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }

        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => {
                frames.push(Frame::Record(Record {
                    index: self.records_emitted,
                    value,
                }));
                self.records_emitted += 1;
            }
            Err(e) => {
                self.malformed_lines += 1;
                tracing::warn!(error = %e, line = %line, "failed to decode NDJSON line");
                frames.push(Frame::Malformed(MalformedLine {
                    raw_line: line.to_string(),
                    error: e.to_string(),
                }));
            }
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Number of records returned so far.
    #[must_use]
    pub fn records_emitted(&self) -> u64 {
        self.records_emitted
    }

    /// Number of lines reported as malformed so far.
    #[must_use]
    pub fn malformed_lines(&self) -> u64 {
        self.malformed_lines
    }

    /// Length in bytes of the buffered, not yet terminated segment.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
