#![deny(missing_docs)]
//! Incremental newline-delimited JSON decoding.
//!
//! Turns raw body chunks, split at arbitrary byte offsets, into one JSON value
//! per line:
//!
//! - [`Utf8Reassembler`] decodes bytes to text, holding back characters that
//!   straddle a chunk boundary.
//! - [`NdjsonDecoder`] frames that text on `\n` and parses every complete line.
//!   Lines that are not valid JSON surface as [`Frame::Malformed`] without
//!   interrupting the stream.
//! - [`decode_stream`] drives the decoder from any `Stream` of byte chunks,
//!   such as `reqwest::Response::bytes_stream()`.
//!
//! ```
//! use pulse_ndjson::{Frame, NdjsonDecoder};
//!
//! let mut decoder = NdjsonDecoder::new();
//! let mut frames = decoder.feed(b"{\"a\":1}\n{\"a");
//! frames.extend(decoder.feed(b"\":2}\n"));
//! frames.extend(decoder.finish());
//!
//! let values: Vec<_> = frames
//!     .into_iter()
//!     .filter_map(Frame::into_record)
//!     .map(|r| r.value)
//!     .collect();
//! assert_eq!(values, vec![serde_json::json!({"a": 1}), serde_json::json!({"a": 2})]);
//! ```

mod decoder;
mod reassembler;
mod stream;

pub use decoder::{DecoderState, Frame, MalformedLine, NdjsonDecoder, Record};
pub use reassembler::Utf8Reassembler;
pub use stream::decode_stream;
