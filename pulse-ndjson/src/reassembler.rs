//! Byte-to-text reassembly for chunked UTF-8 input.
//!
//! HTTP transports split a body wherever they like, including in the middle
//! of a multi-byte character. [`Utf8Reassembler`] holds such a split
//! sequence back until the bytes that complete it arrive.

/// Stateful UTF-8 decoder that tolerates chunk boundaries inside characters.
///
/// Concatenating every [`feed`](Self::feed) output followed by the
/// [`finish`](Self::finish) output yields exactly
/// `String::from_utf8_lossy(all_bytes)` minus one leading byte-order mark,
/// no matter how the input was chunked. Invalid sequences become U+FFFD
/// rather than errors.
#[derive(Debug, Default)]
pub struct Utf8Reassembler {
    /// Trailing bytes of the previous chunk that may start a character.
    pending: Vec<u8>,
    /// Set once the first character of the stream has been decoded.
    bom_checked: bool,
}

impl Utf8Reassembler {
    /// Create a reassembler with nothing held back.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one chunk, returning all text that is complete so far.
    pub fn feed(&mut self, chunk: &[u8]) -> String {
        if chunk.is_empty() {
            return String::new();
        }

        let mut out = String::with_capacity(self.pending.len() + chunk.len());
        if self.pending.is_empty() {
            let rest = decode_lossy(chunk, &mut out);
            self.pending.extend_from_slice(rest);
        } else {
            let mut joined = std::mem::take(&mut self.pending);
            joined.extend_from_slice(chunk);
            let rest = decode_lossy(&joined, &mut out);
            self.pending.extend_from_slice(rest);
        }
        self.strip_bom(&mut out);
        out
    }

    /// Flush whatever is still held at end of stream.
    ///
    /// A truncated character decodes to a single U+FFFD.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        let mut out = String::from_utf8_lossy(&rest).into_owned();
        self.strip_bom(&mut out);
        out
    }

    /// Whether a partial character is currently held back.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drop a U+FEFF that opens the stream. Only the first decoded
    /// character is inspected; a split mark is still held in `pending`.
    fn strip_bom(&mut self, out: &mut String) {
        if self.bom_checked || out.is_empty() {
            return;
        }
        self.bom_checked = true;
        if out.starts_with(BOM) {
            out.drain(..BOM.len_utf8());
        }
    }
}

const BOM: char = '\u{FEFF}';

/// Append the decodable prefix of `input` to `out` and return the
/// unterminated tail, which is at most one truncated character.
fn decode_lossy<'a>(input: &'a [u8], out: &mut String) -> &'a [u8] {
    let mut consumed = 0;
    for chunk in input.utf8_chunks() {
        out.push_str(chunk.valid());
        consumed += chunk.valid().len();

        let invalid = chunk.invalid();
        if invalid.is_empty() {
            continue;
        }
        // An invalid run touching the end of input may still be completed.
        if consumed + invalid.len() == input.len() {
            return &input[consumed..];
        }
        out.push(char::REPLACEMENT_CHARACTER);
        consumed += invalid.len();
    }
    &[]
}
