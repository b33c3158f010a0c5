//! Async adapter from a chunked byte stream to decoded frames.

use futures::{Stream, StreamExt};

use crate::decoder::{Frame, NdjsonDecoder};

/// Decode a stream of byte chunks into NDJSON [`Frame`]s.
///
/// Chunks are fed in arrival order. When the byte stream ends, the decoder
/// is drained so an unterminated final record is still produced. A
/// transport error is yielded once and ends the stream; frames yielded
/// before it remain valid.
pub fn decode_stream<S, B, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<Frame, E>> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Send + 'static,
{
    async_stream::stream! {
        let mut decoder = NdjsonDecoder::new();
        let mut byte_stream = std::pin::pin!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::debug!(records = decoder.records_emitted(), "byte stream failed mid-read");
                    yield Err(e);
                    return;
                }
            };

            for frame in decoder.feed(chunk.as_ref()) {
                yield Ok(frame);
            }
        }

        for frame in decoder.finish() {
            yield Ok(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;

    #[tokio::test]
    async fn drains_unterminated_tail() {
        let chunks: Vec<Result<&'static [u8], ()>> =
            vec![Ok(&b"{\"a\":1}\n{\"a\""[..]), Ok(&b":2}"[..])];
        let frames: Vec<_> = decode_stream(stream::iter(chunks)).collect().await;
        let values: Vec<_> = frames
            .into_iter()
            .filter_map(|f| f.ok().and_then(Frame::into_record))
            .map(|r| r.value)
            .collect();
        assert_eq!(values, vec![json!({"a": 1}), json!({"a": 2})]);
    }

    #[tokio::test]
    async fn error_ends_stream_after_earlier_frames() {
        let chunks: Vec<Result<&'static [u8], &'static str>> =
            vec![Ok(&b"1\n2"[..]), Err("connection reset"), Ok(&b"\n3\n"[..])];
        let frames: Vec<_> = decode_stream(stream::iter(chunks)).collect().await;
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], Ok(Frame::Record(r)) if r.value == json!(1)));
        assert!(matches!(frames[1], Err("connection reset")));
    }
}
