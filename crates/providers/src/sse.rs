//! Shared SSE streaming plumbing for the HTTP adapters.
//!
//! Both adapters follow the same pattern: receive a `reqwest::Response`,
//! buffer bytes, split on `\n\n`, extract `data:` payloads, and feed each
//! payload to an adapter-specific parser that returns zero or more
//! [`StreamChunk`]s. The parser is `FnMut` because tool-call assembly needs
//! state across events.

use pk_domain::stream::{BoxStream, FinishReason, StreamChunk};
use pk_domain::Result;

use crate::util::from_reqwest;

/// Extract complete `data:` payloads from an SSE buffer.
///
/// Events are delimited by `\n\n`, but event boundaries only matter for
/// deciding what is complete: everything up to the last delimiter is
/// finished and can be scanned for `data:` lines in one flat pass, while
/// the tail after it (a partial event, possibly empty) stays buffered for
/// the next read.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let Some(end) = buffer.rfind("\n\n") else {
        return Vec::new();
    };
    let tail = buffer.split_off(end + 2);
    let complete = std::mem::replace(buffer, tail);

    complete
        .lines()
        .filter_map(|line| {
            let payload = line.trim().strip_prefix("data:")?.trim();
            (!payload.is_empty()).then(|| payload.to_string())
        })
        .collect()
}

/// Build a chunk stream from an SSE response and an adapter-specific parser.
///
/// The stream buffers incoming bytes, drains complete events, flushes the
/// tail when the body closes, and guarantees a terminal `done` chunk even
/// when the adapter never produced one.
pub(crate) fn sse_chunk_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<StreamChunk>>
where
    F: FnMut(&str) -> Vec<Result<StreamChunk>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for data in drain_data_lines(&mut buffer) {
                        for chunk in parse_data(&data) {
                            if matches!(&chunk, Ok(StreamChunk::Done { .. })) {
                                done_emitted = true;
                            }
                            yield chunk;
                        }
                    }
                }
                Ok(None) => {
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in drain_data_lines(&mut buffer) {
                            for chunk in parse_data(&data) {
                                if matches!(&chunk, Ok(StreamChunk::Done { .. })) {
                                    done_emitted = true;
                                }
                                yield chunk;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamChunk::Done { finish_reason: FinishReason::Stop });
        }
    };

    Box::pin(stream)
}
