//! Shared SSE plumbing for HTTP adapters.
//!
//! The adapter receives a `reqwest::Response`, buffers body chunks, peels
//! off complete frames, and feeds each frame's `data:` payload to an
//! adapter-specific parser that returns zero or more [`LlmChunk`]s.

use sw_domain::error::{Error, LlmErrorKind};
use sw_domain::Result;

use crate::client::{BoxStream, LlmChunk};

/// Frame delimiter per the SSE framing rules.
const FRAME_BOUNDARY: &str = "\n\n";

/// Take the `data:` payloads of every complete frame in `pending`,
/// leaving a trailing partial frame (if any) for the next read.
///
/// A frame may carry `event:`, `id:`, or `retry:` lines alongside its
/// `data:` lines; only the latter matter to the chat protocol.
pub(crate) fn take_data_payloads(pending: &mut String) -> Vec<String> {
    let Some(boundary) = pending.rfind(FRAME_BOUNDARY) else {
        return Vec::new();
    };
    let complete: String = pending
        .drain(..boundary + FRAME_BOUNDARY.len())
        .collect();

    complete
        .split(FRAME_BOUNDARY)
        .flat_map(str::lines)
        .filter_map(|line| line.trim().strip_prefix("data:"))
        .map(str::trim)
        .filter(|payload| !payload.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build a chunk stream from an SSE response and a parser closure.
///
/// The closure is `FnMut` so adapters can keep assembly state across
/// frames. Whatever is still buffered when the body closes is parsed as a
/// final frame.
pub(crate) fn sse_chunk_stream<F>(
    response: reqwest::Response,
    mut parse_payload: F,
) -> BoxStream<'static, Result<LlmChunk>>
where
    F: FnMut(&str) -> Vec<Result<LlmChunk>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut pending = String::new();

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    pending.push_str(&String::from_utf8_lossy(&bytes));
                    for payload in take_data_payloads(&mut pending) {
                        for chunk in parse_payload(&payload) {
                            yield chunk;
                        }
                    }
                }
                Ok(None) => {
                    if !pending.trim().is_empty() {
                        pending.push_str(FRAME_BOUNDARY);
                        for payload in take_data_payloads(&mut pending) {
                            for chunk in parse_payload(&payload) {
                                yield chunk;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(Error::llm(LlmErrorKind::Network, e.to_string()));
                    break;
                }
            }
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_complete_frames_only() {
        let mut pending = "data: one\n\ndata: two\n\ndata: par".to_string();
        let payloads = take_data_payloads(&mut pending);
        assert_eq!(payloads, vec!["one", "two"]);
        assert_eq!(pending, "data: par");
    }

    #[test]
    fn no_complete_frame_leaves_buffer_untouched() {
        let mut pending = "data: still going".to_string();
        assert!(take_data_payloads(&mut pending).is_empty());
        assert_eq!(pending, "data: still going");
    }

    #[test]
    fn ignores_non_data_lines() {
        let mut pending = "event: delta\nid: 7\ndata: payload\n\n".to_string();
        let payloads = take_data_payloads(&mut pending);
        assert_eq!(payloads, vec!["payload"]);
        assert!(pending.is_empty());
    }

    #[test]
    fn skips_empty_data() {
        let mut pending = "data:\n\ndata: x\n\n".to_string();
        let payloads = take_data_payloads(&mut pending);
        assert_eq!(payloads, vec!["x"]);
    }

    #[test]
    fn multiple_data_lines_in_one_frame() {
        let mut pending = "data: a\ndata: b\n\n".to_string();
        let payloads = take_data_payloads(&mut pending);
        assert_eq!(payloads, vec!["a", "b"]);
    }
}
