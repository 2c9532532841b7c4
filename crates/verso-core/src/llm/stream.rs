//! Line framing for streamed model responses.
//!
//! Network chunks do not line up with protocol lines: one chunk may carry
//! several lines, and one line (or one multi-byte character) may be split
//! across chunks. Bytes are buffered until a full `\n`-terminated line exists.

use async_stream::try_stream;
use futures_util::{Stream, StreamExt};

use crate::error::Result;

/// Accumulates raw bytes and hands out complete lines.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and return every line it completed. Empty lines are
    /// dropped, a trailing `\r` is removed.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.trim_end_matches('\r');
            if !line.trim().is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Whatever is left once the body ends without a final newline.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&rest);
        let line = line.trim();
        (!line.is_empty()).then(|| line.to_string())
    }
}

/// A parsed Server-Sent Events line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SseEvent {
    Data(String),
    /// The `[DONE]` sentinel used by OpenAI-compatible APIs.
    Done,
}

/// Interpret one SSE line. Comments and non-data fields yield `None`.
pub(crate) fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    Some(SseEvent::Data(data.to_string()))
}

/// Turn an HTTP body stream into a stream of complete lines.
pub(crate) fn lines<S, B>(body: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    try_stream! {
        let mut body = Box::pin(body);
        let mut buffer = LineBuffer::default();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for line in buffer.feed(chunk.as_ref()) {
                yield line;
            }
        }
        if let Some(line) = buffer.finish() {
            yield line;
        }
    }
}
