//! Server-Sent Events decoding shared by the SSE and streaming HTTP
//! transports
//!
//! [`SseDecoder`] turns arbitrary byte chunks into complete [`SseEvent`]s.
//! [`parse_sse_stream`] drives a decoder over a `reqwest` body stream and
//! hands each event to a callback.
//!
//! Field handling:
//!
//! - `data:` lines are joined with `\n`; one leading space is stripped.
//! - `id:` is remembered as the last event ID.
//! - `event:` names the event; `ping` events and `[PING]` payloads are
//!   dropped.
//! - `retry:` and `:` comment lines are ignored.

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::error::{Result, ToolgateError};

/// One decoded SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, if present.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    /// The `id:` field, if present.
    pub id: Option<String>,
}

impl SseEvent {
    /// Event type, defaulting to `message` as SSE specifies.
    pub fn kind(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Incremental SSE decoder.
///
/// # Examples
///
/// ```
/// use toolgate::mcp::transport::event_stream::SseDecoder;
///
/// let mut decoder = SseDecoder::default();
/// assert!(decoder.push(b"data: {\"a\"").is_empty());
/// let events = decoder.push(b":1}\n\n");
/// assert_eq!(events[0].data, "{\"a\":1}");
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    last_event_id: Option<String>,
}

impl SseDecoder {
    /// Feed a chunk and return every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = find_blank_line(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let text = String::from_utf8_lossy(&block[..pos]).into_owned();
            if let Some(event) = self.parse_block(&text) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let block = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&block).into_owned();
        self.parse_block(&text)
    }

    /// The most recent `id:` seen on this stream.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    fn parse_block(&mut self, block: &str) -> Option<SseEvent> {
        let mut data_lines: Vec<&str> = Vec::new();
        let mut event_type: Option<&str> = None;
        let mut event_id: Option<&str> = None;

        for line in block.lines() {
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "data" => data_lines.push(value),
                "event" => event_type = Some(value.trim()),
                "id" => event_id = Some(value.trim()),
                _ => {}
            }
        }

        if let Some(id) = event_id {
            self.last_event_id = Some(id.to_string());
        }

        if event_type.map_or(false, |et| et.eq_ignore_ascii_case("ping")) {
            return None;
        }

        let data = data_lines.join("\n");
        if data.trim().is_empty() || data.trim().eq_ignore_ascii_case("[ping]") {
            return None;
        }

        Some(SseEvent {
            event: event_type.map(str::to_string),
            data,
            id: event_id.map(str::to_string),
        })
    }
}

fn find_blank_line(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

/// Decode an SSE byte stream, calling `on_event` for each complete event.
///
/// Runs until the body ends. Intended to be driven from a spawned task.
///
/// # Arguments
///
/// * `byte_stream` - The raw HTTP response body as a stream of byte chunks
/// * `on_event` - Called once per decoded event, in stream order
///
/// # Returns
///
/// The decoder's last event ID, for resumption.
///
/// # Errors
///
/// Returns [`ToolgateError::Transport`] if the body stream fails mid-way.
pub async fn parse_sse_stream<S, F>(byte_stream: S, mut on_event: F) -> Result<Option<String>>
where
    S: Stream<Item = reqwest::Result<Bytes>>,
    F: FnMut(SseEvent),
{
    let mut decoder = SseDecoder::default();
    tokio::pin!(byte_stream);

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk
            .map_err(|e| ToolgateError::Transport(format!("event stream read failed: {e}")))?;
        for event in decoder.push(&chunk) {
            on_event(event);
        }
    }

    if let Some(event) = decoder.finish() {
        on_event(event);
    }

    Ok(decoder.last_event_id().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(chunks: &[&str]) -> Vec<SseEvent> {
        let mut decoder = SseDecoder::default();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.push(chunk.as_bytes()));
        }
        events.extend(decoder.finish());
        events
    }

    #[test]
    fn test_single_data_event() {
        let events = collect(&["data: {\"jsonrpc\":\"2.0\"}\n\n"]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, r#"{"jsonrpc":"2.0"}"#);
        assert_eq!(events[0].kind(), "message");
    }

    #[test]
    fn test_event_split_across_chunks() {
        let events = collect(&["event: endpoint\nda", "ta: /messages?session_id=1", "\n\n"]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "endpoint");
        assert_eq!(events[0].data, "/messages?session_id=1");
    }

    #[test]
    fn test_crlf_line_endings() {
        let events = collect(&["data: first\r\n\r\ndata: second\r\n\r\n"]);
        let data: Vec<&str> = events.iter().map(|e| e.data.as_str()).collect();
        assert_eq!(data, vec!["first", "second"]);
    }

    #[test]
    fn test_multiline_data_joined() {
        let events = collect(&["data: a\ndata: b\n\n"]);
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn test_ping_events_dropped() {
        let events = collect(&[
            "event: ping\ndata: ignored\n\ndata: [PING]\n\n: comment\n\ndata: real\n\n",
        ]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "real");
    }

    #[test]
    fn test_id_tracked_and_trailing_event_flushed() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"id: evt-42\ndata: payload").is_empty());
        let last = decoder.finish().unwrap();
        assert_eq!(last.id.as_deref(), Some("evt-42"));
        assert_eq!(decoder.last_event_id(), Some("evt-42"));
    }

    #[tokio::test]
    async fn test_parse_sse_stream_invokes_callback_in_order() {
        let chunks: Vec<reqwest::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"id: 1\ndata: one\n\n")),
            Ok(Bytes::from_static(b"id: 2\ndata: two\n\n")),
        ];
        let mut seen = Vec::new();
        let last = parse_sse_stream(futures::stream::iter(chunks), |e| seen.push(e.data))
            .await
            .unwrap();
        assert_eq!(seen, vec!["one", "two"]);
        assert_eq!(last.as_deref(), Some("2"));
    }
}
