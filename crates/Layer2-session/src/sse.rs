//! SSE frame parser
//!
//! The event endpoint gives no length framing: frames are `event:`/`data:`
//! lines terminated by a blank line, and a network chunk may end anywhere,
//! including inside a multi-byte character. `SseDecoder` keeps the bytes after
//! the last terminator between chunks and only rescans what arrived since the
//! previous call. `parse_sse_chunk` is the stateless form: feeding
//! `remaining + next_chunk` into the next call yields exactly the events a
//! single pass over the whole stream would.

use crate::error::{SessionError, SessionResult};
use crate::types::SessionEvent;
use serde_json::Value;
use tracing::{trace, warn};

/// Event type used when neither the frame nor the payload names one
const DEFAULT_EVENT_TYPE: &str = "message";

/// Largest incomplete frame a decoder buffers before giving up on the stream
pub const MAX_PENDING_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Parse every complete frame in `buffer`
///
/// Returns the decoded events in wire order and the unconsumed tail
/// (an incomplete trailing frame, possibly empty). Malformed frames are
/// dropped and logged; they never stop the frames after them.
pub fn parse_sse_chunk(buffer: &[u8]) -> (Vec<SessionEvent>, Vec<u8>) {
    let mut decoder = SseDecoder::with_limit(usize::MAX);
    let events = decoder.push(buffer);
    (events, decoder.into_pending())
}

// ============================================================================
// SseDecoder
// ============================================================================

/// Incremental frame decoder for one event stream
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a terminator
    scanned: usize,
    max_pending: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::with_limit(MAX_PENDING_FRAME_BYTES)
    }

    pub fn with_limit(max_pending: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_pending,
        }
    }

    /// Append a chunk and return the frames it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SessionEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        // A terminator is at most three bytes, so it can begin two bytes
        // before the end of the previous scan
        let mut from = self.scanned.saturating_sub(2);

        while let Some((frame_len, consumed)) = find_frame_end(&self.buffer[start..], from) {
            if let Some(event) = parse_frame(&self.buffer[start..start + frame_len]) {
                events.push(event);
            }
            start += consumed;
            from = 0;
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        events
    }

    /// Bytes of the incomplete trailing frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Fails once the incomplete frame outgrows the limit
    pub fn check_limit(&self) -> SessionResult<()> {
        if self.buffer.len() > self.max_pending {
            return Err(SessionError::Stream(format!(
                "unterminated frame exceeds {} bytes",
                self.max_pending
            )));
        }
        Ok(())
    }

    pub fn into_pending(self) -> Vec<u8> {
        self.buffer
    }
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Locate the first blank-line terminator (`\n\n` or `\n\r\n`) at or after `from`
///
/// Returns the length of the frame body and the number of bytes consumed
/// including the terminator. Only fully present terminators match.
fn find_frame_end(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let offset = buf.get(from..)?.iter().position(|b| *b == b'\n')? + from;

    for i in offset..buf.len() {
        if buf[i] != b'\n' {
            continue;
        }
        match buf.get(i + 1) {
            Some(b'\n') => return Some((i, i + 2)),
            Some(b'\r') if buf.get(i + 2) == Some(&b'\n') => return Some((i, i + 3)),
            _ => {}
        }
    }
    None
}

/// Decode one frame body (without its terminator)
fn parse_frame(frame: &[u8]) -> Option<SessionEvent> {
    let text = String::from_utf8_lossy(frame);
    let mut event_type: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => event_type = Some(value.to_string()),
            "data" => data_lines.push(value),
            // id/retry carry no meaning for this protocol
            _ => {}
        }
    }

    if data_lines.is_empty() {
        trace!("Skipping SSE frame without data");
        return None;
    }

    let payload = data_lines.join("\n");
    let data: Value = match serde_json::from_str(&payload) {
        Ok(data) => data,
        Err(e) => {
            warn!("Dropping malformed SSE frame ({}): {}", e, truncate(&payload, 200));
            return None;
        }
    };

    let event_type = event_type
        .filter(|t| !t.is_empty())
        .or_else(|| data.get("type").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string());

    Some(SessionEvent::new(event_type, data))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
