//! Event reader - background task pumping SSE frames into a channel
//!
//! The reader runs on its own tokio task so a long blocking read never stalls
//! the runner that consumes its events. Events go through an unbounded
//! channel: the reader never waits on its consumer and order is preserved.

use crate::error::{SessionError, SessionResult};
use crate::sse::{SseDecoder, MAX_PENDING_FRAME_BYTES};
use crate::types::SessionEvent;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Where decoded events are delivered
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Handle to a running event subscription
///
/// Stopping (or dropping) the handle aborts the read loop; the receiving
/// side then observes the channel closing.
#[derive(Debug)]
pub struct EventReader {
    handle: JoinHandle<()>,
}

impl EventReader {
    /// Run `read_loop` on its own task
    pub fn spawn<F>(read_loop: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(read_loop),
        }
    }

    /// Abort the read loop; safe to call repeatedly
    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for EventReader {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Feed a byte stream through the SSE decoder into `sink`
///
/// Returns the number of events forwarded once the stream ends or the
/// receiver is gone. A transport error, or an unterminated frame larger than
/// `MAX_PENDING_FRAME_BYTES`, ends the stream with `SessionError::Stream`.
pub async fn forward_stream<S, B, E>(stream: S, sink: &EventSender) -> SessionResult<usize>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    forward_stream_with_limit(stream, sink, MAX_PENDING_FRAME_BYTES).await
}

/// `forward_stream` with an explicit cap on the unterminated frame
pub async fn forward_stream_with_limit<S, B, E>(
    stream: S,
    sink: &EventSender,
    max_pending: usize,
) -> SessionResult<usize>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    futures::pin_mut!(stream);
    let mut decoder = SseDecoder::with_limit(max_pending);
    let mut forwarded = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| SessionError::Stream(e.to_string()))?;

        for event in decoder.push(chunk.as_ref()) {
            if sink.send(event).is_err() {
                debug!("Event receiver dropped, stopping reader");
                return Ok(forwarded);
            }
            forwarded += 1;
        }

        if let Err(e) = decoder.check_limit() {
            warn!("Dropping event stream after {} events: {}", forwarded, e);
            return Err(e);
        }
    }

    if decoder.pending() > 0 {
        debug!("Event stream closed with {} unterminated bytes", decoder.pending());
    }
    Ok(forwarded)
}
