//! SSE streaming response parser.
//!
//! Reads an HTTP body as a byte stream, splits on SSE boundaries
//! (`data: …\n\n`), and hands each event's data payload to an [`SseDecoder`]
//! that turns it into zero or more [`ModelChunk`]s.

use std::collections::VecDeque;
use std::fmt::Display;

use futures::stream::{self, Stream, StreamExt};

use super::errors::InferenceError;
use super::types::ModelChunk;

/// Turns one SSE `data:` payload into model chunks.
pub trait SseDecoder: Send {
    fn decode(&mut self, data: &str) -> Result<Vec<ModelChunk>, InferenceError>;
}

// ─── SSE parser ──────────────────────────────────────────────────────────────

/// Parse a streaming HTTP response into `ModelChunk`s.
pub fn parse_sse_stream<D>(
    response: reqwest::Response,
    decoder: D,
) -> impl Stream<Item = Result<ModelChunk, InferenceError>> + Send
where
    D: SseDecoder + 'static,
{
    decode_sse(response.bytes_stream(), decoder)
}

/// Parse any byte stream carrying SSE events.
///
/// Bytes are buffered until a blank line completes an event, so multi-byte
/// characters split across network chunks are decoded intact. `data: [DONE]`
/// ends the stream.
pub fn decode_sse<S, B, E, D>(
    bytes: S,
    decoder: D,
) -> impl Stream<Item = Result<ModelChunk, InferenceError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
    D: SseDecoder + 'static,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        decoder,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.pending.pop_front() {
                return Some((Ok(chunk), state));
            }
            if state.done {
                return None;
            }

            // Check if we have a complete SSE event in the buffer
            if let Some(event) = state.take_event() {
                match state.process_event(&event) {
                    Ok(()) => continue,
                    Err(e) => {
                        state.done = true;
                        return Some((Err(e), state));
                    }
                }
            }

            // Need more data from the stream
            match state.bytes.next().await {
                Some(Ok(chunk)) => state.push_bytes(chunk.as_ref()),
                Some(Err(e)) => {
                    state.done = true;
                    return Some((
                        Err(InferenceError::StreamError {
                            reason: format!("stream read error: {e}"),
                        }),
                        state,
                    ));
                }
                None => {
                    state.done = true;
                    // Stream ended; flush a trailing event without a blank line
                    let rest = std::mem::take(&mut state.buffer);
                    let rest = String::from_utf8_lossy(&rest).trim().to_string();
                    if !rest.is_empty() {
                        if let Err(e) = state.process_event(&rest) {
                            return Some((Err(e), state));
                        }
                    }
                }
            }
        }
    })
}

// ─── Parser State ────────────────────────────────────────────────────────────

struct SseState<S, D> {
    bytes: std::pin::Pin<Box<S>>,
    decoder: D,
    buffer: Vec<u8>,
    pending: VecDeque<ModelChunk>,
    done: bool,
}

impl<S, D: SseDecoder> SseState<S, D> {
    fn push_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
    }

    fn take_event(&mut self) -> Option<String> {
        let end = self.buffer.windows(2).position(|w| w == b"\n\n")?;
        let event: Vec<u8> = self.buffer.drain(..end + 2).collect();
        Some(String::from_utf8_lossy(&event[..end]).into_owned())
    }

    /// Process a single SSE event (may contain multiple `data:` lines).
    fn process_event(&mut self, event: &str) -> Result<(), InferenceError> {
        let mut data = String::new();
        for line in event.lines() {
            if let Some(payload) = line.strip_prefix("data:") {
                let payload = payload.trim();
                if payload == "[DONE]" {
                    self.done = true;
                    return Ok(());
                }
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(payload);
            }
            // Comments, `event:` and `id:` lines are ignored
        }

        if data.is_empty() {
            return Ok(()); // keep-alive
        }
        self.pending.extend(self.decoder.decode(&data)?);
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
