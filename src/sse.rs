//! Server-Sent Events (SSE) processing for streamed chat responses.
//!
//! The inference service answers a streaming chat request with a
//! `text/event-stream` body.  Each event carries one JSON chunk on its `data:`
//! lines.  This module turns the raw byte stream into the ordered sequence of
//! text fragments the model produced, ending when the service signals
//! completion.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::observability::{STREAM_BYTES, STREAM_ERRORS, STREAM_FRAGMENTS};

/// A decoded event payload.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Chunk {
    /// A fragment of answer text.
    Text(String),
    /// The service finished the answer.
    Done,
}

struct SseState<S> {
    stream: S,
    buffer: Vec<u8>,
    finished: bool,
}

/// Process a stream of bytes into a stream of answer fragments.
///
/// Fragments are yielded in wire order and never merged or reordered.  Events
/// without text (keep-alives, comments, metadata) are skipped.  The first
/// error ends the stream.
pub fn process_sse<S, E>(byte_stream: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let state = SseState {
        stream: byte_stream,
        buffer: Vec::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            // First check if we have a complete event in the buffer
            if let Some(block) = take_event(&mut state.buffer) {
                match parse_event(&block) {
                    Ok(Some(Chunk::Text(text))) => {
                        STREAM_FRAGMENTS.click();
                        return Some((Ok(text), state));
                    }
                    Ok(Some(Chunk::Done)) => return None,
                    Ok(None) => continue,
                    Err(err) => {
                        STREAM_ERRORS.click();
                        state.finished = true;
                        return Some((Err(err), state));
                    }
                }
            }

            // Read more data
            match state.stream.next().await {
                Some(Ok(bytes)) => {
                    STREAM_BYTES.count(bytes.len() as u64);
                    state
                        .buffer
                        .extend(bytes.iter().copied().filter(|b| *b != b'\r'));
                }
                Some(Err(err)) => {
                    STREAM_ERRORS.click();
                    state.finished = true;
                    return Some((
                        Err(Error::streaming(
                            format!("Error in HTTP stream: {err}"),
                            Some(Box::new(err)),
                        )),
                        state,
                    ));
                }
                None => {
                    // End of stream; a final event may lack its blank line.
                    state.finished = true;
                    let rest = std::mem::take(&mut state.buffer);
                    return match parse_event(&rest) {
                        Ok(Some(Chunk::Text(text))) => {
                            STREAM_FRAGMENTS.click();
                            Some((Ok(text), state))
                        }
                        Ok(_) => None,
                        Err(err) => {
                            STREAM_ERRORS.click();
                            Some((Err(err), state))
                        }
                    };
                }
            }
        }
    })
}

/// Removes the first complete event (terminated by a blank line) from the buffer.
fn take_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = buffer.windows(2).position(|w| w == b"\n\n")?;
    let mut block: Vec<u8> = buffer.drain(..end + 2).collect();
    block.truncate(end);
    Some(block)
}

/// Parses one event block into a chunk.
///
/// Returns `Ok(None)` for events that carry no answer text.
fn parse_event(block: &[u8]) -> Result<Option<Chunk>> {
    let text = std::str::from_utf8(block)?;
    let mut event_type = None;
    let mut data = Vec::new();
    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "data" => data.push(value),
            "event" => event_type = Some(value),
            _ => {}
        }
    }
    if data.is_empty() {
        return Ok(None);
    }
    let data = data.join("\n");

    if event_type == Some("error") {
        return Err(Error::streaming(
            format!("remote model reported an error: {data}"),
            None,
        ));
    }
    if data.trim() == "[DONE]" {
        return Ok(Some(Chunk::Done));
    }

    let value: Value = serde_json::from_str(&data).map_err(|err| {
        Error::encoding(format!("invalid JSON in stream: {err}"), Some(Box::new(err)))
    })?;
    parse_chunk(&value)
}

/// Extracts answer text from a decoded JSON chunk.
///
/// Two shapes are understood: the generic format nests text under
/// `message.content[*].text`, the cohere format puts it in `text`.  A chunk
/// carrying `finishReason` ends the answer; in the cohere format it repeats the
/// whole answer, so its text is not emitted again.
fn parse_chunk(value: &Value) -> Result<Option<Chunk>> {
    if value.get("finishReason").is_some_and(|reason| !reason.is_null()) {
        return Ok(Some(Chunk::Done));
    }
    if let Some(text) = value.get("text").and_then(Value::as_str) {
        return Ok(non_empty(text.to_string()));
    }
    if let Some(content) = value.pointer("/message/content").and_then(Value::as_array) {
        let text: String = content
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect();
        return Ok(non_empty(text));
    }
    if let (Some(code), Some(message)) = (
        value.get("code").and_then(Value::as_str),
        value.get("message").and_then(Value::as_str),
    ) {
        return Err(Error::streaming(format!("{code}: {message}"), None));
    }
    Ok(None)
}

fn non_empty(text: String) -> Option<Chunk> {
    if text.is_empty() {
        None
    } else {
        Some(Chunk::Text(text))
    }
}
