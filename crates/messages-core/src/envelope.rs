//! Decoding for the binary event-stream envelope used by managed model
//! hosting gateways.
//!
//! The outer transport demultiplexes the binary framing; each frame handed
//! to [`EnvelopeDecoder`] carries exactly one JSON payload shaped like an SSE
//! `data:` line, with no `event:` line in front of it.
use std::fmt;

use bytes::Bytes;
use futures::StreamExt as _;
use futures::{Stream, stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::errors::{ClientError, ErrorPayload};
use crate::event::{EventKind, StreamEvent, decode_payload};

const TYPE_PREFIX: &[u8] = br#"{"type":""#;
const TYPE_KEY: &[u8] = br#""type""#;
/// Kind sniffing never looks further into a payload than this.
const SNIFF_WINDOW: usize = 64;

/// One demultiplexed envelope frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnvelopeFrame {
    /// Payload part carrying one event.
    Chunk {
        payload: Bytes,
        /// Kind taken from a frame header, when the transport exposes one.
        kind: Option<EventKind>,
    },
    /// Exception frame raised by the gateway itself.
    Exception {
        exception_type: String,
        message: String,
    },
}

impl EnvelopeFrame {
    /// Payload frame whose kind is sniffed from the payload.
    pub fn chunk(payload: impl Into<Bytes>) -> Self {
        Self::Chunk {
            payload: payload.into(),
            kind: None,
        }
    }

    /// Payload frame with an explicit kind.
    pub fn chunk_with_kind(payload: impl Into<Bytes>, kind: EventKind) -> Self {
        Self::Chunk {
            payload: payload.into(),
            kind: Some(kind),
        }
    }
}

/// Per-frame decoder sharing the SSE transport's payload schemas.
#[derive(Debug, Default)]
pub struct EnvelopeDecoder {
    finished: bool,
}

impl EnvelopeDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `message_stop` has been decoded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decodes one frame. Frames whose kind cannot be determined, and frames
    /// after `message_stop`, yield `Ok(None)`.
    pub fn decode(&mut self, frame: &EnvelopeFrame) -> Result<Option<StreamEvent>, ClientError> {
        if self.finished {
            return Ok(None);
        }
        match frame {
            EnvelopeFrame::Exception {
                exception_type,
                message,
            } => Err(ClientError::upstream(
                ErrorPayload {
                    kind: exception_type.clone(),
                    message: message.clone(),
                },
                None,
            )),
            EnvelopeFrame::Chunk { payload, kind } => {
                let Some(kind) = kind.or_else(|| sniff_kind(payload)) else {
                    trace!(len = payload.len(), "skipping envelope frame of unknown kind");
                    return Ok(None);
                };
                let event = decode_payload(kind, payload)?;
                if event.is_terminal() {
                    self.finished = true;
                }
                Ok(Some(event))
            }
        }
    }
}

/// Reads the payload's top-level `type` without parsing the document.
///
/// Payloads normally start with `{"type":"`, so the name begins at byte 9.
/// Otherwise the first `"type"` key inside the sniff window is used.
pub fn sniff_kind(payload: &[u8]) -> Option<EventKind> {
    let window = &payload[..payload.len().min(SNIFF_WINDOW)];
    let value_start = if window.starts_with(TYPE_PREFIX) {
        TYPE_PREFIX.len()
    } else {
        locate_type_value(window)?
    };
    let rest = window.get(value_start..)?;
    let end = rest.iter().position(|&b| b == b'"')?;
    EventKind::from_name(&rest[..end])
}

fn locate_type_value(window: &[u8]) -> Option<usize> {
    let key_end = window
        .windows(TYPE_KEY.len())
        .position(|w| w == TYPE_KEY)?
        + TYPE_KEY.len();
    let mut i = skip_whitespace(window, key_end);
    if *window.get(i)? != b':' {
        return None;
    }
    i = skip_whitespace(window, i + 1);
    if *window.get(i)? != b'"' {
        return None;
    }
    Some(i + 1)
}

fn skip_whitespace(buf: &[u8], mut i: usize) -> usize {
    while buf.get(i).is_some_and(u8::is_ascii_whitespace) {
        i += 1;
    }
    i
}

/// Turns a stream of envelope frames into decoded events.
///
/// Same termination rules as [`crate::sse::decode_sse_stream`]: ends after
/// `message_stop`, at the end of the frame stream, or with the first error.
pub fn decode_envelope_stream<S, E>(
    frames: S,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<StreamEvent, ClientError>> + Send
where
    S: Stream<Item = Result<EnvelopeFrame, E>> + Send + Unpin + 'static,
    E: fmt::Display + Send + 'static,
{
    struct State<S> {
        frames: S,
        decoder: EnvelopeDecoder,
        cancel: CancellationToken,
    }

    stream::try_unfold(
        State {
            frames,
            decoder: EnvelopeDecoder::new(),
            cancel,
        },
        |mut state| async move {
            loop {
                if state.decoder.is_finished() {
                    return Ok(None);
                }
                let next = tokio::select! {
                    biased;
                    () = state.cancel.cancelled() => {
                        debug!("envelope stream cancelled while waiting for a frame");
                        return Err(ClientError::Cancelled);
                    }
                    next = state.frames.next() => next,
                };
                match next {
                    Some(Ok(frame)) => {
                        if let Some(event) = state.decoder.decode(&frame)? {
                            return Ok(Some((event, state)));
                        }
                    }
                    Some(Err(e)) => {
                        return Err(ClientError::transport(format!(
                            "envelope stream read failed: {e}"
                        )));
                    }
                    None => return Ok(None),
                }
            }
        },
    )
}
