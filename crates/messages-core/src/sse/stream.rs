use std::fmt;

use bytes::{Buf as _, Bytes, BytesMut};
use futures::StreamExt as _;
use futures::{Stream, stream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::ClientError;
use crate::event::StreamEvent;

use super::decoder::StreamDecoder;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Turns an HTTP body byte stream into decoded events.
///
/// The stream ends after `message_stop` (the body is not read further), at
/// clean EOF, or with the first error. Cancelling `cancel` interrupts a
/// pending read and yields `ClientError::Cancelled`.
pub fn decode_sse_stream<S, E>(
    bytes_stream: S,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<StreamEvent, ClientError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: fmt::Display + Send + 'static,
{
    decode_sse_stream_with(bytes_stream, StreamDecoder::new(), cancel)
}

/// [`decode_sse_stream`] with a caller-configured decoder, e.g. one with a
/// tighter line length limit.
pub fn decode_sse_stream_with<S, E>(
    bytes_stream: S,
    decoder: StreamDecoder,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<StreamEvent, ClientError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: fmt::Display + Send + 'static,
{
    struct State<S> {
        bytes_stream: S,
        buf: BytesMut,
        decoder: StreamDecoder,
        cancel: CancellationToken,
        eof: bool,
    }

    stream::try_unfold(
        State {
            bytes_stream,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            decoder,
            cancel,
            eof: false,
        },
        |mut state| async move {
            loop {
                if state.eof {
                    return Ok(None);
                }

                let (event, consumed) = state.decoder.next(&state.buf)?;
                state.buf.advance(consumed);
                if let Some(event) = event {
                    return Ok(Some((event, state)));
                }
                if state.decoder.is_finished() {
                    return Ok(None);
                }

                let next = tokio::select! {
                    biased;
                    () = state.cancel.cancelled() => {
                        debug!("event stream cancelled while waiting for body bytes");
                        return Err(ClientError::Cancelled);
                    }
                    next = state.bytes_stream.next() => next,
                };
                match next {
                    Some(Ok(chunk)) => {
                        state.buf.extend_from_slice(&chunk);
                    }
                    Some(Err(e)) => {
                        return Err(ClientError::transport(format!(
                            "event stream read failed: {e}"
                        )));
                    }
                    None => {
                        state.eof = true;
                        let tail = state.decoder.finish(&state.buf)?;
                        state.buf.clear();
                        return Ok(tail.map(|event| (event, state)));
                    }
                }
            }
        },
    )
}
