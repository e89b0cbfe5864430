//! Protocol layer for the Messages API: typed stream events, incremental SSE
//! and envelope decoding, and a retrying request executor.
//!
//! Nothing here depends on an HTTP client. The executor drives any attempt
//! function returning [`retry::ResponseMetadata`], and the stream decoders
//! accept any byte or frame stream.
//!
//! ```
//! use bytes::Bytes;
//! use futures::{TryStreamExt as _, stream};
//! use messages_core::{StreamEvent, decode_sse_stream};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), messages_core::ClientError> {
//! let body = stream::iter([Ok::<_, std::io::Error>(Bytes::from_static(
//!     b"event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
//! ))]);
//! let events: Vec<StreamEvent> = decode_sse_stream(body, CancellationToken::new())
//!     .try_collect()
//!     .await?;
//! assert_eq!(events, vec![StreamEvent::MessageStop]);
//! # Ok(())
//! # }
//! ```

/// Frame decoding for the binary event-stream envelope transport.
pub mod envelope;
/// Error codes, payloads and the client error type.
pub mod errors;
/// Stream event kinds and payload types.
pub mod event;
/// Timeout, cancellation and retry around one logical call.
pub mod executor;
/// Process-wide tracing subscriber setup.
pub mod observability;
/// Retry decisions, server-suggested waits and backoff.
pub mod retry;
/// Server-sent events scanning and decoding.
pub mod sse;

pub use envelope::{EnvelopeDecoder, EnvelopeFrame, decode_envelope_stream};
pub use errors::{ClientError, ErrorCode, ErrorEnvelope, ErrorPayload};
pub use event::{
    ContentBlock, ContentDelta, EventKind, MessageDelta, MessageStart, StreamEvent, Usage,
};
pub use executor::{CallOverrides, ExecutorConfig, RequestExecutor};
pub use retry::{
    JitterSource, ResponseMetadata, RetryDecision, RetryPolicy, SeededJitter, StaticResponse,
    ThreadRngJitter,
};
pub use sse::{StreamDecoder, decode_sse_stream, decode_sse_stream_with};
