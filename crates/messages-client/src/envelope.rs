//! Adapters for model hosting gateways that wrap the Messages API.
//!
//! The gateway's own SDK owns signing and the binary stream framing. These
//! helpers cover the parts that follow the Messages protocol: the request
//! body, the non-streaming response body and the demultiplexed event frames.
use std::fmt;

use futures::Stream;
use messages_core::{ClientError, EnvelopeFrame, decode_envelope_stream};
use tokio_util::sync::CancellationToken;

use crate::client::{EventStream, upstream_error};
use crate::request::{MessageRequest, MessageResponse};

/// Version tag most gateways expect in place of `model`.
pub const GATEWAY_API_VERSION: &str = "bedrock-2023-05-31";

/// Serializes `request` for a gateway invocation.
///
/// The gateway selects the model from its own request parameters, so the
/// `model` field is sent as `anthropic_version` instead, and `stream` is
/// dropped.
pub fn invoke_body(request: &MessageRequest) -> Result<Vec<u8>, ClientError> {
    let mut body = serde_json::to_value(request)
        .map_err(|e| ClientError::Config(format!("failed to serialize request: {e}")))?;
    if let Some(fields) = body.as_object_mut() {
        fields.remove("stream");
        if let Some(model) = fields.remove("model") {
            fields.insert("anthropic_version".to_string(), model);
        }
    }
    serde_json::to_vec(&body)
        .map_err(|e| ClientError::Config(format!("failed to serialize request: {e}")))
}

/// Decodes the body of a non-streaming invocation.
pub fn decode_invoke_response(status: u16, body: &[u8]) -> Result<MessageResponse, ClientError> {
    if status != 200 {
        return Err(upstream_error(status, body));
    }
    serde_json::from_slice(body)
        .map_err(|e| ClientError::malformed("message", format!("invalid response body: {e}")))
}

/// Decodes demultiplexed envelope frames into an [`EventStream`].
pub fn stream_from_frames<S, E>(frames: S, cancel: CancellationToken) -> EventStream
where
    S: Stream<Item = Result<EnvelopeFrame, E>> + Send + Unpin + 'static,
    E: fmt::Display + Send + 'static,
{
    Box::pin(decode_envelope_stream(frames, cancel))
}
