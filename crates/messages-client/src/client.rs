use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, TryStreamExt as _};
use messages_core::retry::ResponseMetadata;
use messages_core::{
    CallOverrides, ClientError, ErrorCode, ErrorEnvelope, ErrorPayload, JitterSource,
    RequestExecutor, StreamDecoder, StreamEvent, decode_sse_stream_with,
};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ClientConfig;
use crate::options::RequestOptions;
use crate::request::{MessageRequest, MessageResponse};

/// Decoded events of one streaming call.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ClientError>> + Send>>;

type ByteStream =
    Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static>>;

const API_KEY_HEADER: &str = "x-api-key";
const API_VERSION_HEADER: &str = "anthropic-version";

/// Retry view of an HTTP response.
struct HttpAttempt(reqwest::Response);

impl ResponseMetadata for HttpAttempt {
    fn status(&self) -> u16 {
        self.0.status().as_u16()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.0.headers().get(name).and_then(|v| v.to_str().ok())
    }
}

/// Messages API client.
///
/// Every call runs through a [`RequestExecutor`]: attempts get the configured
/// (or overridden) deadline, retryable responses are retried with backoff,
/// and the caller's token cancels waits and reads.
#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
    config: ClientConfig,
    executor: RequestExecutor,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        if config.api_key.trim().is_empty() {
            return Err(ClientError::Config(
                "client config api_key must not be empty".into(),
            ));
        }
        // Deadlines are per attempt and enforced by the executor.
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        let executor = RequestExecutor::new(config.executor_config());
        Ok(Self {
            http,
            config,
            executor,
        })
    }

    /// Creates a client using `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Replaces the backoff jitter source.
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.executor = self.executor.with_jitter(jitter);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends a non-streaming request and decodes the full response.
    pub async fn create(
        &self,
        mut request: MessageRequest,
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<MessageResponse, ClientError> {
        request.stream = None;
        let overrides = options.call_overrides();
        let response = self.send(&request, options, &overrides, cancel).await?;
        let body = self.read_body(response, &overrides, cancel).await?;
        serde_json::from_slice(&body).map_err(|e| {
            ClientError::malformed("message", format!("invalid response body: {e}"))
        })
    }

    /// Sends a streaming request and returns the decoded event stream.
    ///
    /// Retries and the deadline cover the request up to response headers.
    /// The body is then read until `message_stop`, an error, or `cancel`.
    pub async fn create_stream(
        &self,
        mut request: MessageRequest,
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<EventStream, ClientError> {
        request.stream = Some(true);
        let overrides = options.call_overrides();
        let response = self.send(&request, options, &overrides, cancel).await?;
        let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
        let decoder = StreamDecoder::new().with_max_line_len(self.config.max_line_len);
        Ok(Box::pin(decode_sse_stream_with(
            bytes_stream,
            decoder,
            cancel.clone(),
        )))
    }

    async fn send(
        &self,
        request: &MessageRequest,
        options: &RequestOptions,
        overrides: &CallOverrides,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ClientError> {
        let request_json = Bytes::from(serde_json::to_vec(request).map_err(|e| {
            ClientError::Config(format!("failed to serialize request: {e}"))
        })?);
        let headers = self.request_headers(options)?;
        let url = self.config.messages_url();
        debug!(model = %request.model, stream = request.stream.unwrap_or(false), "sending messages request");

        let HttpAttempt(response) = self
            .executor
            .execute(overrides, cancel, |_attempt| {
                let http_req = self
                    .http
                    .post(&url)
                    .headers(headers.clone())
                    .body(request_json.clone());
                async move {
                    http_req.send().await.map(HttpAttempt).map_err(|e| {
                        ClientError::transport(format!("messages request failed: {e}"))
                    })
                }
            })
            .await?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(response);
        }
        let body = self.read_body(response, overrides, cancel).await?;
        let mut err = upstream_error(status, &body);
        if self.config.include_request_json_on_invalid_request
            && let ClientError::Upstream {
                code: ErrorCode::InvalidRequest,
                message,
                ..
            } = &mut err
        {
            message.push_str(". Request: ");
            message.push_str(&String::from_utf8_lossy(&request_json));
        }
        Err(err)
    }

    /// Reads a whole body under the call's deadline, without retry.
    async fn read_body(
        &self,
        response: reqwest::Response,
        overrides: &CallOverrides,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ClientError> {
        self.executor
            .run_with_deadline(overrides, cancel, |_attempt| async move {
                response
                    .bytes()
                    .await
                    .map_err(|e| ClientError::transport(format!("response body read failed: {e}")))
            })
            .await
    }

    /// Default headers followed by per-call overrides, rebuilt for every call.
    fn request_headers(&self, options: &RequestOptions) -> Result<HeaderMap, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(API_KEY_HEADER),
            header_value(API_KEY_HEADER, &self.config.api_key)?,
        );
        headers.insert(
            HeaderName::from_static(API_VERSION_HEADER),
            header_value(API_VERSION_HEADER, &self.config.api_version)?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &options.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ClientError::Config(format!("invalid header name {name:?}: {e}")))?;
            headers.insert(header_name, header_value(name, value)?);
        }
        Ok(headers)
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, ClientError> {
    HeaderValue::from_str(value)
        .map_err(|e| ClientError::Config(format!("invalid value for header {name}: {e}")))
}

/// Classifies a non-success response body.
pub(crate) fn upstream_error(status: u16, body: &[u8]) -> ClientError {
    match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(envelope) => ClientError::upstream(envelope.error, Some(status)),
        Err(_) => ClientError::upstream(
            ErrorPayload {
                kind: "unknown".into(),
                message: format!(
                    "response data is invalid error json: {}",
                    String::from_utf8_lossy(body)
                ),
            },
            Some(status),
        ),
    }
}

/// Concatenates the text deltas of a stream.
pub async fn collect_text<S>(stream: S) -> Result<String, ClientError>
where
    S: Stream<Item = Result<StreamEvent, ClientError>>,
{
    stream
        .try_fold(String::new(), |mut text, event| async move {
            if let Some(delta) = event.text_delta() {
                text.push_str(delta);
            }
            Ok(text)
        })
        .await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use messages_core::{EventKind, SeededJitter};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::request::models;

    const SSE_BODY: &str = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"type\":\"message\",\"role\":\"assistant\",\"content\":[],\"model\":\"claude-3-opus-20240229\",\"stop_reason\":null,\"stop_sequence\":null,\"usage\":{\"input_tokens\":10,\"output_tokens\":1}}}\n\n",
        "event: content_block_start\n",
        "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
        "event: ping\n",
        "data: {\"type\": \"ping\"}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
        "event: content_block_stop\n",
        "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\",\"stop_sequence\":null},\"usage\":{\"output_tokens\":2}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );

    fn message_json(text: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": text}],
            "model": "claude-3-opus-20240229",
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": {"input_tokens": 10, "output_tokens": 3}
        })
    }

    fn error_json(kind: &str, message: &str) -> serde_json::Value {
        serde_json::json!({"type": "error", "error": {"type": kind, "message": message}})
    }

    fn client(server: &MockServer, config: impl FnOnce(ClientConfig) -> ClientConfig) -> Client {
        let config = config(ClientConfig::new("sk-test").base_url(server.uri()));
        Client::new(config)
            .expect("client")
            .with_jitter(Arc::new(SeededJitter::new(3)))
    }

    fn hello_request() -> MessageRequest {
        MessageRequest::new(models::CLAUDE_3_OPUS, 64).user_text("Hello")
    }

    #[tokio::test]
    async fn create_sends_default_headers_and_decodes_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-test"))
            .and(header("anthropic-version", "2023-06-01"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(message_json("Hi there")))
            .expect(1)
            .mount(&server)
            .await;

        let response = client(&server, |c| c)
            .create(hello_request(), &RequestOptions::default(), &CancellationToken::new())
            .await
            .expect("create");
        assert_eq!(response.text(), "Hi there");

        let requests = server.received_requests().await.expect("recorded");
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).expect("json");
        assert!(body.get("stream").is_none());
        assert_eq!(body["model"], "claude-3-opus-20240229");
    }

    #[tokio::test]
    async fn override_headers_replace_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("anthropic-version", "2024-01-01"))
            .and(header("anthropic-beta", "tools-2024-04-04"))
            .respond_with(ResponseTemplate::new(200).set_body_json(message_json("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let options = RequestOptions::default()
            .header("anthropic-version", "2024-01-01")
            .header("anthropic-beta", "tools-2024-04-04");
        client(&server, |c| c)
            .create(hello_request(), &options, &CancellationToken::new())
            .await
            .expect("create");

        let requests = server.received_requests().await.expect("recorded");
        let versions: Vec<_> = requests[0].headers.get_all("anthropic-version").iter().collect();
        assert_eq!(versions.len(), 1);
    }

    #[tokio::test]
    async fn retryable_status_is_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after-ms", "10")
                    .set_body_json(error_json("rate_limit_error", "slow down")),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(message_json("after retry")))
            .expect(1)
            .mount(&server)
            .await;

        let response = client(&server, |c| c)
            .create(hello_request(), &RequestOptions::default(), &CancellationToken::new())
            .await
            .expect("create");
        assert_eq!(response.text(), "after retry");
    }

    #[tokio::test]
    async fn exhausted_retries_surface_last_error_with_status_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(529)
                    .insert_header("retry-after-ms", "1")
                    .set_body_json(error_json("overloaded_error", "Overloaded")),
            )
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server, |c| c)
            .create(hello_request(), &RequestOptions::default(), &CancellationToken::new())
            .await
            .expect_err("overloaded");
        assert_eq!(err.code(), Some(ErrorCode::Overloaded));
        assert_eq!(err.to_string(), "overloaded_error: Overloaded");
    }

    #[tokio::test]
    async fn should_retry_false_is_honored() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(500)
                    .insert_header("x-should-retry", "false")
                    .set_body_json(error_json("api_error", "boom")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server, |c| c)
            .create(hello_request(), &RequestOptions::default(), &CancellationToken::new())
            .await
            .expect_err("api error");
        assert_eq!(err.code(), Some(ErrorCode::Api));
    }

    #[tokio::test]
    async fn invalid_request_can_include_request_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(error_json("invalid_request_error", "max_tokens: required")),
            )
            .mount(&server)
            .await;

        let err = client(&server, |c| c.include_request_json_on_invalid_request(true))
            .create(hello_request(), &RequestOptions::default(), &CancellationToken::new())
            .await
            .expect_err("invalid request");
        let ClientError::Upstream { code, message, status, .. } = err else {
            panic!("expected upstream error, got {err:?}");
        };
        assert_eq!(code, ErrorCode::InvalidRequest);
        assert_eq!(status, Some(400));
        assert!(message.starts_with("max_tokens: required. Request: {"), "{message}");
        assert!(message.contains("\"model\":\"claude-3-opus-20240229\""), "{message}");
    }

    #[tokio::test]
    async fn invalid_error_body_is_reported_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        let err = client(&server, |c| c)
            .create(hello_request(), &RequestOptions::default(), &CancellationToken::new())
            .await
            .expect_err("not found");
        assert_eq!(err.code(), Some(ErrorCode::NotFound));
        assert!(err.to_string().contains("<html>nope</html>"));
    }

    #[tokio::test]
    async fn slow_response_times_out_with_configured_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(message_json("late"))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let options = RequestOptions::default().timeout(Duration::from_millis(100));
        let err = client(&server, |c| c)
            .create(hello_request(), &options, &CancellationToken::new())
            .await
            .expect_err("timeout");
        assert_eq!(
            err,
            ClientError::Timeout {
                configured: Duration::from_millis(100)
            }
        );
    }

    #[tokio::test]
    async fn create_stream_decodes_sse_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(SSE_BODY),
            )
            .expect(1)
            .mount(&server)
            .await;

        let events: Vec<StreamEvent> = client(&server, |c| c)
            .create_stream(hello_request(), &RequestOptions::default(), &CancellationToken::new())
            .await
            .expect("stream")
            .try_collect()
            .await
            .expect("events");
        assert_eq!(events.len(), 8);
        assert_eq!(events.last().map(StreamEvent::kind), Some(EventKind::MessageStop));
        let text: String = events.iter().filter_map(StreamEvent::text_delta).collect();
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn collect_text_stops_at_stream_error() {
        let server = MockServer::start().await;
        let body = concat!(
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"partial\"}}\n\n",
            "event: error\n",
            "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let stream = client(&server, |c| c)
            .create_stream(hello_request(), &RequestOptions::default(), &CancellationToken::new())
            .await
            .expect("stream");
        let err = collect_text(stream).await.expect_err("error event");
        assert_eq!(err.code(), Some(ErrorCode::Overloaded));
    }

    #[tokio::test]
    async fn configured_line_limit_applies_to_stream_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SSE_BODY))
            .mount(&server)
            .await;

        let stream = client(&server, |c| c.max_line_len(64))
            .create_stream(hello_request(), &RequestOptions::default(), &CancellationToken::new())
            .await
            .expect("stream");
        let err = collect_text(stream).await.expect_err("message_start line is too long");
        assert!(matches!(err, ClientError::MalformedStream { ref kind, .. } if kind == "line"));
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let err = Client::new(ClientConfig::new("  ")).expect_err("empty key");
        assert!(matches!(err, ClientError::Config(_)));
    }
}
