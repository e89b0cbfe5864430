//! Async client for the Messages API with retries, per-attempt deadlines,
//! cancellation and typed streaming events.
//!
//! ```no_run
//! use messages_client::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let client = Client::from_env()?;
//! let request = MessageRequest::new(models::CLAUDE_3_OPUS, 256).user_text("Say hello");
//!
//! let stream = client
//!     .create_stream(request, &RequestOptions::default(), &CancellationToken::new())
//!     .await?;
//! println!("{}", collect_text(stream).await?);
//! # Ok(())
//! # }
//! ```

/// HTTP client and streaming entry points.
pub mod client;
/// Client configuration.
pub mod config;
/// Helpers for gateways carrying Messages payloads in event-stream envelopes.
pub mod envelope;
/// Per-call request options.
pub mod options;
/// Common imports for typical usage.
pub mod prelude;
/// Request and response bodies.
pub mod request;

pub use client::{Client, EventStream, collect_text};
pub use config::ClientConfig;
pub use options::RequestOptions;
pub use request::{
    ImageSource, Message, MessageContent, MessageRequest, MessageResponse, Metadata, Role,
};
