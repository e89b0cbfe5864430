//! Common imports for typical client usage.
pub use crate::request::models;
pub use crate::{
    Client, ClientConfig, EventStream, Message, MessageContent, MessageRequest, MessageResponse,
    RequestOptions, Role, collect_text,
};
pub use messages_core::{ClientError, ContentBlock, ContentDelta, ErrorCode, StreamEvent};
