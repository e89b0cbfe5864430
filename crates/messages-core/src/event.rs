use std::fmt;

use serde::de::IgnoredAny;

use crate::errors::{ClientError, ErrorEnvelope};

/// Wire name of a stream event, as carried on `event:` lines or in the
/// payload's `type` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ping,
    MessageStart,
    MessageDelta,
    MessageStop,
    ContentBlockStart,
    ContentBlockDelta,
    ContentBlockStop,
    /// Stream-reported failure; always terminal.
    Error,
}

impl EventKind {
    /// All kinds in wire order.
    pub const ALL: [EventKind; 8] = [
        EventKind::Ping,
        EventKind::MessageStart,
        EventKind::MessageDelta,
        EventKind::MessageStop,
        EventKind::ContentBlockStart,
        EventKind::ContentBlockDelta,
        EventKind::ContentBlockStop,
        EventKind::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::MessageStart => "message_start",
            Self::MessageDelta => "message_delta",
            Self::MessageStop => "message_stop",
            Self::ContentBlockStart => "content_block_start",
            Self::ContentBlockDelta => "content_block_delta",
            Self::ContentBlockStop => "content_block_stop",
            Self::Error => "error",
        }
    }

    /// Classifies an event name. Unrecognized names return `None`.
    ///
    /// The default build peeks at the bytes that tell the names apart; the
    /// `exact-event-names` feature compares the whole name instead.
    pub fn from_name(name: &[u8]) -> Option<Self> {
        #[cfg(not(feature = "exact-event-names"))]
        {
            classify_by_offsets(name)
        }
        #[cfg(feature = "exact-event-names")]
        {
            classify_exact(name)
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Every name is identified by its length, first byte and (for the
// `message_*` / `content_block_*` families) the third byte of the suffix:
// st[a]rt, st[o]p, de[l]ta. The pick is then confirmed against the full name
// so unknown names of the same shape are rejected.
#[cfg_attr(feature = "exact-event-names", allow(dead_code))]
pub(crate) fn classify_by_offsets(name: &[u8]) -> Option<EventKind> {
    pick_by_offsets(name).filter(|kind| kind.as_str().as_bytes() == name)
}

#[cfg_attr(feature = "exact-event-names", allow(dead_code))]
fn pick_by_offsets(name: &[u8]) -> Option<EventKind> {
    match (name.first().copied()?, name.len()) {
        (b'p', 4) => Some(EventKind::Ping),
        (b'e', 5) => Some(EventKind::Error),
        (b'm', 12 | 13) => match (name.get(10).copied()?, name.len()) {
            (b'a', 13) => Some(EventKind::MessageStart),
            (b'o', 12) => Some(EventKind::MessageStop),
            (b'l', 13) => Some(EventKind::MessageDelta),
            _ => None,
        },
        (b'c', 18 | 19) => match (name.get(16).copied()?, name.len()) {
            (b'a', 19) => Some(EventKind::ContentBlockStart),
            (b'o', 18) => Some(EventKind::ContentBlockStop),
            (b'l', 19) => Some(EventKind::ContentBlockDelta),
            _ => None,
        },
        _ => None,
    }
}

#[cfg_attr(not(feature = "exact-event-names"), allow(dead_code))]
pub(crate) fn classify_exact(name: &[u8]) -> Option<EventKind> {
    EventKind::ALL
        .into_iter()
        .find(|kind| kind.as_str().as_bytes() == name)
}

/// Token accounting reported on `message_start` and `message_delta`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

/// Content block opened by `content_block_start`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    /// Block type this client does not model.
    #[serde(other)]
    Unknown,
}

/// Incremental update to an open content block.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Unknown,
}

/// Body of `message_start`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MessageStart {
    pub id: String,
    pub model: String,
    pub role: String,
    /// Normally null at stream start.
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub usage: Usage,
}

/// Final stop information carried by `message_delta`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageDelta {
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

/// One decoded protocol event.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Ping,
    MessageStart(MessageStart),
    MessageDelta(MessageDelta),
    /// Success-terminal: nothing follows it.
    MessageStop,
    ContentBlockStart { index: u32, block: ContentBlock },
    ContentBlockDelta { index: u32, delta: ContentDelta },
    ContentBlockStop { index: u32 },
}

impl StreamEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Ping => EventKind::Ping,
            Self::MessageStart(_) => EventKind::MessageStart,
            Self::MessageDelta(_) => EventKind::MessageDelta,
            Self::MessageStop => EventKind::MessageStop,
            Self::ContentBlockStart { .. } => EventKind::ContentBlockStart,
            Self::ContentBlockDelta { .. } => EventKind::ContentBlockDelta,
            Self::ContentBlockStop { .. } => EventKind::ContentBlockStop,
        }
    }

    /// Text of a `text_delta`, if this is one.
    pub fn text_delta(&self) -> Option<&str> {
        match self {
            Self::ContentBlockDelta {
                delta: ContentDelta::TextDelta { text },
                ..
            } => Some(text),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MessageStop)
    }
}

#[derive(serde::Deserialize)]
struct MessageStartFrame {
    message: MessageStart,
}

#[derive(serde::Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    stop_sequence: Option<String>,
}

#[derive(serde::Deserialize)]
struct MessageDeltaFrame {
    delta: MessageDeltaBody,
    #[serde(default)]
    usage: Usage,
}

#[derive(serde::Deserialize)]
struct ContentBlockStartFrame {
    index: u32,
    content_block: ContentBlock,
}

#[derive(serde::Deserialize)]
struct ContentBlockDeltaFrame {
    index: u32,
    delta: ContentDelta,
}

#[derive(serde::Deserialize)]
struct ContentBlockStopFrame {
    index: u32,
}

/// Decodes one JSON payload whose kind is already known.
///
/// Shared by the SSE and envelope transports. An `error` payload is returned
/// as `ClientError::Upstream`; invalid JSON as `ClientError::MalformedStream`.
pub fn decode_payload(kind: EventKind, payload: &[u8]) -> Result<StreamEvent, ClientError> {
    let malformed = |e: serde_json::Error| ClientError::malformed(kind.as_str(), e.to_string());
    match kind {
        EventKind::Ping => {
            serde_json::from_slice::<IgnoredAny>(payload).map_err(malformed)?;
            Ok(StreamEvent::Ping)
        }
        EventKind::MessageStart => {
            let frame: MessageStartFrame = serde_json::from_slice(payload).map_err(malformed)?;
            Ok(StreamEvent::MessageStart(frame.message))
        }
        EventKind::MessageDelta => {
            let frame: MessageDeltaFrame = serde_json::from_slice(payload).map_err(malformed)?;
            Ok(StreamEvent::MessageDelta(MessageDelta {
                stop_reason: frame.delta.stop_reason,
                stop_sequence: frame.delta.stop_sequence,
                usage: frame.usage,
            }))
        }
        EventKind::MessageStop => {
            serde_json::from_slice::<IgnoredAny>(payload).map_err(malformed)?;
            Ok(StreamEvent::MessageStop)
        }
        EventKind::ContentBlockStart => {
            let frame: ContentBlockStartFrame =
                serde_json::from_slice(payload).map_err(malformed)?;
            Ok(StreamEvent::ContentBlockStart {
                index: frame.index,
                block: frame.content_block,
            })
        }
        EventKind::ContentBlockDelta => {
            let frame: ContentBlockDeltaFrame =
                serde_json::from_slice(payload).map_err(malformed)?;
            Ok(StreamEvent::ContentBlockDelta {
                index: frame.index,
                delta: frame.delta,
            })
        }
        EventKind::ContentBlockStop => {
            let frame: ContentBlockStopFrame =
                serde_json::from_slice(payload).map_err(malformed)?;
            Ok(StreamEvent::ContentBlockStop { index: frame.index })
        }
        EventKind::Error => {
            let envelope: ErrorEnvelope = serde_json::from_slice(payload).map_err(malformed)?;
            Err(ClientError::upstream(envelope.error, None))
        }
    }
}
