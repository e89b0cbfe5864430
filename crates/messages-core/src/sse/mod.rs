//! Server-sent event transport: line scanning, per-line decoding and the
//! async body adapter.
mod decoder;
mod scanner;
mod stream;

pub use decoder::{DEFAULT_MAX_LINE_LEN, StreamDecoder};
pub use scanner::{FrameScanner, SseLine};
pub use stream::{decode_sse_stream, decode_sse_stream_with};
