use tracing::trace;

use crate::errors::ClientError;
use crate::event::{StreamEvent, decode_payload};

use super::scanner::{FrameScanner, SseLine};

/// Longest line accepted before the stream is rejected as malformed.
pub const DEFAULT_MAX_LINE_LEN: usize = 8 * 1024 * 1024;

/// Incremental SSE decoder.
///
/// Callers feed the unconsumed part of their buffer to [`StreamDecoder::next`]
/// and discard the reported number of bytes. The next call must pass those
/// remaining bytes followed by any new ones, because the decoder resumes its
/// newline search where the previous call stopped. An instance is
/// single-consumer: the `&mut self` API rules out concurrent calls.
#[derive(Debug)]
pub struct StreamDecoder {
    scanner: FrameScanner,
    finished: bool,
    /// Leading bytes of the pending line already searched for `\n`.
    scanned: usize,
    max_line_len: usize,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self {
            scanner: FrameScanner::new(),
            finished: false,
            scanned: 0,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the length of a single line, terminator excluded.
    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len;
        self
    }

    /// True once `message_stop` has been yielded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decodes the next event from `buf`.
    ///
    /// Returns the event (if a complete one was found) and how many bytes of
    /// `buf` were consumed. `(None, n)` means the remaining `buf[n..]` is an
    /// incomplete line and more bytes are needed. An `error` event, an
    /// undecodable payload or a pending line longer than the configured
    /// maximum is returned as `Err` and ends the stream.
    pub fn next(&mut self, buf: &[u8]) -> Result<(Option<StreamEvent>, usize), ClientError> {
        if self.finished {
            return Ok((None, 0));
        }
        let mut consumed = 0;
        while let Some((line, len)) = self.scanner.next_line_from(&buf[consumed..], self.scanned)
        {
            consumed += len;
            self.scanned = 0;
            if len - 1 > self.max_line_len {
                return Err(self.line_too_long());
            }
            if let Some(event) = self.decode_line(line)? {
                return Ok((Some(event), consumed));
            }
        }
        let pending = buf.len() - consumed;
        if pending > self.max_line_len {
            return Err(self.line_too_long());
        }
        self.scanned = pending;
        Ok((None, consumed))
    }

    /// Decodes a final unterminated line once the transport hit EOF.
    pub fn finish(&mut self, buf: &[u8]) -> Result<Option<StreamEvent>, ClientError> {
        self.scanned = 0;
        if self.finished {
            return Ok(None);
        }
        if buf.len() > self.max_line_len {
            return Err(self.line_too_long());
        }
        match self.scanner.finish_line(buf) {
            Some(line) => self.decode_line(line),
            None => Ok(None),
        }
    }

    fn line_too_long(&self) -> ClientError {
        ClientError::malformed(
            "line",
            format!("line exceeds maximum length of {} bytes", self.max_line_len),
        )
    }

    fn decode_line(&mut self, line: SseLine<'_>) -> Result<Option<StreamEvent>, ClientError> {
        let SseLine::Data(payload) = line else {
            return Ok(None);
        };
        let Some(kind) = self.scanner.current_kind() else {
            trace!(len = payload.len(), "skipping data line without a known event kind");
            return Ok(None);
        };
        let event = decode_payload(kind, payload)?;
        if event.is_terminal() {
            self.finished = true;
        }
        Ok(Some(event))
    }
}
