use crate::event::EventKind;

const EVENT_PREFIX: &[u8] = b"event:";
const DATA_PREFIX: &[u8] = b"data:";

/// Classification of one SSE line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// Blank separator between frames.
    Empty,
    /// `event:` line; `None` when the name is not a known kind.
    Event(Option<EventKind>),
    /// `data:` line payload, prefix and one following space removed.
    Data(&'a [u8]),
    /// Comments, `id:`, `retry:` and anything else. Ignored.
    Unknown,
}

/// Line-level SSE scanner.
///
/// Tracks the kind named by the most recent `event:` line so the next
/// `data:` line can be decoded. A data line seen before any (recognized)
/// `event:` line reads a current kind of `None` and is skipped by the decoder.
#[derive(Debug, Default)]
pub struct FrameScanner {
    current: Option<EventKind>,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kind named by the last `event:` line.
    pub fn current_kind(&self) -> Option<EventKind> {
        self.current
    }

    /// Classifies the first complete line of `buf`.
    ///
    /// Returns the line and the number of bytes it occupied including its
    /// `\n`, or `None` when `buf` holds no complete line yet.
    pub fn next_line<'a>(&mut self, buf: &'a [u8]) -> Option<(SseLine<'a>, usize)> {
        self.next_line_from(buf, 0)
    }

    /// Like [`FrameScanner::next_line`], but starts the `\n` search at
    /// `from`. The bytes before `from` must already be known to hold no `\n`.
    pub fn next_line_from<'a>(
        &mut self,
        buf: &'a [u8],
        from: usize,
    ) -> Option<(SseLine<'a>, usize)> {
        let start = from.min(buf.len());
        let newline = start + memchr::memchr(b'\n', &buf[start..])?;
        let line = self.classify(strip_cr(&buf[..newline]));
        Some((line, newline + 1))
    }

    /// Classifies an unterminated trailing line at end of input.
    pub fn finish_line<'a>(&mut self, buf: &'a [u8]) -> Option<SseLine<'a>> {
        if buf.is_empty() {
            return None;
        }
        Some(self.classify(strip_cr(buf)))
    }

    fn classify<'a>(&mut self, line: &'a [u8]) -> SseLine<'a> {
        if line.is_empty() {
            return SseLine::Empty;
        }
        if let Some(name) = line.strip_prefix(EVENT_PREFIX) {
            let kind = EventKind::from_name(strip_one_space(name));
            self.current = kind;
            return SseLine::Event(kind);
        }
        if let Some(payload) = line.strip_prefix(DATA_PREFIX) {
            return SseLine::Data(strip_one_space(payload));
        }
        SseLine::Unknown
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn strip_one_space(value: &[u8]) -> &[u8] {
    value.strip_prefix(b" ").unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(scanner: &mut FrameScanner, mut buf: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        while let Some((line, consumed)) = scanner.next_line(buf) {
            out.push(format!("{line:?}"));
            buf = &buf[consumed..];
        }
        out
    }

    #[test]
    fn classifies_event_data_and_separators() {
        let mut scanner = FrameScanner::new();
        let buf = b"event: ping\ndata: {\"type\": \"ping\"}\n\n";

        let (line, consumed) = scanner.next_line(buf).expect("event line");
        assert_eq!(line, SseLine::Event(Some(EventKind::Ping)));
        assert_eq!(consumed, 12);
        assert_eq!(scanner.current_kind(), Some(EventKind::Ping));

        let (line, consumed2) = scanner.next_line(&buf[consumed..]).expect("data line");
        assert_eq!(line, SseLine::Data(br#"{"type": "ping"}"#));

        let (line, _) = scanner
            .next_line(&buf[consumed + consumed2..])
            .expect("blank line");
        assert_eq!(line, SseLine::Empty);
    }

    #[test]
    fn incomplete_trailing_line_is_not_consumed() {
        let mut scanner = FrameScanner::new();
        assert_eq!(scanner.next_line(b"event: message_st"), None);
        assert_eq!(scanner.current_kind(), None);
    }

    #[test]
    fn carriage_return_before_newline_is_stripped() {
        let mut scanner = FrameScanner::new();
        let (line, consumed) = scanner
            .next_line(b"event: message_stop\r\n")
            .expect("line");
        assert_eq!(line, SseLine::Event(Some(EventKind::MessageStop)));
        assert_eq!(consumed, 21);
    }

    #[test]
    fn search_resumes_after_already_scanned_prefix() {
        let mut scanner = FrameScanner::new();
        let buf = b"data: abcdef\n";
        assert_eq!(scanner.next_line_from(&buf[..8], 0), None);
        let (line, consumed) = scanner.next_line_from(buf, 8).expect("line");
        assert_eq!(line, SseLine::Data(b"abcdef"));
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn data_prefix_without_space_keeps_payload_intact() {
        let mut scanner = FrameScanner::new();
        let (line, _) = scanner.next_line(b"data:{\"a\":1}\n").expect("line");
        assert_eq!(line, SseLine::Data(br#"{"a":1}"#));
        let (line, _) = scanner.next_line(b"data:  x\n").expect("line");
        assert_eq!(line, SseLine::Data(b" x"));
    }

    #[test]
    fn unknown_fields_and_events_do_not_abort() {
        let mut scanner = FrameScanner::new();
        let seen = lines(
            &mut scanner,
            b": keep-alive\nid: 7\nretry: 100\nevent: completion\n",
        );
        assert_eq!(
            seen,
            vec!["Unknown", "Unknown", "Unknown", "Event(None)"]
        );
        assert_eq!(scanner.current_kind(), None);
    }

    #[test]
    fn unrecognized_event_clears_previous_kind() {
        let mut scanner = FrameScanner::new();
        let _ = lines(&mut scanner, b"event: content_block_delta\nevent: vendor_thing\n");
        assert_eq!(scanner.current_kind(), None);
    }

    #[test]
    fn finish_line_classifies_unterminated_tail() {
        let mut scanner = FrameScanner::new();
        assert_eq!(scanner.finish_line(b""), None);
        assert_eq!(
            scanner.finish_line(b"data: {\"type\":\"message_stop\"}"),
            Some(SseLine::Data(br#"{"type":"message_stop"}"#))
        );
    }
}
