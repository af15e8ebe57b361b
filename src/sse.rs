//! Incremental Server-Sent Events decoder for the inbound agent stream.
//!
//! The agent server frames every event as a single `data:` line of JSON
//! followed by a blank line. This decoder converts an arbitrary byte
//! stream into complete data payloads, tolerating chunk boundaries that
//! split lines, CRLF line endings, comment lines, and multi-line `data:`
//! fields (joined with `\n` per the SSE spec).

/// Streaming SSE decoder. Feed byte chunks via [`SseDecoder::push`].
#[derive(Debug, Default)]
pub struct SseDecoder {
    line_buffer: String,
    data_lines: Vec<String>,
}

impl SseDecoder {
    /// Create a new decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes, returning the data payloads of any events
    /// completed by this chunk, in stream order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = String::from_utf8_lossy(chunk);
        let mut payloads = Vec::new();

        for ch in text.chars() {
            if ch == '\n' {
                let line = std::mem::take(&mut self.line_buffer);
                let line = line.strip_suffix('\r').unwrap_or(&line);
                if let Some(payload) = self.process_line(line) {
                    payloads.push(payload);
                }
            } else {
                self.line_buffer.push(ch);
            }
        }

        payloads
    }

    /// Flush any buffered data as a final payload when the stream ends.
    pub fn flush(&mut self) -> Option<String> {
        if !self.line_buffer.is_empty() {
            let line = std::mem::take(&mut self.line_buffer);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            self.process_line(line);
        }
        if self.data_lines.is_empty() {
            None
        } else {
            Some(self.take_payload())
        }
    }

    /// Process one complete line. Returns a payload when a blank line
    /// closes an event that accumulated data.
    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data_lines.is_empty() {
                return None;
            }
            return Some(self.take_payload());
        }

        // Comment lines (keep-alives) start with ':'.
        if line.starts_with(':') {
            return None;
        }

        if let Some((field, value)) = split_field(line) {
            // Only `data` carries payload; the server never sends
            // `event`/`id`/`retry`, so other fields are ignored.
            if field == "data" {
                self.data_lines.push(value.to_owned());
            }
        }

        None
    }

    fn take_payload(&mut self) -> String {
        let payload = self.data_lines.join("\n");
        self.data_lines.clear();
        payload
    }
}

/// Split a line into (field, value), stripping the single optional space
/// after the colon per the SSE spec.
fn split_field(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let field = &line[..colon];
    let value = line[colon + 1..].strip_prefix(' ').unwrap_or(&line[colon + 1..]);
    Some((field, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_event() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.push(b"data: {\"turn_complete\": true}\n\n");
        assert_eq!(payloads, vec!["{\"turn_complete\": true}"]);
    }

    #[test]
    fn event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"mime_type\":").is_empty());
        let payloads = decoder.push(b" \"text/plain\", \"data\": \"hi\"}\n\n");
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0], "{\"mime_type\": \"text/plain\", \"data\": \"hi\"}");
    }

    #[test]
    fn multiple_events_one_chunk() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.push(b"data: one\n\ndata: two\n\n");
        assert_eq!(payloads, vec!["one", "two"]);
    }

    #[test]
    fn crlf_line_endings() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.push(b"data: hello\r\n\r\n");
        assert_eq!(payloads, vec!["hello"]);
    }

    #[test]
    fn comments_and_unknown_fields_ignored() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.push(b": keep-alive\nretry: 5000\ndata: payload\n\n");
        assert_eq!(payloads, vec!["payload"]);
    }

    #[test]
    fn multi_line_data_joined() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.push(b"data: line1\ndata: line2\n\n");
        assert_eq!(payloads, vec!["line1\nline2"]);
    }

    #[test]
    fn no_space_after_colon() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.push(b"data:tight\n\n");
        assert_eq!(payloads, vec!["tight"]);
    }

    #[test]
    fn flush_emits_trailing_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: trailing").is_empty());
        assert_eq!(decoder.flush().as_deref(), Some("trailing"));
        assert!(decoder.flush().is_none());
    }

    #[test]
    fn blank_lines_without_data_emit_nothing() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"\n\n\n").is_empty());
    }
}
