//! Incremental scanner for concatenated JSON values
//!
//! The agent writes one JSON value per line, but stdout reads can split a value
//! anywhere (inside a string, between two braces, in the middle of a UTF-8
//! sequence). The scanner is a [`Decoder`] over the raw byte buffer: it keeps
//! its position between calls and only tracks bracket depth and string/escape
//! state, so each byte is examined once. Structural bytes are ASCII, so a
//! completed span always ends on a character boundary.

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// Largest value the scanner buffers before discarding it (1 MiB)
pub const MAX_VALUE_BYTES: usize = 1_048_576;

/// Extracts complete top-level JSON texts from a chunked byte stream
///
/// No validation beyond bracket matching is done: a balanced span that is not
/// valid JSON is still emitted and the caller reports the parse failure.
#[derive(Debug)]
pub struct StreamJsonScanner {
    max_len: usize,
    /// Offset of the next byte to examine; the current value starts at 0
    pos: usize,
    in_value: bool,
    /// Bracket nesting depth inside the current value
    depth: usize,
    in_string: bool,
    escaped: bool,
    /// Skipping a non-JSON line until the next newline
    skipping_line: bool,
}

impl Default for StreamJsonScanner {
    fn default() -> Self {
        Self::with_max_len(MAX_VALUE_BYTES)
    }
}

impl StreamJsonScanner {
    /// Create a scanner with the default value size limit
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len,
            pos: 0,
            in_value: false,
            depth: 0,
            in_string: false,
            escaped: false,
            skipping_line: false,
        }
    }

    /// Forget all scan state; the caller owns the buffer
    pub fn reset(&mut self) {
        *self = Self::with_max_len(self.max_len);
    }

    /// Whether a value is partially scanned
    pub fn has_partial_value(&self) -> bool {
        self.in_value
    }

    fn open_value(&mut self) {
        self.in_value = true;
        self.pos = 1;
        self.depth = 1;
        self.in_string = false;
        self.escaped = false;
    }

    /// Drop what was scanned so far and resync on the next line
    fn discard_oversized(&mut self, src: &mut BytesMut) {
        let dropped = self.pos.max(1).min(src.len());
        tracing::warn!(
            dropped = dropped,
            max = self.max_len,
            "Discarding oversized value from agent stdout"
        );
        src.advance(dropped);
        self.reset();
        self.skipping_line = true;
    }
}

/// Whether a top-level `[` opens a JSON array rather than a log prefix such
/// as `[INFO ...`. `None` until a non-whitespace byte follows it.
fn opens_array(src: &[u8]) -> Option<bool> {
    src.iter()
        .skip(1)
        .find(|b| !b.is_ascii_whitespace())
        .map(|&b| matches!(b, b'{' | b'[' | b']' | b'"' | b'-' | b'0'..=b'9' | b't' | b'f' | b'n'))
}

impl Decoder for StreamJsonScanner {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            if !self.in_value {
                if self.skipping_line {
                    match src.iter().position(|&b| b == b'\n') {
                        Some(offset) => {
                            src.advance(offset + 1);
                            self.skipping_line = false;
                        }
                        None => {
                            src.clear();
                            return Ok(None);
                        }
                    }
                }

                let Some(&byte) = src.first() else {
                    return Ok(None);
                };
                match byte {
                    b' ' | b'\t' | b'\r' | b'\n' => src.advance(1),
                    b'{' => self.open_value(),
                    b'[' => match opens_array(src) {
                        Some(true) => self.open_value(),
                        Some(false) => self.skipping_line = true,
                        None if src.len() > self.max_len => self.skipping_line = true,
                        None => return Ok(None),
                    },
                    // Filler line (log output, banners): drop up to newline
                    _ => self.skipping_line = true,
                }
                continue;
            }

            while self.pos < src.len() {
                if self.pos >= self.max_len {
                    break;
                }
                let byte = src[self.pos];
                self.pos += 1;

                if self.in_string {
                    if self.escaped {
                        self.escaped = false;
                    } else if byte == b'\\' {
                        self.escaped = true;
                    } else if byte == b'"' {
                        self.in_string = false;
                    }
                    continue;
                }
                match byte {
                    b'"' => self.in_string = true,
                    b'{' | b'[' => self.depth += 1,
                    b'}' | b']' => {
                        self.depth -= 1;
                        if self.depth == 0 {
                            let value = src.split_to(self.pos);
                            self.reset();
                            return Ok(Some(String::from_utf8_lossy(&value).into_owned()));
                        }
                    }
                    _ => {}
                }
            }

            if self.pos >= self.max_len {
                self.discard_oversized(src);
                continue;
            }
            return Ok(None);
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        let value = self.decode(src)?;
        if value.is_none() && !src.is_empty() {
            tracing::debug!(
                buffered = src.len(),
                "Discarding incomplete agent output at EOF"
            );
            src.clear();
            self.reset();
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feed(scanner: &mut StreamJsonScanner, buffer: &mut BytesMut, chunk: &[u8]) -> Vec<String> {
        buffer.extend_from_slice(chunk);
        let mut values = Vec::new();
        while let Some(value) = scanner.decode(buffer).unwrap() {
            values.push(value);
        }
        values
    }

    fn feed_all(chunks: &[&[u8]]) -> Vec<String> {
        let mut scanner = StreamJsonScanner::new();
        let mut buffer = BytesMut::new();
        chunks
            .iter()
            .flat_map(|c| feed(&mut scanner, &mut buffer, c))
            .collect()
    }

    const STREAM: &str = concat!(
        "{\"type\":\"system\",\"subtype\":\"init\"}\n",
        "warning: something odd {not json}\n",
        "{\"type\":\"assistant\",\"text\":\"brace } and quote \\\" and slash \\\\\"}\n",
        "[1,[2,{\"a\":\"]\"}]]\n",
        "{\"nested\":{\"deep\":{\"x\":\"\\\\\\\"\"}}}{\"b\":2}\n",
        "{\"unicode\":\"héllo ✓\"}\n",
    );

    #[test]
    fn test_single_chunk() {
        let values = feed_all(&[STREAM.as_bytes()]);
        assert_eq!(values.len(), 6);
        for value in &values {
            serde_json::from_str::<serde_json::Value>(value).unwrap();
        }
        assert_eq!(values[0], r#"{"type":"system","subtype":"init"}"#);
        assert_eq!(values[5], r#"{"unicode":"héllo ✓"}"#);
    }

    #[test]
    fn test_every_two_way_split() {
        // Byte splits, including inside multi-byte characters
        let expected = feed_all(&[STREAM.as_bytes()]);
        for split in 0..=STREAM.len() {
            let (a, b) = STREAM.as_bytes().split_at(split);
            assert_eq!(feed_all(&[a, b]), expected, "split at {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let expected = feed_all(&[STREAM.as_bytes()]);
        let chunks: Vec<&[u8]> = STREAM.as_bytes().chunks(1).collect();
        assert_eq!(feed_all(&chunks), expected);
    }

    #[test]
    fn test_split_inside_escaped_quote() {
        let mut scanner = StreamJsonScanner::new();
        let mut buffer = BytesMut::new();
        assert!(feed(&mut scanner, &mut buffer, br#"{"text":"say \"#).is_empty());
        assert_eq!(feed(&mut scanner, &mut buffer, br#""hi\"" }"#).len(), 1);
    }

    #[test]
    fn test_split_between_braces() {
        let mut scanner = StreamJsonScanner::new();
        let mut buffer = BytesMut::new();
        assert!(feed(&mut scanner, &mut buffer, br#"{"a":{"b":1}"#).is_empty());
        assert!(scanner.has_partial_value());
        let values = feed(&mut scanner, &mut buffer, b"}");
        assert_eq!(values, vec![r#"{"a":{"b":1}}"#.to_string()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_filler_spanning_chunks() {
        let mut scanner = StreamJsonScanner::new();
        let mut buffer = BytesMut::new();
        assert!(feed(&mut scanner, &mut buffer, b"Loading config {").is_empty());
        assert!(feed(&mut scanner, &mut buffer, b"partial}\n").is_empty());
        let values = feed(&mut scanner, &mut buffer, b"{\"ok\":true}\n");
        assert_eq!(values, vec![r#"{"ok":true}"#.to_string()]);
    }

    #[test]
    fn test_bracketed_log_prefix_is_filler() {
        let mut stream = b"[INFO starting agent\n".to_vec();
        for i in 0..10_000 {
            stream.extend_from_slice(format!("{{\"type\":\"stream_event\",\"n\":{i}}}\n").as_bytes());
        }
        let mut scanner = StreamJsonScanner::new();
        let mut buffer = BytesMut::new();
        let mut emitted = 0;
        for chunk in stream.chunks(4096) {
            emitted += feed(&mut scanner, &mut buffer, chunk).len();
            assert!(buffer.len() < 4096 + 64);
        }
        assert_eq!(emitted, 10_000);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_array_waits_for_lookahead() {
        let mut scanner = StreamJsonScanner::new();
        let mut buffer = BytesMut::new();
        assert!(feed(&mut scanner, &mut buffer, b"[").is_empty());
        assert_eq!(feed(&mut scanner, &mut buffer, b" 1]\n"), vec!["[ 1]".to_string()]);
    }

    #[test]
    fn test_oversized_value_is_discarded() {
        let mut scanner = StreamJsonScanner::with_max_len(64);
        let mut buffer = BytesMut::new();
        let big = format!("{{\"text\":\"{}\"}}\n", "x".repeat(200));

        // Arriving in pieces: the buffer never grows past the limit
        for chunk in big.as_bytes().chunks(16) {
            assert!(feed(&mut scanner, &mut buffer, chunk).is_empty());
            assert!(buffer.len() <= 64 + 16);
        }
        let values = feed(&mut scanner, &mut buffer, b"{\"ok\":true}\n");
        assert_eq!(values, vec![r#"{"ok":true}"#.to_string()]);

        // Arriving together with the next line
        let mut scanner = StreamJsonScanner::with_max_len(64);
        let values = feed_all_with(&mut scanner, &[format!("{big}{{\"ok\":1}}\n").as_bytes()]);
        assert_eq!(values, vec![r#"{"ok":1}"#.to_string()]);
    }

    fn feed_all_with(scanner: &mut StreamJsonScanner, chunks: &[&[u8]]) -> Vec<String> {
        let mut buffer = BytesMut::new();
        chunks
            .iter()
            .flat_map(|c| feed(scanner, &mut buffer, c))
            .collect()
    }

    #[test]
    fn test_malformed_span_is_still_emitted() {
        let values = feed_all(&[b"{not: valid}\n"]);
        assert_eq!(values.len(), 1);
        assert!(serde_json::from_str::<serde_json::Value>(&values[0]).is_err());
    }

    #[test]
    fn test_buffer_trimmed_after_emit() {
        let mut scanner = StreamJsonScanner::new();
        let mut buffer = BytesMut::new();
        feed(&mut scanner, &mut buffer, b"{\"a\":1}\n{\"b\":");
        assert_eq!(buffer.len(), "{\"b\":".len());
        scanner.reset();
        buffer.clear();
        assert!(!scanner.has_partial_value());
        assert_eq!(feed(&mut scanner, &mut buffer, b"{\"c\":3}").len(), 1);
    }

    #[test]
    fn test_decode_eof_drops_partial_value() {
        let mut scanner = StreamJsonScanner::new();
        let mut buffer = BytesMut::from(&b"{\"a\":1}\n{\"b\":"[..]);
        assert_eq!(scanner.decode_eof(&mut buffer).unwrap().as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(scanner.decode_eof(&mut buffer).unwrap(), None);
        assert!(buffer.is_empty());
    }
}
