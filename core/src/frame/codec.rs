use serde::de::DeserializeOwned;
use serde::Serialize;

/// Longest line a decoder accepts before it starts discarding.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Splits a byte stream into newline-terminated lines.
///
/// A trailing partial line is held until a later chunk completes it; it is never
/// handed out early. Each connection owns its own decoder. A line longer than the
/// limit is dropped whole, including the rest of it still to come.
#[derive(Debug)]
pub struct FrameDecoder {
    line_buf: Vec<u8>,
    // Prefix of `line_buf` already known to hold no newline.
    scanned: usize,
    max_line: usize,
    discarding: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_line(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            line_buf: Vec::new(),
            scanned: 0,
            max_line,
            discarding: false,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut chunk = chunk;
        if self.discarding {
            let Some(pos) = chunk.iter().position(|&b| b == b'\n') else {
                return Vec::new();
            };
            self.discarding = false;
            chunk = &chunk[pos + 1..];
        }
        self.line_buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(off) = self.line_buf[from..].iter().position(|&b| b == b'\n') {
            let end = from + off;
            let line = strip_cr(&self.line_buf[start..end]);
            if line.len() > self.max_line {
                tracing::warn!(target: "nestlog.frame", bytes = line.len(), "dropping oversized frame");
            } else {
                lines.push(String::from_utf8_lossy(line).into_owned());
            }
            start = end + 1;
            from = start;
        }
        self.line_buf.drain(..start);
        self.scanned = self.line_buf.len();

        if self.line_buf.len() > self.max_line {
            tracing::warn!(
                target: "nestlog.frame",
                bytes = self.line_buf.len(),
                limit = self.max_line,
                "frame exceeds limit; skipping to the next line"
            );
            self.line_buf = Vec::new();
            self.scanned = 0;
            self.discarding = true;
        }
        lines
    }

    pub fn feed_str(&mut self, chunk: &str) -> Vec<String> {
        self.feed(chunk.as_bytes())
    }

    /// Bytes of the incomplete line currently held back.
    pub fn pending_len(&self) -> usize {
        self.line_buf.len()
    }

    /// Feed a chunk and decode every complete line, skipping the ones that fail.
    pub fn decode<T: DeserializeOwned>(&mut self, chunk: &[u8]) -> Vec<T> {
        self.feed(chunk)
            .iter()
            .filter_map(|line| parse_frame(line))
            .collect()
    }
}

/// Parse one line. Blank lines and lines that are not a valid `T` yield `None`.
pub fn parse_frame<T: DeserializeOwned>(line: &str) -> Option<T> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<T>(trimmed) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!(
                target: "nestlog.frame",
                error = %e,
                bytes = trimmed.len(),
                "dropping invalid frame"
            );
            None
        }
    }
}

/// Serialize one message as a frame, terminator included.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TunnelMessage;
    use pretty_assertions::assert_eq;

    fn sample_stream() -> String {
        let msgs = vec![
            TunnelMessage::Log {
                args: vec!["hello".into(), "world".into()],
            },
            TunnelMessage::Stdout {
                data: "line one\nline two\n".into(),
            },
            TunnelMessage::Warn {
                args: vec!["caf\u{e9} \u{1f680}".into()],
            },
        ];
        msgs.iter().map(|m| encode_frame(m).unwrap()).collect()
    }

    #[test]
    fn partial_line_is_retained() {
        let mut dec = FrameDecoder::new();
        assert!(dec.feed_str("{\"type\":\"log\",").is_empty());
        assert_eq!(dec.pending_len(), 14);
        let lines = dec.feed_str("\"args\":[]}\n{\"ty");
        assert_eq!(lines, vec!["{\"type\":\"log\",\"args\":[]}".to_string()]);
        assert_eq!(dec.pending_len(), 4);
    }

    #[test]
    fn split_points_do_not_change_decoded_sequence() {
        let stream = sample_stream();
        let bytes = stream.as_bytes();

        let mut whole = FrameDecoder::new();
        let expected: Vec<TunnelMessage> = whole.decode(bytes);
        assert_eq!(expected.len(), 3);

        // Every chunk size, including ones that cut multi-byte characters in half.
        for chunk_size in 1..bytes.len() {
            let mut dec = FrameDecoder::new();
            let mut got: Vec<TunnelMessage> = Vec::new();
            for chunk in bytes.chunks(chunk_size) {
                got.extend(dec.decode::<TunnelMessage>(chunk));
            }
            assert_eq!(got, expected, "chunk size {chunk_size}");
            assert_eq!(dec.pending_len(), 0);
        }
    }

    #[test]
    fn blank_and_malformed_lines_are_skipped() {
        let mut dec = FrameDecoder::new();
        let input = "\n   \nnot json\n{\"type\":\"nope\"}\n{\"type\":\"debug\",\"args\":[\"x\"]}\r\n";
        let got: Vec<TunnelMessage> = dec.decode(input.as_bytes());
        assert_eq!(
            got,
            vec![TunnelMessage::Debug {
                args: vec!["x".into()]
            }]
        );
    }

    #[test]
    fn oversized_line_is_skipped_up_to_the_next_newline() {
        let mut dec = FrameDecoder::with_max_line(32);
        let big = format!("{{\"type\":\"log\",\"args\":[\"{}", "x".repeat(40));
        assert!(dec.feed_str(&big).is_empty());
        assert_eq!(dec.pending_len(), 0);
        assert!(dec.feed_str(&"y".repeat(100)).is_empty());
        assert_eq!(dec.pending_len(), 0);

        let got: Vec<TunnelMessage> =
            dec.decode(b"zz\"]}\n{\"type\":\"debug\",\"args\":[]}\n");
        assert_eq!(got, vec![TunnelMessage::Debug { args: vec![] }]);

        // Complete in one chunk: only that line goes.
        let whole = format!("{}\n{{\"type\":\"error\",\"args\":[]}}\n", "w".repeat(50));
        let got: Vec<TunnelMessage> = dec.decode(whole.as_bytes());
        assert_eq!(got, vec![TunnelMessage::Error { args: vec![] }]);
    }

    #[test]
    fn long_line_fed_in_small_chunks_is_not_rescanned() {
        let mut dec = FrameDecoder::new();
        let payload = "a".repeat(64 * 1024);
        let frame = encode_frame(&TunnelMessage::Stdout { data: payload.clone() }).unwrap();
        let mut got: Vec<TunnelMessage> = Vec::new();
        for chunk in frame.as_bytes().chunks(7) {
            got.extend(dec.decode::<TunnelMessage>(chunk));
            assert!(dec.scanned <= dec.pending_len());
        }
        assert_eq!(got, vec![TunnelMessage::Stdout { data: payload }]);
        assert_eq!((dec.pending_len(), dec.scanned), (0, 0));
    }

    #[test]
    fn embedded_newlines_stay_inside_one_frame() {
        let frame = encode_frame(&TunnelMessage::Stderr {
            data: "a\nb\n".into(),
        })
        .unwrap();
        assert_eq!(frame.matches('\n').count(), 1);
        assert!(frame.ends_with('\n'));
    }
}
