//! SSE framing — splits a byte stream into blank-line delimited blocks and
//! encodes frames back to wire text.
//!
//! Splitting happens on raw bytes, so a multi-byte UTF-8 sequence cut by a
//! chunk boundary is reassembled before decoding (`\n\n` never occurs
//! inside one).

const DELIMITER: &[u8] = b"\n\n";

/// One `event:` + `data:` unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: String,
    pub data: String,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// Wire form. Multi-line data becomes one `data:` line per line.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + self.event.len() + 16);
        out.push_str("event: ");
        out.push_str(&self.event);
        out.push('\n');
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// A complete block pulled out of the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseBlock {
    Frame(Frame),
    /// No `event:` line; relayed untouched.
    Passthrough(String),
}

impl SseBlock {
    /// Parse one block (without its trailing blank line). Blank blocks
    /// yield `None`; unrecognized lines are ignored.
    pub fn parse(raw: &str) -> Option<SseBlock> {
        if raw.trim().is_empty() {
            return None;
        }

        let mut event: Option<String> = None;
        let mut data: Vec<&str> = Vec::new();

        for line in raw.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if let Some(value) = line.strip_prefix("event:") {
                event = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("data:") {
                data.push(value.strip_prefix(' ').unwrap_or(value));
            }
        }

        Some(match event {
            Some(event) => SseBlock::Frame(Frame {
                event,
                data: data.join("\n"),
            }),
            None => SseBlock::Passthrough(raw.to_string()),
        })
    }

    /// Wire form for forwarding downstream.
    pub fn encode(&self) -> String {
        match self {
            SseBlock::Frame(f) => f.encode(),
            SseBlock::Passthrough(raw) => format!("{raw}\n\n"),
        }
    }
}

/// Incremental parser over a growing buffer.
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every complete block. A trailing partial
    /// block stays buffered for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseBlock> {
        self.buf.extend_from_slice(chunk);

        let mut blocks = Vec::new();
        let mut start = 0;
        while let Some(pos) = find(&self.buf[start..], DELIMITER) {
            let raw = String::from_utf8_lossy(&self.buf[start..start + pos]);
            if let Some(block) = SseBlock::parse(&raw) {
                blocks.push(block);
            }
            start += pos + DELIMITER.len();
        }
        self.buf.drain(..start);
        blocks
    }

    /// Bytes waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
