//! Incremental `event:`/`data:` line framing
//!
//! Bytes are buffered until a `\n` arrives, so a read boundary may fall
//! anywhere: inside a field name, inside a JSON payload, or inside a
//! multi-byte UTF-8 sequence. Only complete lines are decoded.

/// One `data:` line paired with the most recent `event:` name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event name, empty if no `event:` line preceded the data
    pub event: String,
    /// Raw payload text after `data:`, trimmed
    pub data: String,
}

/// Stateful line decoder for the chat stream
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    current_event: String,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return every frame completed by it
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut consumed = 0;

        while let Some(offset) = self.buffer[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + offset;
            let line = String::from_utf8_lossy(&self.buffer[consumed..end]).into_owned();
            consumed = end + 1;

            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        self.buffer.drain(..consumed);
        frames
    }

    /// Number of buffered bytes not yet terminated by a newline
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if let Some(name) = line.strip_prefix("event:") {
            self.current_event = name.trim().to_string();
            return None;
        }

        // The event name applies to exactly one data line
        line.strip_prefix("data:").map(|data| SseFrame {
            event: std::mem::take(&mut self.current_event),
            data: data.trim().to_string(),
        })
    }
}
