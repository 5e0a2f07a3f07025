use tracing::warn;

use crate::delta::StreamDelta;

/// Payload that terminates a chat-completion stream.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Delta(StreamDelta),
    Done,
}

/// Incremental parser for decoded SSE text.
///
/// Input must already be valid UTF-8; byte-level reassembly happens upstream in
/// [`crate::utf8::Utf8Reassembler`]. Once the `[DONE]` sentinel is seen the
/// parser ignores everything after it.
#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: String,
    done: bool,
}

impl SseStreamParser {
    /// Feed decoded text and drain every complete event.
    pub fn feed(&mut self, text: &str) -> Vec<SseEvent> {
        if self.done {
            return Vec::new();
        }
        self.buffer.push_str(text);
        let mut events = Vec::new();

        while let Some((end, separator_len)) = find_event_boundary(&self.buffer) {
            let frame = self.buffer[..end].to_string();
            self.buffer.drain(..end + separator_len);

            let Some(payload) = extract_data_payload(&frame) else {
                continue;
            };
            if payload == DONE_SENTINEL {
                self.done = true;
                self.buffer.clear();
                events.push(SseEvent::Done);
                break;
            }

            match StreamDelta::from_json(&payload) {
                Ok(delta) => events.push(SseEvent::Delta(delta)),
                Err(error) => warn!(%error, payload = %payload, "skipping malformed SSE event"),
            }
        }

        events
    }

    /// Parse a complete SSE body in one shot.
    pub fn parse_frames(input: &str) -> Vec<SseEvent> {
        let mut parser = Self::default();
        parser.feed(input)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.trim().is_empty()
    }

    /// Unterminated event text still buffered.
    pub fn residual(&self) -> &str {
        &self.buffer
    }
}

fn find_event_boundary(buffer: &str) -> Option<(usize, usize)> {
    let lf = buffer.find("\n\n").map(|index| (index, 2));
    let crlf = buffer.find("\r\n\r\n").map(|index| (index, 4));
    match (lf, crlf) {
        (Some(lf), Some(crlf)) => Some(if crlf.0 < lf.0 { crlf } else { lf }),
        (lf, crlf) => lf.or(crlf),
    }
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}
