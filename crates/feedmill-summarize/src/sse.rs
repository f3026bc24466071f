//! SSE event assembly and payload decoding
//!
//! The pre-processor emits `data: <json-encoded-string>\n\n` frames.
//! Incoming bytes are buffered and complete events are cut at `\n\n`
//! boundaries; each event's `data:` lines are JSON-decoded (which
//! unescapes `\uXXXX` sequences) and concatenated. Payloads that are
//! not valid JSON strings fall through verbatim.

/// Accumulates raw bytes and yields complete SSE events.
#[derive(Debug, Default)]
pub struct SseEventBuffer {
    buf: String,
}

impl SseEventBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();
        while let Some(pos) = self.buf.find("\n\n") {
            let mut event: String = self.buf.drain(..pos + 2).collect();
            event.truncate(pos + 1);
            if !event.trim().is_empty() {
                events.push(event);
            }
        }
        events
    }

    /// Flush whatever trails after the last complete event. Called at
    /// upstream EOF so a final unterminated frame is not lost.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }
}

/// Decode the payload of one SSE event.
///
/// Returns `None` when the event carries no `data:` line (comments,
/// keep-alives). Multiple `data:` lines concatenate in order.
#[must_use]
pub fn extract_sse_data(event: &str) -> Option<String> {
    let mut out = String::new();
    let mut saw_data = false;
    for line in event.lines() {
        let Some(rest) = line.strip_prefix("data:") else {
            continue;
        };
        saw_data = true;
        let payload = rest.strip_prefix(' ').unwrap_or(rest);
        match serde_json::from_str::<String>(payload) {
            Ok(decoded) => out.push_str(&decoded),
            // Not a JSON string: pass through as-is.
            Err(_) => out.push_str(payload),
        }
    }
    saw_data.then_some(out)
}

/// Remove control characters that would corrupt SSE framing or the
/// database text columns. Tabs and newlines survive.
#[must_use]
pub fn strip_control_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}
