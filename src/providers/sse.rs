//! Incremental server-sent-event parsing shared by the adapters.
//!
//! Upstream chunks arrive at arbitrary byte boundaries; the buffer releases
//! only complete blank-line-terminated frames, carrying partial tail data
//! across chunks.

/// Accumulates raw response bytes and yields complete SSE frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: String,
}

pub const DONE_SENTINEL: &str = "[DONE]";

impl FrameBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
    }

    /// Pop the next complete frame (terminated by a blank line), if any.
    pub fn next_frame(&mut self) -> Option<String> {
        let end = self.pending.find("\n\n")? + 2;
        let rest = self.pending.split_off(end);
        Some(std::mem::replace(&mut self.pending, rest))
    }
}

/// `data:` payloads of a frame, in order. The `[DONE]` sentinel used by
/// delta-framed providers is dropped here; end-of-stream is signaled by the
/// transport.
pub fn data_payloads(frame: &str) -> Vec<&str> {
    frame
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter(|payload| *payload != DONE_SENTINEL)
        .collect()
}

/// `(event, data)` pairs for providers that frame with explicit `event:`
/// lines (each `event:` line is paired with the next `data:` line).
pub fn typed_payloads(frame: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();
    let mut pending_event = None;

    for line in frame.lines() {
        if let Some(event) = line.strip_prefix("event: ") {
            pending_event = Some(event.trim());
        } else if let Some(data) = line.strip_prefix("data: ")
            && let Some(event) = pending_event.take()
        {
            pairs.push((event, data.trim()));
        }
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_chunks_reassemble_into_frames() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(b"data: {\"a\":");
        assert!(buffer.next_frame().is_none());

        buffer.extend(b"1}\n\ndata: tail");
        assert_eq!(buffer.next_frame().as_deref(), Some("data: {\"a\":1}\n\n"));
        assert!(buffer.next_frame().is_none());

        buffer.extend(b"\n\n");
        assert_eq!(buffer.next_frame().as_deref(), Some("data: tail\n\n"));
    }

    #[test]
    fn multiple_frames_in_one_chunk_pop_in_order() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(b"data: one\n\ndata: two\n\n");
        assert_eq!(buffer.next_frame().as_deref(), Some("data: one\n\n"));
        assert_eq!(buffer.next_frame().as_deref(), Some("data: two\n\n"));
        assert!(buffer.next_frame().is_none());
    }

    #[test]
    fn data_payloads_skip_done_sentinel_and_comments() {
        let frame = ": keepalive\ndata: {\"x\":1}\ndata: [DONE]\n\n";
        assert_eq!(data_payloads(frame), vec!["{\"x\":1}"]);
    }

    #[test]
    fn typed_payloads_pair_event_with_following_data() {
        let frame = concat!(
            "event: message_start\n",
            "data: {\"message\":{}}\n",
            "data: orphaned\n",
            "event: message_delta\n",
            "data: {\"delta\":{}}\n\n"
        );
        assert_eq!(
            typed_payloads(frame),
            vec![
                ("message_start", "{\"message\":{}}"),
                ("message_delta", "{\"delta\":{}}"),
            ]
        );
    }
}
