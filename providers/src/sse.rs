//! Server-sent-event framing.
//!
//! Accumulates raw bytes and yields the `data:` payload of each complete
//! event. Events are delimited by a blank line (`\n\n` or `\r\n\r\n`); a
//! single event may carry multiple `data:` lines which join with newlines.

pub struct SseBuffer {
    buf: Vec<u8>,
    max_bytes: usize,
}

/// The buffer grew past its configured cap.
#[derive(Debug, PartialEq, Eq)]
pub struct BufferOverflow;

impl SseBuffer {
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_bytes,
        }
    }

    /// Append raw bytes from the network.
    pub fn extend(&mut self, chunk: &[u8]) -> Result<(), BufferOverflow> {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > self.max_bytes {
            Err(BufferOverflow)
        } else {
            Ok(())
        }
    }

    /// Extract the next complete event's data payload, if one is buffered.
    ///
    /// Events without any `data:` line (comments, keep-alives) are skipped.
    /// Invalid UTF-8 events are dropped with a warning rather than
    /// poisoning the stream.
    pub fn next_data_payload(&mut self) -> Option<String> {
        loop {
            let (end, delim_len) = self.event_boundary()?;
            let event: Vec<u8> = self.buf.drain(..end + delim_len).take(end).collect();

            let Ok(event) = std::str::from_utf8(&event) else {
                tracing::warn!("dropping SSE event with invalid UTF-8");
                continue;
            };

            if let Some(data) = extract_data(event) {
                return Some(data);
            }
        }
    }

    /// Position and delimiter length of the earliest event boundary.
    fn event_boundary(&self) -> Option<(usize, usize)> {
        let lf = self.buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
        let crlf = self
            .buf
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|p| (p, 4));
        match (lf, crlf) {
            (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}

fn extract_data(event: &str) -> Option<String> {
    let mut data: Option<String> = None;
    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(rest) = line.strip_prefix("data:") {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            match &mut data {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(rest);
                }
                None => data = Some(rest.to_string()),
            }
        }
    }
    data
}
