//! Reply boundary detection for concatenated renderer output.
//!
//! A renderer writes one self-describing document per request with no
//! explicit length prefix. A reply begins at a fixed prolog. It ends where
//! the next prolog begins or, for the last buffered reply, once every
//! document-opening marker has a matching closing marker.

/// Markers that delimit one reply in the output stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyFraming {
    /// Text every reply starts with
    pub prolog: String,
    /// Marker opening the reply document
    pub open_marker: String,
    /// Marker closing the reply document
    pub close_marker: String,
}

impl ReplyFraming {
    pub fn new(
        prolog: impl Into<String>,
        open_marker: impl Into<String>,
        close_marker: impl Into<String>,
    ) -> Self {
        Self {
            prolog: prolog.into(),
            open_marker: open_marker.into(),
            close_marker: close_marker.into(),
        }
    }

    /// Framing for a renderer emitting standalone SVG documents
    ///
    /// Only the start of the XML declaration is matched, so any declared
    /// encoding or version frames the same way.
    pub fn svg() -> Self {
        Self::new(
            "<?xml ",
            "<svg",
            "</svg>",
        )
    }

    /// Remove every complete reply from the front of `buffer`
    ///
    /// Incomplete trailing output stays in the buffer for the next read.
    pub fn drain_replies(&self, buffer: &mut Vec<u8>) -> Vec<String> {
        let prolog = self.prolog.as_bytes();
        let mut replies = Vec::new();

        loop {
            let Some(start) = find(buffer, prolog, 0) else {
                // Keep only a tail that could still become a prolog
                let keep = prolog.len().saturating_sub(1);
                if buffer.len() > keep {
                    buffer.drain(..buffer.len() - keep);
                }
                break;
            };
            if start > 0 {
                // Whitespace or stray output between documents
                buffer.drain(..start);
            }

            if let Some(next) = find(buffer, prolog, prolog.len()) {
                replies.push(to_reply(&buffer[..next]));
                buffer.drain(..next);
                continue;
            }

            match self.complete_len(buffer) {
                Some(end) => {
                    replies.push(to_reply(&buffer[..end]));
                    buffer.drain(..end);
                }
                None => break,
            }
        }

        replies
    }

    /// Length of the reply at the front of `buffer` if its markers balance
    fn complete_len(&self, buffer: &[u8]) -> Option<usize> {
        let open = self.open_marker.as_bytes();
        let close = self.close_marker.as_bytes();

        let opens = count(buffer, open);
        if opens == 0 || opens != count(buffer, close) {
            return None;
        }
        rfind(buffer, close).map(|pos| pos + close.len())
    }
}

impl Default for ReplyFraming {
    fn default() -> Self {
        Self::svg()
    }
}

fn to_reply(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_string()
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

fn count(haystack: &[u8], needle: &[u8]) -> usize {
    let mut total = 0;
    let mut from = 0;
    while let Some(pos) = find(haystack, needle, from) {
        total += 1;
        from = pos + needle.len();
    }
    total
}
