//! Frame Assembler
//!
//! Turns an incremental byte stream into complete, delimiter-bounded
//! frames. Chunk boundaries may fall anywhere, including inside a
//! multi-byte UTF-8 sequence or inside the delimiter itself.

/// Separates frames on the wire.
pub const FRAME_DELIMITER: &str = "\n\n";

/// Incremental frame splitter.
///
/// Bytes are decoded as UTF-8 as they arrive; an incomplete trailing
/// sequence is held back until the next chunk. Invalid sequences decode to
/// U+FFFD.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: String,
    partial_char: Vec<u8>,
    /// Offset in `buffer` where the next delimiter search starts.
    scanned: usize,
}

impl FrameAssembler {
    /// Create an empty assembler.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: String::new(),
            partial_char: Vec::new(),
            scanned: 0,
        }
    }

    /// Feed a chunk and return every frame it completes, in order.
    ///
    /// Empty frames (consecutive delimiters) are skipped. Only text added
    /// since the previous call is searched, so a frame arriving in many
    /// small chunks costs time linear in its length.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.decode(chunk);

        let mut frames = Vec::new();
        let mut consumed = 0;
        let mut from = self.scanned;
        while let Some(pos) = find_delimiter(&self.buffer.as_bytes()[from..]) {
            let end = from + pos;
            let frame = &self.buffer[consumed..end];
            if !frame.trim().is_empty() {
                frames.push(frame.to_string());
            }
            consumed = end + FRAME_DELIMITER.len();
            from = consumed;
        }
        self.buffer.drain(..consumed);
        // A delimiter may straddle the next chunk boundary
        self.scanned = self
            .buffer
            .len()
            .saturating_sub(FRAME_DELIMITER.len() - 1);

        frames
    }

    /// Bytes held back: buffered text not yet delimited plus any incomplete
    /// character.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len() + self.partial_char.len()
    }

    /// End of stream. Any partial frame is discarded; returns its size.
    pub fn finish(&mut self) -> usize {
        let leftover = self.pending_len();
        self.buffer.clear();
        self.partial_char.clear();
        self.scanned = 0;
        leftover
    }

    fn decode(&mut self, chunk: &[u8]) {
        let mut bytes = std::mem::take(&mut self.partial_char);
        bytes.extend_from_slice(chunk);

        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    return;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    self.buffer.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Incomplete sequence at the end of the chunk
                            self.partial_char = after.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(FRAME_DELIMITER.len())
        .position(|window| window == FRAME_DELIMITER.as_bytes())
}
