// src/io/serial/framer.rs
//
// Line reassembly for the serial read path.
// Splits the raw device stream on the separator byte of the active EOL
// convention and emits decoded logical lines, buffering partial data
// across read chunks.

use crate::console::transform::Eol;

/// Stateful line framer for streaming serial data.
///
/// Every received byte ends up in exactly one emitted line, and lines come
/// out in arrival order regardless of how the stream was chunked.
pub struct LineFramer {
    eol: Eol,
    /// Computed once from the EOL convention, never changes mid-session
    separator: u8,
    /// Fragments received since the last separator
    pending: Vec<Vec<u8>>,
}

impl LineFramer {
    pub fn new(eol: Eol) -> Self {
        LineFramer {
            eol,
            separator: eol.separator(),
            pending: Vec::new(),
        }
    }

    pub fn separator(&self) -> u8 {
        self.separator
    }

    /// Number of buffered bytes not yet terminated by a separator.
    pub fn pending_len(&self) -> usize {
        self.pending.iter().map(Vec::len).sum()
    }

    /// Feed a raw chunk from the device.
    /// Returns every line completed by a separator in this chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut pieces = chunk.split(|&b| b == self.separator);

        // `split` always yields at least one piece, possibly empty
        if let Some(first) = pieces.next() {
            if !first.is_empty() {
                self.pending.push(first.to_vec());
            }
        }

        for piece in pieces {
            let raw_line = self.pending.concat();
            self.pending.clear();
            if !piece.is_empty() {
                self.pending.push(piece.to_vec());
            }
            lines.push(self.decode(&raw_line));
        }

        lines
    }

    /// Force out any residual data as a last line.
    /// Call exactly once when the stream ends. Nothing is emitted when the
    /// residue is empty after decoding.
    pub fn flush(&mut self) -> Option<String> {
        let separator = [self.separator];
        let line = self.feed(&separator).pop()?;
        self.pending.clear();
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }

    /// Lossy UTF-8 decode followed by the inbound transform.
    /// Malformed sequences are replaced rather than rejected.
    fn decode(&self, raw_line: &[u8]) -> String {
        let text = String::from_utf8_lossy(raw_line);
        let text = self.eol.rx(&text);
        match self.eol {
            // rx is an identity here, the line goes out exactly as received
            Eol::Lf => text,
            // The LF of a CR LF pair lands at the start of the next piece
            Eol::Cr | Eol::Crlf if text.starts_with('\n') => text[1..].to_string(),
            Eol::Cr | Eol::Crlf => text,
        }
    }
}
