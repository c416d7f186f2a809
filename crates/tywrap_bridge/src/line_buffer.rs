//! Incremental newline framing for the worker's stdout.

use tywrap_protocol::error::payload_snippet;
use tywrap_protocol::ProtocolError;

/// Default cap on one response line: 1 MiB, excluding the newline.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Splits stdout chunks into complete lines, enforcing a hard byte cap.
///
/// The cap is checked both on complete lines and on the growing partial
/// line, so an oversize line is detected within one buffering step even
/// before its newline arrives.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    max_len: usize,
}

impl LineBuffer {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_len,
        }
    }

    /// Append a chunk and return every complete line it closed.
    ///
    /// A line of exactly `max_len` bytes (excluding `\n`) passes; one byte
    /// more is a protocol error, and the buffer is poisoned from the
    /// caller's perspective (the bridge goes fatal).
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<Vec<String>, ProtocolError> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // trailing \n
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.len() > self.max_len {
                return Err(self.too_long(&line));
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }

        if self.buf.len() > self.max_len {
            let partial = std::mem::take(&mut self.buf);
            return Err(self.too_long(&partial));
        }

        Ok(lines)
    }

    /// Bytes buffered for a line that has not seen its newline yet.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    fn too_long(&self, payload: &[u8]) -> ProtocolError {
        let text = String::from_utf8_lossy(payload);
        ProtocolError::LineTooLong {
            limit: self.max_len,
            snippet: payload_snippet(&text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        let mut buf = LineBuffer::new(1024);
        let lines = buf.push_chunk(b"{\"id\":1}\n").unwrap();
        assert_eq!(lines, vec!["{\"id\":1}"]);
        assert_eq!(buf.pending_bytes(), 0);
    }

    #[test]
    fn test_split_across_chunks() {
        let mut buf = LineBuffer::new(1024);
        assert!(buf.push_chunk(b"{\"id\"").unwrap().is_empty());
        assert_eq!(buf.pending_bytes(), 5);
        let lines = buf.push_chunk(b":1}\n{\"id\":2}\n").unwrap();
        assert_eq!(lines, vec!["{\"id\":1}", "{\"id\":2}"]);
    }

    #[test]
    fn test_crlf_stripped() {
        let mut buf = LineBuffer::new(1024);
        let lines = buf.push_chunk(b"abc\r\n").unwrap();
        assert_eq!(lines, vec!["abc"]);
    }

    #[test]
    fn test_exact_limit_passes() {
        let mut buf = LineBuffer::new(32);
        let mut chunk = vec![b'x'; 32];
        chunk.push(b'\n');
        let lines = buf.push_chunk(&chunk).unwrap();
        assert_eq!(lines[0].len(), 32);
    }

    #[test]
    fn test_one_over_limit_fails() {
        let mut buf = LineBuffer::new(32);
        let mut chunk = vec![b'x'; 33];
        chunk.push(b'\n');
        let err = buf.push_chunk(&chunk).unwrap_err();
        assert!(matches!(err, ProtocolError::LineTooLong { limit: 32, .. }));
        assert!(err.to_string().contains("Response line exceeded"));
    }

    #[test]
    fn test_oversize_partial_line_fails_without_newline() {
        let mut buf = LineBuffer::new(32);
        let err = buf.push_chunk(&[b'x'; 64]).unwrap_err();
        assert!(matches!(err, ProtocolError::LineTooLong { .. }));
    }

    #[test]
    fn test_error_carries_snippet() {
        let mut buf = LineBuffer::new(8);
        let err = buf.push_chunk(b"xxxxxxxxxxxxxxxx\n").unwrap_err();
        assert!(err.to_string().contains("Payload snippet"));
    }
}
