//! Bounded tail of the worker's stderr, sanitized for error reports.

/// Default stderr tail bound: 8 KiB.
pub const DEFAULT_MAX_STDERR_BYTES: usize = 8 * 1024;

/// Keeps the most recent stderr text, truncating from the front.
///
/// Stderr is free-form (the worker may write anything); ANSI escape
/// sequences and control characters are stripped so the tail can be
/// embedded in error messages verbatim.
#[derive(Debug)]
pub struct StderrTail {
    buf: String,
    max_bytes: usize,
}

impl StderrTail {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            buf: String::new(),
            max_bytes: max_bytes.max(1),
        }
    }

    /// Append a raw chunk. Invalid UTF-8 is replaced, not rejected.
    pub fn push(&mut self, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk);
        self.buf.push_str(&sanitize(&text));

        while self.buf.len() > self.max_bytes {
            let excess = self.buf.len() - self.max_bytes;
            let mut cut = excess;
            while !self.buf.is_char_boundary(cut) {
                cut += 1;
            }
            self.buf.drain(..cut);
        }
    }

    /// The retained tail, most recent text last.
    pub fn tail(&self) -> &str {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Strip ANSI escape sequences and control characters (newline and tab
/// survive; worker tracebacks are multi-line).
fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\u{1b}' {
            // CSI: ESC [ params final-byte; other escapes: ESC + one char
            if chars.peek() == Some(&'[') {
                chars.next();
                for follow in chars.by_ref() {
                    if ('\u{40}'..='\u{7e}').contains(&follow) {
                        break;
                    }
                }
            } else {
                chars.next();
            }
            continue;
        }
        if ch == '\n' || ch == '\t' || !ch.is_control() {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_most_recent_tail() {
        let mut tail = StderrTail::new(8);
        tail.push(b"0123456789");
        assert_eq!(tail.tail(), "23456789");
        tail.push(b"AB");
        assert_eq!(tail.tail(), "456789AB");
    }

    #[test]
    fn test_strips_ansi_escapes() {
        let mut tail = StderrTail::new(1024);
        tail.push(b"\x1b[31mred\x1b[0m plain");
        assert_eq!(tail.tail(), "red plain");
    }

    #[test]
    fn test_strips_control_chars_keeps_newlines() {
        let mut tail = StderrTail::new(1024);
        tail.push(b"Traceback:\n\x07\x08  line 1\tok");
        assert_eq!(tail.tail(), "Traceback:\n  line 1\tok");
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let mut tail = StderrTail::new(1024);
        tail.push(&[0x66, 0x6f, 0xff, 0x6f]);
        assert!(tail.tail().contains('\u{fffd}'));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let mut tail = StderrTail::new(7);
        tail.push("日本語です".as_bytes());
        assert!(tail.tail().len() <= 7 + 3);
        assert!(std::str::from_utf8(tail.tail().as_bytes()).is_ok());
    }

    #[test]
    fn test_empty() {
        let tail = StderrTail::new(16);
        assert!(tail.is_empty());
    }
}
