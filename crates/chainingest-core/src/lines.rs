//! Line splitter.
//!
//! Splits a byte buffer into complete lines. Whatever follows the last
//! `\n` is a fragment of a line still being written; it is reported as the
//! remainder and never yielded as a line. The splitter holds no state
//! between calls: the caller decides how the remainder reaches the next
//! buffer.

use std::borrow::Cow;

/// The complete lines and trailing fragment of one buffer.
#[derive(Debug, Clone, Copy)]
pub struct SplitLines<'a> {
    buf: &'a [u8],
    /// Length of the prefix that ends with the last line terminator.
    complete: usize,
}

/// Split `buffer` on line terminators.
pub fn split(buffer: &[u8]) -> SplitLines<'_> {
    let complete = buffer
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|i| i + 1)
        .unwrap_or(0);
    SplitLines {
        buf: buffer,
        complete,
    }
}

impl<'a> SplitLines<'a> {
    /// Lazily iterate the complete lines. Each call starts over from the
    /// first line.
    pub fn lines(&self) -> Lines<'a> {
        Lines {
            rest: &self.buf[..self.complete],
        }
    }

    /// The fragment after the last terminator (empty if the buffer ends
    /// with one).
    pub fn remainder(&self) -> &'a [u8] {
        &self.buf[self.complete..]
    }

    /// Number of bytes covered by complete lines, terminators included.
    pub fn consumed(&self) -> usize {
        self.complete
    }

    /// Collect into `(lines, remainder)`.
    pub fn into_parts(self) -> (Vec<String>, &'a [u8]) {
        let lines = self.lines().map(Cow::into_owned).collect();
        (lines, self.remainder())
    }
}

/// Iterator over the complete lines of a [`SplitLines`].
#[derive(Debug, Clone)]
pub struct Lines<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Lines<'a> {
    type Item = Cow<'a, str>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let end = self
            .rest
            .iter()
            .position(|&b| b == b'\n')
            .unwrap_or(self.rest.len());
        let mut line = &self.rest[..end];
        self.rest = self.rest.get(end + 1..).unwrap_or(&[]);
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        Some(String::from_utf8_lossy(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines() {
        let (lines, rest) = split(b"a: 1\nb: 2\n").into_parts();
        assert_eq!(lines, vec!["a: 1", "b: 2"]);
        assert!(rest.is_empty());
    }

    #[test]
    fn trailing_fragment_is_remainder() {
        let s = split(b"status: ok\nepoch_nu");
        assert_eq!(s.lines().collect::<Vec<_>>(), vec!["status: ok"]);
        assert_eq!(s.remainder(), b"epoch_nu");
        assert_eq!(s.consumed(), 11);
    }

    #[test]
    fn fragment_completes_when_prepended() {
        let first = split(b"redemption_rate: \"1.0");
        assert_eq!(first.lines().count(), 0);

        let mut next = first.remainder().to_vec();
        next.extend_from_slice(b"5\"\n");
        let (lines, rest) = split(&next).into_parts();
        assert_eq!(lines, vec!["redemption_rate: \"1.05\""]);
        assert!(rest.is_empty());
    }

    #[test]
    fn crlf_and_blank_lines() {
        let (lines, _) = split(b"a: 1\r\n\r\nb: 2\n").into_parts();
        assert_eq!(lines, vec!["a: 1", "", "b: 2"]);
    }

    #[test]
    fn lines_is_restartable() {
        let s = split(b"x\ny\n");
        assert_eq!(s.lines().count(), 2);
        assert_eq!(s.lines().next().as_deref(), Some("x"));
    }

    #[test]
    fn invalid_utf8_is_replaced_not_dropped() {
        let (lines, _) = split(b"key: \xff\n").into_parts();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("key: "));
    }
}
