//! Line framing for subprocess output streams
//!
//! A [`LineFramer`] turns the arbitrary chunks a pipe hands back into
//! complete logical lines. Whatever follows the last delimiter of a chunk is
//! held back and prefixed to the next chunk, so the lines produced never
//! depend on where the operating system happened to cut the stream.
//!
//! Framing works on raw bytes. A delimiter (or a multi-byte UTF-8 sequence)
//! that straddles two chunks is reassembled before any text decoding happens.
//!
//! # Example
//!
//! ```
//! use pyshell_transport::framing::LineFramer;
//!
//! let mut framer = LineFramer::new();
//! assert_eq!(framer.feed(b"hel").count(), 0);
//!
//! let lines: Vec<Vec<u8>> = framer.feed(b"lo\nwor").collect();
//! assert_eq!(lines, vec![b"hello".to_vec()]);
//!
//! assert_eq!(framer.finish(), Some(b"wor".to_vec()));
//! ```

use crate::error::{Result, TransportError};

/// Delimiter used when none is configured
pub const DEFAULT_DELIMITER: &str = "\n";

/// Stateful splitter that converts byte chunks into complete lines
///
/// Delimiters are matched left to right without overlap, so `"\n\n"` splits
/// `"a\n\n\nb"` into `"a"` and a remainder of `"\nb"` however the bytes
/// arrive.
#[derive(Debug, Clone)]
pub struct LineFramer {
    delimiter: Vec<u8>,
    remainder: Vec<u8>,
    // match start positions in `remainder` below this are known not to match
    scanned: usize,
}

impl LineFramer {
    /// Create a framer splitting on [`DEFAULT_DELIMITER`]
    pub fn new() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER.as_bytes().to_vec(),
            remainder: Vec::new(),
            scanned: 0,
        }
    }

    /// Create a framer splitting on a custom delimiter
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidArgument`] if the delimiter is empty.
    pub fn with_delimiter(delimiter: impl AsRef<[u8]>) -> Result<Self> {
        let delimiter = delimiter.as_ref();
        if delimiter.is_empty() {
            return Err(TransportError::InvalidArgument(
                "line delimiter cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            delimiter: delimiter.to_vec(),
            remainder: Vec::new(),
            scanned: 0,
        })
    }

    /// Feed one chunk and return the lines it completes, in order
    ///
    /// The returned iterator is empty when the chunk carried no delimiter; in
    /// that case the chunk is appended to the pending remainder. Only the new
    /// bytes, plus the tail of the remainder a delimiter could straddle, are
    /// searched.
    pub fn feed(&mut self, chunk: &[u8]) -> Lines {
        self.remainder.extend_from_slice(chunk);

        let mut cut = None;
        let mut start = self.scanned;
        while let Some(idx) = find(&self.remainder[start..], &self.delimiter) {
            start += idx + self.delimiter.len();
            cut = Some(start);
        }

        let complete = match cut {
            Some(end) => {
                let rest = self.remainder.split_off(end);
                std::mem::replace(&mut self.remainder, rest)
            }
            None => Vec::new(),
        };
        self.scanned = (self.remainder.len() + 1).saturating_sub(self.delimiter.len());

        Lines::new(complete, self.delimiter.clone())
    }

    /// Take the pending fragment once the stream has ended
    ///
    /// Returns `None` when nothing is pending.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        self.scanned = 0;
        if self.remainder.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.remainder))
        }
    }

    /// Bytes received after the last delimiter
    pub fn remainder(&self) -> &[u8] {
        &self.remainder
    }

    /// The delimiter this framer splits on
    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy iterator over the complete lines produced by one [`LineFramer::feed`]
///
/// The buffer holds whole lines only, each followed by its delimiter.
#[derive(Debug)]
pub struct Lines {
    buffer: Vec<u8>,
    delimiter: Vec<u8>,
    pos: usize,
}

impl Lines {
    fn new(buffer: Vec<u8>, delimiter: Vec<u8>) -> Self {
        Self {
            buffer,
            delimiter,
            pos: 0,
        }
    }
}

impl Iterator for Lines {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buffer.len() {
            return None;
        }

        let rest = &self.buffer[self.pos..];
        let line = match find(rest, &self.delimiter) {
            Some(idx) => {
                self.pos += idx + self.delimiter.len();
                rest[..idx].to_vec()
            }
            None => {
                self.pos = self.buffer.len();
                rest.to_vec()
            }
        };
        Some(line)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn feed_all(framer: &mut LineFramer, chunks: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        for chunk in chunks {
            lines.extend(framer.feed(chunk));
        }
        lines.extend(framer.finish());
        lines
    }

    #[test]
    fn test_chunk_without_delimiter_is_buffered() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.feed(b"partial").count(), 0);
        assert_eq!(framer.remainder(), b"partial");
        assert_eq!(framer.feed(b" more").count(), 0);
        assert_eq!(framer.remainder(), b"partial more");
    }

    #[test]
    fn test_remainder_prefixes_first_line() {
        let mut framer = LineFramer::new();
        let _ = framer.feed(b"{\"a\":");
        let lines: Vec<_> = framer.feed(b"1}\n{\"b\":2}\n{\"c\"").collect();
        assert_eq!(lines, vec![b"{\"a\":1}".to_vec(), b"{\"b\":2}".to_vec()]);
        assert_eq!(framer.remainder(), b"{\"c\"");
    }

    #[test]
    fn test_empty_lines_are_kept() {
        let mut framer = LineFramer::new();
        let lines: Vec<_> = framer.feed(b"a\n\nb\n").collect();
        assert_eq!(lines, vec![b"a".to_vec(), Vec::new(), b"b".to_vec()]);
        assert!(framer.remainder().is_empty());
    }

    #[test]
    fn test_lone_delimiter_completes_remainder() {
        let mut framer = LineFramer::new();
        let _ = framer.feed(b"x");
        let lines: Vec<_> = framer.feed(b"\n").collect();
        assert_eq!(lines, vec![b"x".to_vec()]);
    }

    #[test]
    fn test_finish_flushes_once() {
        let mut framer = LineFramer::new();
        let _ = framer.feed(b"tail");
        assert_eq!(framer.finish(), Some(b"tail".to_vec()));
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn test_empty_delimiter_rejected() {
        assert!(LineFramer::with_delimiter("").is_err());
    }

    #[rstest]
    #[case::split_inside_crlf(&["one\r", "\ntwo\r\n"])]
    #[case::split_before_crlf(&["one", "\r\ntwo", "\r\n"])]
    #[case::byte_at_a_time(&["o", "n", "e", "\r", "\n", "t", "w", "o", "\r", "\n"])]
    fn test_multibyte_delimiter_across_chunks(#[case] chunks: &[&str]) {
        let chunks: Vec<&[u8]> = chunks.iter().map(|c| c.as_bytes()).collect();
        let mut framer = LineFramer::with_delimiter("\r\n").unwrap();
        let lines = feed_all(&mut framer, &chunks);
        assert_eq!(lines, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[rstest]
    #[case::whole("\n\n", &["\n\n\n"], &["", "\n"])]
    #[case::split_after_first_match("\n\n", &["\n\n", "\n"], &["", "\n"])]
    #[case::split_inside_first_match("\n\n", &["\n", "\n\n"], &["", "\n"])]
    #[case::dashes("--", &["a---", "b--"], &["a", "-b"])]
    #[case::dashes_byte_at_a_time("--", &["a", "-", "-", "-", "b", "-", "-"], &["a", "-b"])]
    fn test_overlapping_delimiter_matches_left_to_right(
        #[case] delimiter: &str,
        #[case] chunks: &[&str],
        #[case] expected: &[&str],
    ) {
        let chunks: Vec<&[u8]> = chunks.iter().map(|c| c.as_bytes()).collect();
        let mut framer = LineFramer::with_delimiter(delimiter).unwrap();
        let lines = feed_all(&mut framer, &chunks);
        let expected: Vec<Vec<u8>> = expected.iter().map(|l| l.as_bytes().to_vec()).collect();
        assert_eq!(lines, expected);
    }

    #[test]
    fn test_long_line_across_many_chunks() {
        let chunk = vec![b'x'; 1024];
        let mut framer = LineFramer::with_delimiter("\r\n").unwrap();
        for _ in 0..4096 {
            assert_eq!(framer.feed(&chunk).count(), 0);
        }
        let _ = framer.feed(b"\r");
        let lines: Vec<_> = framer.feed(b"\ntail").collect();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 4096 * 1024);
        assert_eq!(framer.remainder(), b"tail");
    }

    #[test]
    fn test_utf8_sequence_split_across_chunks() {
        let text = "héllo\nwörld\n".as_bytes();
        // cut inside the two-byte 'é'
        let mut framer = LineFramer::new();
        let lines = feed_all(&mut framer, &[&text[..2], &text[2..]]);
        let lines: Vec<String> = lines
            .into_iter()
            .map(|l| String::from_utf8(l).unwrap())
            .collect();
        assert_eq!(lines, vec!["héllo", "wörld"]);
    }

    fn arb_stream() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(
            prop_oneof![
                3 => Just(b'\n'),
                1 => Just(b'\r'),
                10 => any::<u8>(),
            ],
            0..256,
        )
    }

    fn partition<'a>(stream: &'a [u8], cuts: &[prop::sample::Index]) -> Vec<&'a [u8]> {
        let mut points: Vec<usize> = cuts.iter().map(|c| c.index(stream.len() + 1)).collect();
        points.sort_unstable();
        points.dedup();

        let mut chunks = Vec::new();
        let mut start = 0;
        for point in points {
            chunks.push(&stream[start..point]);
            start = point;
        }
        chunks.push(&stream[start..]);
        chunks
    }

    proptest! {
        /// Property: feeding any partition of a stream yields the same lines
        /// as feeding the whole stream at once
        #[test]
        fn prop_framing_is_partition_invariant(
            stream in arb_stream(),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..16),
        ) {
            let mut whole = LineFramer::new();
            let expected = feed_all(&mut whole, &[&stream]);

            let chunks = partition(&stream, &cuts);
            let mut chunked = LineFramer::new();
            let actual = feed_all(&mut chunked, &chunks);
            prop_assert_eq!(actual, expected);
        }

        /// Property: the same holds for multi-byte delimiters, including
        /// ones that overlap themselves
        #[test]
        fn prop_multibyte_framing_is_partition_invariant(
            delimiter in prop::sample::select(vec!["\r\n", "\n\n", "\r\r\r", "\n\r\n"]),
            stream in arb_stream(),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..16),
        ) {
            let mut whole = LineFramer::with_delimiter(delimiter).unwrap();
            let expected = feed_all(&mut whole, &[&stream]);

            let chunks = partition(&stream, &cuts);
            let mut chunked = LineFramer::with_delimiter(delimiter).unwrap();
            let actual = feed_all(&mut chunked, &chunks);
            prop_assert_eq!(actual, expected);
        }
    }
}
