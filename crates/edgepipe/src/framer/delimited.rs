// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Delimiter framing.
//!
//! Splits a byte stream on an arbitrary delimiter (`"\n"`, `"\r\n"`,
//! `"<EOR>"`...). Payload bytes are opaque, NUL included.
//!
//! When the window ends in what could be the first bytes of the delimiter,
//! those bytes stay unscanned and the source is refilled before deciding.
//! An unterminated fragment left at end-of-input is dropped, never
//! returned as a record.

use super::{low_water_mark, FrameError};
use crate::source::ChunkSource;
use std::io::Read;

/// Frames delimiter-terminated messages out of a [`ChunkSource`].
pub struct MessageFramer<R> {
    source: ChunkSource<R>,
    delimiter: Vec<u8>,
    /// Window bytes already known not to contain the start of a delimiter.
    scanned: usize,
    /// Skipping an oversized message until its delimiter shows up.
    discarding: bool,
    dropped: u64,
}

impl<R: Read> MessageFramer<R> {
    /// Create a framer splitting on `delimiter`.
    ///
    /// # Panics
    /// Panics if the delimiter is empty or not shorter than the source
    /// capacity.
    pub fn new(source: ChunkSource<R>, delimiter: impl Into<Vec<u8>>) -> Self {
        let delimiter = delimiter.into();
        assert!(!delimiter.is_empty(), "delimiter must not be empty");
        assert!(
            delimiter.len() < source.capacity(),
            "delimiter must be shorter than the buffer capacity"
        );
        Self {
            source,
            delimiter,
            scanned: 0,
            discarding: false,
            dropped: 0,
        }
    }

    /// The delimiter in use.
    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    /// The underlying source.
    pub fn source(&self) -> &ChunkSource<R> {
        &self.source
    }

    /// True once input ended and every byte was framed or dropped.
    pub fn is_exhausted(&self) -> bool {
        self.source.is_exhausted()
    }

    /// Fragments dropped so far (oversized or unterminated at end-of-input).
    pub fn dropped_fragments(&self) -> u64 {
        self.dropped
    }

    /// Frame the next message, without its delimiter.
    ///
    /// `Ok(None)` means no complete message is buffered: either the input
    /// is exhausted (see [`is_exhausted`](Self::is_exhausted)) or a
    /// non-blocking reader has nothing more right now.
    pub fn next_message(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let dlen = self.delimiter.len();
        let low_water = low_water_mark(self.source.capacity());

        loop {
            if self.source.is_exhausted() {
                return Ok(None);
            }

            if !self.source.is_eof() && self.source.available() - self.scanned < low_water {
                self.source.refill()?;
            }

            let window = self.source.window();
            let window_len = window.len();

            if let Some(pos) = find(&window[self.scanned..], &self.delimiter) {
                let end = self.scanned + pos;
                self.scanned = 0;

                if self.discarding {
                    self.discarding = false;
                    self.dropped += 1;
                    self.source.consume(end + dlen);
                    continue;
                }

                let record = self.source.take(end + dlen);
                return Ok(Some(record[..end].to_vec()));
            }

            self.scanned = self.scanned.max(window_len.saturating_sub(dlen - 1));

            if self.source.is_eof() {
                if window_len > 0 || self.discarding {
                    self.dropped += 1;
                    tracing::debug!(
                        bytes = window_len,
                        "dropping unterminated fragment at end of input"
                    );
                }
                self.source.consume(window_len);
                self.scanned = 0;
                self.discarding = false;
                return Ok(None);
            }

            if self.source.is_full() {
                if !self.discarding {
                    tracing::warn!(
                        capacity = self.source.capacity(),
                        "message exceeds buffer capacity, discarding until next delimiter"
                    );
                }
                self.discarding = true;
                self.source.consume(self.scanned);
                self.scanned = 0;
                continue;
            }

            if self.source.refill()? == 0 && !self.source.is_eof() {
                return Ok(None);
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    match needle {
        [byte] => haystack.iter().position(|b| b == byte),
        _ => haystack.windows(needle.len()).position(|w| w == needle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::FrameError;
    use crate::test_util::{FailingReader, Trickle};
    use std::io;

    fn frame_all(input: &[u8], chunk: usize, capacity: usize, delimiter: &[u8]) -> Vec<Vec<u8>> {
        let source = ChunkSource::new(Trickle::new(input, chunk), capacity);
        let mut framer = MessageFramer::new(source, delimiter);
        let mut out = Vec::new();
        while let Some(msg) = framer.next_message().expect("frame") {
            out.push(msg);
        }
        assert!(framer.is_exhausted());
        out
    }

    #[test]
    fn test_newline_messages() {
        let out = frame_all(b"{\"a\":1}\n{\"b\":2}\n", 64, 64, b"\n");
        assert_eq!(out, vec![b"{\"a\":1}".to_vec(), b"{\"b\":2}".to_vec()]);
    }

    #[test]
    fn test_multibyte_delimiter_across_chunks() {
        let out = frame_all(b"alpha\r\nbeta\r\ngamma\r\n", 1, 16, b"\r\n");
        assert_eq!(
            out,
            vec![b"alpha".to_vec(), b"beta".to_vec(), b"gamma".to_vec()]
        );
    }

    #[test]
    fn test_false_delimiter_prefix() {
        let out = frame_all(b"a|b||c||", 2, 16, b"||");
        assert_eq!(out, vec![b"a|b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_unterminated_fragment_dropped() {
        let source = ChunkSource::new(Trickle::new(b"one\ntwo\nthree", 3), 32);
        let mut framer = MessageFramer::new(source, "\n");
        assert_eq!(framer.next_message().expect("frame"), Some(b"one".to_vec()));
        assert_eq!(framer.next_message().expect("frame"), Some(b"two".to_vec()));
        assert_eq!(framer.next_message().expect("frame"), None);
        assert!(framer.is_exhausted());
        assert_eq!(framer.dropped_fragments(), 1);
        assert_eq!(framer.next_message().expect("frame"), None);
    }

    #[test]
    fn test_empty_messages_are_records() {
        let out = frame_all(b"a\n\nb\n", 64, 64, b"\n");
        assert_eq!(out, vec![b"a".to_vec(), Vec::new(), b"b".to_vec()]);
    }

    #[test]
    fn test_binary_payload() {
        let out = frame_all(b"\x00\x01\xff<EOR>\x7f\x00<EOR>", 3, 32, b"<EOR>");
        assert_eq!(out, vec![vec![0x00, 0x01, 0xff], vec![0x7f, 0x00]]);
    }

    #[test]
    fn test_oversized_message_discarded() {
        let mut input = b"ok1\n".to_vec();
        input.extend(std::iter::repeat(b'x').take(100));
        input.extend_from_slice(b"\nok2\n");

        let source = ChunkSource::new(Trickle::new(&input, 5), 16);
        let mut framer = MessageFramer::new(source, "\n");
        assert_eq!(framer.next_message().expect("frame"), Some(b"ok1".to_vec()));
        assert_eq!(framer.next_message().expect("frame"), Some(b"ok2".to_vec()));
        assert_eq!(framer.next_message().expect("frame"), None);
        assert_eq!(framer.dropped_fragments(), 1);
    }

    #[test]
    fn test_chunk_boundaries_do_not_change_output() {
        let input = b"$GPGGA,1*1A\r\n100,42,3.5\r\n\r\nx,y,z\r\n100,20,1.1,2.2,3.3\r\n";
        let reference = frame_all(input, input.len(), 64, b"\r\n");
        for chunk in 1..=9 {
            assert_eq!(frame_all(input, chunk, 64, b"\r\n"), reference, "chunk {}", chunk);
        }
    }

    #[test]
    fn test_read_error_aborts_framing() {
        let source = ChunkSource::new(FailingReader::after(b"partial", io::ErrorKind::Other), 32);
        let mut framer = MessageFramer::new(source, "\n");
        let err = framer.next_message().expect_err("read fault");
        assert!(matches!(err, FrameError::Source(_)));
    }

    #[test]
    #[should_panic(expected = "delimiter must not be empty")]
    fn test_empty_delimiter_rejected() {
        let source = ChunkSource::new(Trickle::new(b"", 1), 8);
        let _ = MessageFramer::new(source, Vec::<u8>::new());
    }
}
