// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Comma-stanza framing.
//!
//! A stanza is one telemetry line: comma separated fields, terminated by CR
//! or LF, optionally ending in a `*XX` checksum trailer. While scanning,
//! the framer records the offset of every comma so the transcoder can
//! split fields without copying the line.
//!
//! Whitespace following a terminator (the LF of a CRLF pair, blank lines,
//! indentation) is skipped before the next stanza starts, across refills.
//! A final line without terminator is still emitted at end-of-input.

use super::{low_water_mark, FrameError};
use crate::source::ChunkSource;
use std::io::Read;

/// Comma offsets are reserved in batches of this size.
const COMMA_BATCH: usize = 16;

/// A framed telemetry line, borrowed from the framer.
///
/// Valid until the next call to [`StanzaFramer::next_stanza`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stanza<'a> {
    line: &'a [u8],
    commas: &'a [usize],
}

impl<'a> Stanza<'a> {
    /// Build a stanza from a line and its comma offsets.
    ///
    /// `commas` must list, in order, the offset of every `,` in `line`
    /// (see [`comma_offsets`]).
    pub fn new(line: &'a [u8], commas: &'a [usize]) -> Self {
        debug_assert!(commas.iter().all(|&c| line.get(c) == Some(&b',')));
        Self { line, commas }
    }

    /// The line, without terminator.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.line
    }

    /// Line length in bytes.
    pub fn len(&self) -> usize {
        self.line.len()
    }

    pub fn is_empty(&self) -> bool {
        self.line.is_empty()
    }

    /// Number of commas in the line.
    pub fn comma_count(&self) -> usize {
        self.commas.len()
    }

    /// Comma offsets, relative to the line start.
    pub fn commas(&self) -> &'a [usize] {
        self.commas
    }

    /// Field `index` (0-based), or `None` past the last field.
    pub fn field(&self, index: usize) -> Option<&'a [u8]> {
        if index > self.commas.len() {
            return None;
        }
        let begin = match index {
            0 => 0,
            i => self.commas[i - 1] + 1,
        };
        let end = self.commas.get(index).copied().unwrap_or(self.line.len());
        Some(&self.line[begin..end])
    }

    /// All fields, in order. A line with `n` commas has `n + 1` fields.
    pub fn fields(&self) -> impl Iterator<Item = &'a [u8]> + 'a {
        let stanza = *self;
        (0..=self.commas.len()).filter_map(move |i| stanza.field(i))
    }

    /// Checksum trailer: the text after the last `*` of the final field.
    pub fn checksum(&self) -> Option<&'a [u8]> {
        let last = self.field(self.commas.len())?;
        let star = last.iter().rposition(|&b| b == b'*')?;
        Some(&last[star + 1..])
    }
}

/// Offsets of every comma in `line`.
pub fn comma_offsets(line: &[u8]) -> Vec<usize> {
    line.iter()
        .enumerate()
        .filter(|&(_, &b)| b == b',')
        .map(|(i, _)| i)
        .collect()
}

/// Frames [`Stanza`]s out of a [`ChunkSource`].
pub struct StanzaFramer<R> {
    source: ChunkSource<R>,
    commas: Vec<usize>,
    /// Window bytes already scanned for the current line.
    scanned: usize,
    /// Skip whitespace before the next line starts.
    skip_ws: bool,
    /// Skipping an oversized line until its terminator shows up.
    discarding: bool,
    dropped: u64,
}

impl<R: Read> StanzaFramer<R> {
    pub fn new(source: ChunkSource<R>) -> Self {
        Self {
            source,
            commas: Vec::with_capacity(COMMA_BATCH),
            scanned: 0,
            skip_ws: true,
            discarding: false,
            dropped: 0,
        }
    }

    /// The underlying source.
    pub fn source(&self) -> &ChunkSource<R> {
        &self.source
    }

    /// True once input ended and every byte was framed or dropped.
    pub fn is_exhausted(&self) -> bool {
        self.source.is_exhausted()
    }

    /// Lines discarded because they did not fit the buffer.
    pub fn dropped_fragments(&self) -> u64 {
        self.dropped
    }

    /// Frame the next line.
    ///
    /// `Ok(None)` means no complete line is buffered: either the input is
    /// exhausted (see [`is_exhausted`](Self::is_exhausted)) or a
    /// non-blocking reader has nothing more right now.
    pub fn next_stanza(&mut self) -> Result<Option<Stanza<'_>>, FrameError> {
        let low_water = low_water_mark(self.source.capacity());

        loop {
            if self.source.is_exhausted() {
                return Ok(None);
            }

            if !self.source.is_eof() && self.source.available() - self.scanned < low_water {
                self.source.refill()?;
            }

            if self.skip_ws {
                let ws = self
                    .source
                    .window()
                    .iter()
                    .take_while(|b| b.is_ascii_whitespace() || **b == 0x0b)
                    .count();
                self.source.consume(ws);
                if self.source.available() == 0 {
                    if self.source.is_eof() {
                        return Ok(None);
                    }
                    if self.source.refill()? == 0 && !self.source.is_eof() {
                        return Ok(None);
                    }
                    continue;
                }
                self.skip_ws = false;
            }

            if self.scanned == 0 {
                self.commas.clear();
            }

            let window = self.source.window();
            let window_len = window.len();
            let mut terminator = None;

            for (i, &b) in window[self.scanned..].iter().enumerate() {
                match b {
                    b',' => {
                        if self.commas.len() == self.commas.capacity() {
                            self.commas.reserve_exact(COMMA_BATCH);
                        }
                        self.commas.push(self.scanned + i);
                    }
                    b'\r' | b'\n' => {
                        terminator = Some(self.scanned + i);
                        break;
                    }
                    _ => {}
                }
            }

            if let Some(end) = terminator {
                self.scanned = 0;
                self.skip_ws = true;

                if self.discarding {
                    self.discarding = false;
                    self.dropped += 1;
                    self.source.consume(end + 1);
                    continue;
                }

                let line = &self.source.take(end + 1)[..end];
                return Ok(Some(Stanza::new(line, &self.commas)));
            }

            self.scanned = window_len;

            if self.source.is_eof() {
                self.scanned = 0;
                self.skip_ws = true;

                if self.discarding {
                    self.discarding = false;
                    self.dropped += 1;
                    self.source.consume(window_len);
                    return Ok(None);
                }

                let line = self.source.take(window_len);
                return Ok(Some(Stanza::new(line, &self.commas)));
            }

            if self.source.is_full() {
                if !self.discarding {
                    tracing::warn!(
                        capacity = self.source.capacity(),
                        "line exceeds buffer capacity, discarding until end of line"
                    );
                }
                self.discarding = true;
                self.source.consume(window_len);
                self.scanned = 0;
                continue;
            }

            if self.source.refill()? == 0 && !self.source.is_eof() {
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{FailingReader, Trickle};
    use std::io;

    type Owned = (Vec<u8>, Vec<usize>);

    fn frame_all(input: &[u8], chunk: usize, capacity: usize) -> Vec<Owned> {
        let source = ChunkSource::new(Trickle::new(input, chunk), capacity);
        let mut framer = StanzaFramer::new(source);
        let mut out = Vec::new();
        while let Some(stanza) = framer.next_stanza().expect("frame") {
            out.push((stanza.as_bytes().to_vec(), stanza.commas().to_vec()));
        }
        assert!(framer.is_exhausted());
        out
    }

    #[test]
    fn test_records_comma_offsets() {
        let out = frame_all(b"100,42,3.5\n", 64, 64);
        assert_eq!(out, vec![(b"100,42,3.5".to_vec(), vec![3, 6])]);
    }

    #[test]
    fn test_crlf_and_blank_lines_skipped() {
        let out = frame_all(b"a,b\r\n\r\n\n   c,d,e\r\n", 64, 64);
        assert_eq!(
            out,
            vec![(b"a,b".to_vec(), vec![1]), (b"c,d,e".to_vec(), vec![1, 3])]
        );
    }

    #[test]
    fn test_final_line_without_terminator() {
        let out = frame_all(b"x,1\ny,2", 64, 64);
        assert_eq!(out, vec![(b"x,1".to_vec(), vec![1]), (b"y,2".to_vec(), vec![1])]);
    }

    #[test]
    fn test_whitespace_only_input() {
        assert!(frame_all(b" \r\n\t\n", 2, 16).is_empty());
        assert!(frame_all(b"", 2, 16).is_empty());
    }

    #[test]
    fn test_chunk_boundaries_do_not_change_output() {
        let input = b"$GPGGA,092750.000,5321.6802,N,00630.3372,W,1,8,1.03,61.7,M,55.2,M,,*76\r\n\
                      100,42,3.5\n\n100,20,1.1,2.2,3.3\r\n  garbage line\nlast,line";
        let reference = frame_all(input, input.len(), 128);
        assert_eq!(reference.len(), 5);
        for chunk in 1..=11 {
            assert_eq!(frame_all(input, chunk, 128), reference, "chunk {}", chunk);
        }
    }

    #[test]
    fn test_many_commas_grow_in_batches() {
        let line = vec![b','; 40];
        let mut input = line.clone();
        input.push(b'\n');
        let out = frame_all(&input, 7, 64);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn test_oversized_line_discarded() {
        let mut input = b"a,1\n".to_vec();
        input.extend(std::iter::repeat(b'z').take(90));
        input.extend_from_slice(b",z\nb,2\n");

        let source = ChunkSource::new(Trickle::new(&input, 6), 32);
        let mut framer = StanzaFramer::new(source);
        let first = framer.next_stanza().expect("frame").map(|s| s.as_bytes().to_vec());
        assert_eq!(first, Some(b"a,1".to_vec()));
        let next = framer.next_stanza().expect("frame").map(|s| (s.as_bytes().to_vec(), s.comma_count()));
        assert_eq!(next, Some((b"b,2".to_vec(), 1)));
        assert!(framer.next_stanza().expect("frame").is_none());
        assert_eq!(framer.dropped_fragments(), 1);
    }

    #[test]
    fn test_field_access() {
        let line = b"$GPVTG,054.7,T,,M*48";
        let commas = comma_offsets(line);
        let stanza = Stanza::new(line, &commas);

        assert_eq!(stanza.comma_count(), 4);
        assert_eq!(stanza.field(0), Some(&b"$GPVTG"[..]));
        assert_eq!(stanza.field(3), Some(&b""[..]));
        assert_eq!(stanza.field(4), Some(&b"M*48"[..]));
        assert_eq!(stanza.field(5), None);
        assert_eq!(stanza.fields().count(), 5);
        assert_eq!(stanza.checksum(), Some(&b"48"[..]));
    }

    #[test]
    fn test_no_checksum() {
        let line = b"100,42,3.5";
        let commas = comma_offsets(line);
        assert_eq!(Stanza::new(line, &commas).checksum(), None);
    }

    #[test]
    fn test_read_error_aborts_framing() {
        let source = ChunkSource::new(FailingReader::after(b"1,2", io::ErrorKind::BrokenPipe), 32);
        let mut framer = StanzaFramer::new(source);
        assert!(matches!(framer.next_stanza(), Err(FrameError::Source(_))));
    }
}
