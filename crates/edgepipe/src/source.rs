// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Chunked input buffer.
//!
//! [`ChunkSource`] owns a fixed-capacity byte arena fed by any [`Read`]
//! implementation (a file, standard input, a pipe). Only the bytes in the
//! window `[start, start + len)` are valid unconsumed data.
//!
//! `refill()` first moves the window to offset 0, then appends whatever the
//! reader yields into the free tail:
//!
//! ```text
//! before refill     [ consumed | window ......... | free      ]
//! after compaction  [ window ......... | free                  ]
//! after read        [ window ......... | new bytes | free      ]
//! ```
//!
//! Compaction is the only copy the source performs, and it is bounded by
//! the capacity, not by the input size. Slices handed out by [`window`] and
//! [`take`] borrow the source, so none of them can survive a refill.
//!
//! [`window`]: ChunkSource::window
//! [`take`]: ChunkSource::take

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default arena capacity (also the maximum record length).
pub const DEFAULT_CAPACITY: usize = 2048;

/// Errors raised by a [`ChunkSource`].
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("read failed: {0}")]
    Read(#[from] io::Error),
}

/// Fixed-capacity byte window over a reader.
pub struct ChunkSource<R> {
    reader: R,
    buf: Box<[u8]>,
    start: usize,
    len: usize,
    eof: bool,
    total_read: u64,
}

/// Source over a file or standard input.
pub type InputSource = ChunkSource<Box<dyn Read + Send>>;

impl InputSource {
    /// Open a named file, or standard input when `path` is `None`.
    pub fn open(path: Option<&Path>, capacity: usize) -> Result<Self, SourceError> {
        let reader: Box<dyn Read + Send> = match path {
            Some(path) => {
                let file = File::open(path).map_err(|source| SourceError::Open {
                    path: path.to_path_buf(),
                    source,
                })?;
                Box::new(file)
            }
            None => Box::new(io::stdin()),
        };
        Ok(Self::new(reader, capacity))
    }
}

impl<R: Read> ChunkSource<R> {
    /// Create a source with an arena of `capacity` bytes.
    ///
    /// Nothing is read until the first [`refill`](Self::refill).
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(reader: R, capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            reader,
            buf: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            len: 0,
            eof: false,
            total_read: 0,
        }
    }

    /// Arena capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of valid, unconsumed bytes.
    pub fn available(&self) -> usize {
        self.len
    }

    /// True once the reader reported end-of-input. Sticky.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// True when the window occupies the whole arena.
    pub fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    /// True when end-of-input was reached and every byte was consumed.
    pub fn is_exhausted(&self) -> bool {
        self.eof && self.len == 0
    }

    /// Total bytes pulled from the reader so far.
    pub fn total_read(&self) -> u64 {
        self.total_read
    }

    /// The valid, unconsumed bytes.
    pub fn window(&self) -> &[u8] {
        &self.buf[self.start..self.start + self.len]
    }

    /// Advance the cursor past `n` bytes (clamped to the window).
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.len);
        self.start += n;
        self.len -= n;
    }

    /// Consume `n` bytes and return them.
    ///
    /// The slice stays valid until the source is borrowed mutably again,
    /// which rules out holding it across a refill.
    pub fn take(&mut self, n: usize) -> &[u8] {
        let n = n.min(self.len);
        let begin = self.start;
        self.start += n;
        self.len -= n;
        &self.buf[begin..begin + n]
    }

    /// Compact the window to offset 0 and read more bytes behind it.
    ///
    /// Returns the number of bytes read. `0` means one of:
    /// - end-of-input (check [`is_eof`](Self::is_eof)), sticky;
    /// - the arena is full, nothing can be appended;
    /// - a non-blocking reader has no data right now.
    pub fn refill(&mut self) -> Result<usize, SourceError> {
        if self.eof {
            return Ok(0);
        }

        if self.start > 0 {
            self.buf.copy_within(self.start..self.start + self.len, 0);
            self.start = 0;
        }

        if self.len == self.buf.len() {
            return Ok(0);
        }

        loop {
            match self.reader.read(&mut self.buf[self.len..]) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(0);
                }
                Ok(n) => {
                    self.len += n;
                    self.total_read += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                Err(e) => return Err(SourceError::Read(e)),
            }
        }
    }
}
