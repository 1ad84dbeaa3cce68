// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Readers with controlled chunking and failures for unit tests.

use std::io::{self, Read};

/// Yields at most `chunk` bytes per `read` call.
pub struct Trickle {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
}

impl Trickle {
    pub fn new(data: &[u8], chunk: usize) -> Self {
        Self {
            data: data.to_vec(),
            pos: 0,
            chunk: chunk.max(1),
        }
    }
}

impl Read for Trickle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.chunk).min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Scripted reader: optional error first, then data, then an error or EOF.
pub struct FailingReader {
    leading: Option<io::ErrorKind>,
    data: Vec<u8>,
    pos: usize,
    trailing: Option<io::ErrorKind>,
}

impl FailingReader {
    /// Serve `data`, then fail every later read with `kind`.
    pub fn after(data: &[u8], kind: io::ErrorKind) -> Self {
        Self {
            leading: None,
            data: data.to_vec(),
            pos: 0,
            trailing: Some(kind),
        }
    }

    /// Fail the first read with `Interrupted`, then serve `data` and EOF.
    pub fn interrupting(data: &[u8]) -> Self {
        Self {
            leading: Some(io::ErrorKind::Interrupted),
            data: data.to_vec(),
            pos: 0,
            trailing: None,
        }
    }
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(kind) = self.leading.take() {
            return Err(io::Error::new(kind, "scripted"));
        }
        if self.pos < self.data.len() {
            let n = buf.len().min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }
        match self.trailing {
            Some(kind) => Err(io::Error::new(kind, "scripted")),
            None => Ok(0),
        }
    }
}
