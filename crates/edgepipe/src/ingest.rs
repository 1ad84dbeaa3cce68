// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ingest side of the pipeline: framed input turned into publishable payloads.
//!
//! [`TelemetryIngest`] frames raw telemetry stanzas and transcodes them to
//! JSON. [`DelimitedIngest`] forwards pre-rendered messages as they are.

use crate::framer::{FrameError, MessageFramer, StanzaFramer};
use crate::source::ChunkSource;
use crate::stats::PipelineStats;
use crate::transcode::{TranscodeError, Transcoder};
use std::fmt;
use std::io::Read;
use std::sync::Arc;

/// Bytes shown by the `Debug` impl of [`Payload`].
const PREVIEW_LEN: usize = 48;

/// One message ready for delivery. Owned by exactly one stage at a time.
#[derive(Clone, PartialEq, Eq)]
pub struct Payload(Box<[u8]>);

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Box<[u8]> {
        self.0
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into_boxed_slice())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::from(text.into_bytes())
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self(Box::from(text.as_bytes()))
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = &self.0[..self.0.len().min(PREVIEW_LEN)];
        write!(f, "Payload({} bytes, {:?}", self.0.len(), String::from_utf8_lossy(shown))?;
        if shown.len() < self.0.len() {
            write!(f, "...")?;
        }
        write!(f, ")")
    }
}

/// A producer of payloads.
pub trait Ingest {
    /// Next payload.
    ///
    /// `Ok(None)` means nothing is ready: the input is either exhausted
    /// ([`is_exhausted`](Self::is_exhausted) returns true) or momentarily
    /// empty.
    fn next_payload(&mut self) -> Result<Option<Payload>, FrameError>;

    /// True once every input byte was turned into payloads or dropped.
    fn is_exhausted(&self) -> bool;
}

impl<T: Ingest + ?Sized> Ingest for Box<T> {
    fn next_payload(&mut self) -> Result<Option<Payload>, FrameError> {
        (**self).next_payload()
    }

    fn is_exhausted(&self) -> bool {
        (**self).is_exhausted()
    }
}

impl<T: Ingest + ?Sized> Ingest for &mut T {
    fn next_payload(&mut self) -> Result<Option<Payload>, FrameError> {
        (**self).next_payload()
    }

    fn is_exhausted(&self) -> bool {
        (**self).is_exhausted()
    }
}

/// Telemetry stanzas transcoded to JSON documents.
pub struct TelemetryIngest<R> {
    framer: StanzaFramer<R>,
    transcoder: Transcoder,
    stats: Arc<PipelineStats>,
    framer_drops: u64,
}

impl<R: Read> TelemetryIngest<R> {
    pub fn new(source: ChunkSource<R>, transcoder: Transcoder, stats: Arc<PipelineStats>) -> Self {
        Self {
            framer: StanzaFramer::new(source),
            transcoder,
            stats,
            framer_drops: 0,
        }
    }

    /// Fold lines the framer discarded into the shared counters.
    fn sync_framer_drops(&mut self) {
        let dropped = self.framer.dropped_fragments();
        for _ in self.framer_drops..dropped {
            self.stats.record_dropped();
        }
        self.framer_drops = dropped;
    }
}

impl<R: Read> Ingest for TelemetryIngest<R> {
    fn next_payload(&mut self) -> Result<Option<Payload>, FrameError> {
        let mut document = None;

        while let Some(stanza) = self.framer.next_stanza()? {
            self.stats.record_framed();

            match self.transcoder.transcode(&stanza) {
                Ok(Some(doc)) => {
                    document = Some(Payload::from(doc));
                    break;
                }
                Ok(None) => {
                    tracing::trace!(
                        line = %String::from_utf8_lossy(stanza.as_bytes()),
                        "skipping non-telemetry line"
                    );
                }
                Err(TranscodeError::UnknownSentence(code)) => {
                    tracing::warn!(code = %code, "unknown GPS sentence type");
                }
                Err(e @ TranscodeError::FieldCount { .. }) => {
                    tracing::debug!(error = %e, "malformed record");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "transcoding failed");
                }
            }
            self.stats.record_dropped();
        }

        self.sync_framer_drops();
        Ok(document)
    }

    fn is_exhausted(&self) -> bool {
        self.framer.is_exhausted()
    }
}

/// Delimiter-terminated messages forwarded unchanged. Empty messages are
/// skipped.
pub struct DelimitedIngest<R> {
    framer: MessageFramer<R>,
    stats: Arc<PipelineStats>,
    framer_drops: u64,
}

impl<R: Read> DelimitedIngest<R> {
    /// # Panics
    /// Panics if the delimiter is empty or does not fit the source buffer.
    pub fn new(
        source: ChunkSource<R>,
        delimiter: impl Into<Vec<u8>>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            framer: MessageFramer::new(source, delimiter),
            stats,
            framer_drops: 0,
        }
    }
}

impl<R: Read> Ingest for DelimitedIngest<R> {
    fn next_payload(&mut self) -> Result<Option<Payload>, FrameError> {
        let mut payload = None;

        while let Some(message) = self.framer.next_message()? {
            if message.is_empty() {
                continue;
            }
            self.stats.record_framed();
            payload = Some(Payload::from(message));
            break;
        }

        let dropped = self.framer.dropped_fragments();
        for _ in self.framer_drops..dropped {
            self.stats.record_dropped();
        }
        self.framer_drops = dropped;
        Ok(payload)
    }

    fn is_exhausted(&self) -> bool {
        self.framer.is_exhausted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::Trickle;

    fn collect(ingest: &mut impl Ingest) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(payload) = ingest.next_payload().expect("ingest") {
            out.push(String::from_utf8(payload.as_bytes().to_vec()).expect("utf8"));
        }
        assert!(ingest.is_exhausted());
        out
    }

    #[test]
    fn test_telemetry_ingest_skips_noise() {
        let input = b"# header\n100,42,3.5\n1,$GPXYZ,a,b,c\n100,20,1,2,3\nnot,a,record,at,all,x\n";
        let stats = Arc::new(PipelineStats::new());
        let source = ChunkSource::new(Trickle::new(input, 5), 64);
        let mut ingest = TelemetryIngest::new(source, Transcoder::default(), stats.clone());

        let docs = collect(&mut ingest);
        assert_eq!(
            docs,
            vec![
                r#"{ "time_delta": 100, "pid": "42", "value": 3.5 }"#.to_string(),
                r#"{ "time_delta": 100, "pid": "20", "x_accel": 1, "y_accel": 2, "z_accel": 3 }"#
                    .to_string(),
            ]
        );

        let snap = stats.snapshot();
        assert_eq!(snap.records_framed, 5);
        assert_eq!(snap.records_dropped, 3);
    }

    #[test]
    fn test_telemetry_ingest_counts_oversized_lines() {
        let mut input = b"1,2,3\n".to_vec();
        input.extend(std::iter::repeat(b'9').take(200));
        input.extend_from_slice(b"\n4,5,6\n");

        let stats = Arc::new(PipelineStats::new());
        let source = ChunkSource::new(Trickle::new(&input, 16), 64);
        let mut ingest = TelemetryIngest::new(source, Transcoder::default(), stats.clone());

        assert_eq!(collect(&mut ingest).len(), 2);
        assert_eq!(stats.snapshot().records_dropped, 1);
    }

    #[test]
    fn test_delimited_ingest_passthrough() {
        let stats = Arc::new(PipelineStats::new());
        let source = ChunkSource::new(Trickle::new(b"{\"a\":1}\n\n{\"b\":2}\ntail", 3), 32);
        let mut ingest = DelimitedIngest::new(source, "\n", stats.clone());

        assert_eq!(collect(&mut ingest), vec!["{\"a\":1}", "{\"b\":2}"]);
        let snap = stats.snapshot();
        assert_eq!(snap.records_framed, 2);
        assert_eq!(snap.records_dropped, 1);
    }

    #[test]
    fn test_boxed_ingest() {
        let stats = Arc::new(PipelineStats::new());
        let source = ChunkSource::new(Trickle::new(b"x\ny\n", 1), 16);
        let mut ingest: Box<dyn Ingest> = Box::new(DelimitedIngest::new(source, "\n", stats));
        assert_eq!(collect(&mut ingest), vec!["x", "y"]);
    }

    #[test]
    fn test_payload_debug_preview() {
        let payload = Payload::from("x".repeat(100));
        let shown = format!("{:?}", payload);
        assert!(shown.starts_with("Payload(100 bytes"));
        assert!(shown.ends_with("...)"));
        assert_eq!(payload.len(), 100);
    }
}
