// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Record framing over a [`ChunkSource`](crate::source::ChunkSource).
//!
//! Two grammars share the same scan/refill machinery:
//!
//! - [`MessageFramer`]: records terminated by an arbitrary, possibly
//!   multi-byte delimiter. Binary safe. Used for pre-rendered JSON lines.
//! - [`StanzaFramer`]: telemetry lines terminated by CR or LF, with every
//!   comma offset recorded so fields can be split without copying.
//!
//! Both framers scan forward from where the previous call stopped, top the
//! window up whenever fewer than one eighth of the capacity remains
//! unscanned, and never return a partial record. A record that cannot fit
//! in the arena is discarded up to its terminator and framing resumes with
//! the next one.

pub mod delimited;
pub mod stanza;

pub use delimited::MessageFramer;
pub use stanza::{Stanza, StanzaFramer};

use crate::source::SourceError;
use thiserror::Error;

/// Framing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("input error: {0}")]
    Source(#[from] SourceError),
}

/// Unscanned byte count below which the window is topped up before scanning.
pub(crate) fn low_water_mark(capacity: usize) -> usize {
    capacity / 8
}
