// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Edge telemetry pipeline
//!
//! Reads a byte stream in fixed-size chunks, frames it into records and
//! publishes each record to a message broker topic.
//!
//! # Features
//!
//! - **Chunked framing**: Records split across chunk boundaries are
//!   reassembled, whatever the read size
//! - **Telemetry transcoding**: GPS sentences, accelerometer and PID
//!   stanzas rendered as flat JSON documents
//! - **Queue-decoupled delivery**: A bounded queue between reading and
//!   publishing, with per-message retry and reconnect
//! - **Synchronous mode**: One publish at a time, no queue
//!
//! # Pipeline
//!
//! ```text
//!  input ──> ChunkSource ──> framer ──> (Transcoder) ──> BoundedQueue ──> Transport
//!                          Message/Stanza                   DeliveryEngine
//! ```
//!
//! # Quick Start
//!
//! ```bash
//! # Transcode a capture to JSON lines
//! edgepipe-transcode capture.nmea
//!
//! # Publish delimited messages read from stdin
//! cat messages.txt | edgepipe-publish --host broker.local -t vehicle/42
//!
//! # Using config file
//! edgepipe-publish --config edgepipe.toml
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! [source]
//! path = "capture.nmea"
//! format = "telemetry"
//!
//! [broker]
//! host = "broker.local"
//! port = 1883
//!
//! [publish]
//! topic = "vehicle/42"
//! qos = 1
//! max_attempts = 5
//! ```

pub mod config;
pub mod delivery;
pub mod framer;
pub mod ingest;
pub mod publisher;
pub mod queue;
pub mod source;
pub mod stats;
pub mod transcode;
pub mod transport;

#[cfg(test)]
mod test_util;

pub use config::{BridgeConfig, ConfigError, InputFormat};
pub use delivery::{
    ConnectionState, DeliveryConfig, DeliveryEngine, DeliveryError, DeliveryReport, EngineHandle,
};
pub use framer::{FrameError, MessageFramer, Stanza, StanzaFramer};
pub use ingest::{DelimitedIngest, Ingest, Payload, TelemetryIngest};
pub use publisher::SyncPublisher;
pub use queue::{BoundedQueue, EnqueueError};
pub use source::{ChunkSource, InputSource, SourceError};
pub use stats::{PipelineStats, PipelineStatsSnapshot};
pub use transcode::{TranscodeError, Transcoder, TranscoderConfig};
pub use transport::{
    ConnectOptions, DeliveryToken, EventSink, MemoryTransport, Qos, StreamTransport,
    TcpTransport, Transport, TransportError, TransportEvent,
};
