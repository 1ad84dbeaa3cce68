// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broker transport capability.
//!
//! The delivery engine drives a [`Transport`] through three calls,
//! `connect`, `publish` and `disconnect`, none of which waits for the
//! broker. Outcomes arrive later as [`TransportEvent`]s on the channel
//! handed over at connect time, possibly from another thread:
//!
//! ```text
//!  DeliveryEngine ──connect/publish/disconnect──> Transport
//!        ^                                            |
//!        +────────── EventSink (crossbeam) <──────────+
//! ```
//!
//! Every publish carries a [`DeliveryToken`]; the matching
//! `PublishSucceeded` / `PublishFailed` event echoes it back.

pub mod memory;
pub mod stream;
pub mod tcp;

pub use memory::{ConnectScript, MemoryTransport, PublishScript};
pub use stream::StreamTransport;
pub use tcp::TcpTransport;

use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Types
// ============================================================================

/// Identifies one publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryToken(pub u64);

impl fmt::Display for DeliveryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Delivery guarantee requested from the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Qos {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for Qos {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(format!("invalid QoS level {} (expected 0, 1 or 2)", other)),
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        qos as u8
    }
}

/// Asynchronous transport outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established.
    Connected,

    /// Connection could not be established.
    ConnectFailed {
        /// Failure description
        reason: String,
    },

    /// An established connection went away.
    ConnectionLost {
        /// Cause description
        cause: String,
    },

    /// The broker accepted a publish.
    PublishSucceeded {
        /// Token of the publish
        token: DeliveryToken,
    },

    /// A publish did not go through.
    PublishFailed {
        /// Token of the publish
        token: DeliveryToken,
        /// Failure description
        reason: String,
    },

    /// Disconnect completed.
    Disconnected,
}

/// Sending half of the event channel, owned by the transport.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<TransportEvent>,
}

impl EventSink {
    /// Create a sink and the receiver the engine drains.
    pub fn channel() -> (Self, Receiver<TransportEvent>) {
        let (tx, rx) = channel::unbounded();
        (Self { tx }, rx)
    }

    /// Deliver an event. Returns false once the receiver is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Session parameters.
#[derive(Clone)]
pub struct ConnectOptions {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            client_id: "edgepipe".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(10),
            clean_session: true,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("keep_alive", &self.keep_alive)
            .field("clean_session", &self.clean_session)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// One publish call.
#[derive(Debug, Clone, Copy)]
pub struct PublishRequest<'a> {
    pub token: DeliveryToken,
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: Qos,
    pub retain: bool,
}

/// Errors returned synchronously by transport calls.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport closed")]
    Closed,

    #[error("request rejected: {0}")]
    Rejected(String),
}

// ============================================================================
// Capability
// ============================================================================

/// Non-blocking broker client.
///
/// Calls return once the request is handed off. `Err` means the request
/// was not accepted at all and no event will follow for it.
pub trait Transport: Send {
    /// Start connecting. The outcome is `Connected` or `ConnectFailed`,
    /// and later events for this session go to `events`.
    fn connect(&mut self, options: &ConnectOptions, events: EventSink)
        -> Result<(), TransportError>;

    /// Start a publish. The outcome is `PublishSucceeded` or
    /// `PublishFailed` carrying `request.token`.
    fn publish(&mut self, request: PublishRequest<'_>) -> Result<(), TransportError>;

    /// Start closing the session. Completes with `Disconnected`.
    fn disconnect(&mut self) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(
        &mut self,
        options: &ConnectOptions,
        events: EventSink,
    ) -> Result<(), TransportError> {
        (**self).connect(options, events)
    }

    fn publish(&mut self, request: PublishRequest<'_>) -> Result<(), TransportError> {
        (**self).publish(request)
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        (**self).disconnect()
    }
}
