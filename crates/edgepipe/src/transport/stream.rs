// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport writing newline-terminated payloads to a byte sink.
//!
//! Outcomes are reported immediately. Used for dry runs on stdout.

use super::{ConnectOptions, EventSink, PublishRequest, Transport, TransportError, TransportEvent};
use std::io::{self, Write};

/// Writes every published payload, followed by `\n`, to `W`.
pub struct StreamTransport<W> {
    writer: W,
    events: Option<EventSink>,
}

impl StreamTransport<io::Stdout> {
    /// Transport printing to standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> StreamTransport<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            events: None,
        }
    }

    /// Recover the sink.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line(&mut self, payload: &[u8]) -> io::Result<()> {
        self.writer.write_all(payload)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

impl<W: Write + Send> Transport for StreamTransport<W> {
    fn connect(
        &mut self,
        options: &ConnectOptions,
        events: EventSink,
    ) -> Result<(), TransportError> {
        tracing::debug!(client_id = %options.client_id, "stream transport connected");
        events.emit(TransportEvent::Connected);
        self.events = Some(events);
        Ok(())
    }

    fn publish(&mut self, request: PublishRequest<'_>) -> Result<(), TransportError> {
        if self.events.is_none() {
            return Err(TransportError::NotConnected);
        }

        let outcome = match self.write_line(request.payload) {
            Ok(()) => TransportEvent::PublishSucceeded {
                token: request.token,
            },
            Err(e) => TransportEvent::PublishFailed {
                token: request.token,
                reason: e.to_string(),
            },
        };
        if let Some(events) = &self.events {
            events.emit(outcome);
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        let events = self.events.take().ok_or(TransportError::NotConnected)?;
        let _ = self.writer.flush();
        events.emit(TransportEvent::Disconnected);
        Ok(())
    }
}
