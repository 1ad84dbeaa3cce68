// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory loopback transport.
//!
//! Keeps every acknowledged publish and plays back scripted outcomes for
//! connects and publishes. Clones share state, so a caller can keep one
//! handle for inspection while the engine owns another.

use super::{
    ConnectOptions, EventSink, PublishRequest, Qos, Transport, TransportError, TransportEvent,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Outcome of the next `connect` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectScript {
    /// Report `Connected` immediately.
    #[default]
    Succeed,
    /// Report `ConnectFailed`.
    Fail,
    /// Report nothing until [`MemoryTransport::complete_connect`].
    Pending,
}

/// Outcome of the next `publish` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishScript {
    /// Keep the payload and report `PublishSucceeded`.
    #[default]
    Ack,
    /// Report `PublishFailed`.
    Fail,
    /// Report nothing.
    Silent,
    /// Report `ConnectionLost` instead of an outcome.
    DropConnection,
}

/// A publish the transport acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retain: bool,
}

#[derive(Default)]
struct State {
    connect_script: VecDeque<ConnectScript>,
    publish_script: VecDeque<PublishScript>,
    events: Option<EventSink>,
    connected: bool,
    connects: usize,
    attempts: usize,
    published: Vec<PublishedMessage>,
}

/// Scripted in-memory transport.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<State>>,
}

impl MemoryTransport {
    /// Transport that connects and acknowledges everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue connect outcomes; once used up, connects succeed.
    pub fn with_connect_script(self, script: impl IntoIterator<Item = ConnectScript>) -> Self {
        self.state.lock().connect_script.extend(script);
        self
    }

    /// Queue publish outcomes; once used up, publishes are acknowledged.
    pub fn with_publish_script(self, script: impl IntoIterator<Item = PublishScript>) -> Self {
        self.state.lock().publish_script.extend(script);
        self
    }

    /// Acknowledged publishes, in order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().published.clone()
    }

    /// Acknowledged payloads, in order.
    pub fn published_payloads(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .published
            .iter()
            .map(|m| m.payload.clone())
            .collect()
    }

    /// Publish calls accepted while connected.
    pub fn publish_attempts(&self) -> usize {
        self.state.lock().attempts
    }

    /// `connect` calls received.
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Finish a [`ConnectScript::Pending`] connect. Returns false if no
    /// session is waiting.
    pub fn complete_connect(&self) -> bool {
        let mut state = self.state.lock();
        if state.connected {
            return false;
        }
        let Some(events) = state.events.clone() else {
            return false;
        };
        state.connected = true;
        events.emit(TransportEvent::Connected)
    }

    /// Simulate the broker dropping the session.
    pub fn drop_connection(&self, cause: &str) {
        let mut state = self.state.lock();
        if !state.connected {
            return;
        }
        state.connected = false;
        if let Some(events) = &state.events {
            events.emit(TransportEvent::ConnectionLost {
                cause: cause.to_string(),
            });
        }
    }
}

impl Transport for MemoryTransport {
    fn connect(
        &mut self,
        options: &ConnectOptions,
        events: EventSink,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.connects += 1;
        let script = state.connect_script.pop_front().unwrap_or_default();
        tracing::debug!(client_id = %options.client_id, ?script, "memory transport connect");

        match script {
            ConnectScript::Succeed => {
                state.connected = true;
                events.emit(TransportEvent::Connected);
            }
            ConnectScript::Fail => {
                events.emit(TransportEvent::ConnectFailed {
                    reason: "connection refused".to_string(),
                });
            }
            ConnectScript::Pending => {}
        }
        state.events = Some(events);
        Ok(())
    }

    fn publish(&mut self, request: PublishRequest<'_>) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        let Some(events) = state.events.clone() else {
            return Err(TransportError::NotConnected);
        };
        state.attempts += 1;

        match state.publish_script.pop_front().unwrap_or_default() {
            PublishScript::Ack => {
                state.published.push(PublishedMessage {
                    topic: request.topic.to_string(),
                    payload: request.payload.to_vec(),
                    qos: request.qos,
                    retain: request.retain,
                });
                events.emit(TransportEvent::PublishSucceeded {
                    token: request.token,
                });
            }
            PublishScript::Fail => {
                events.emit(TransportEvent::PublishFailed {
                    token: request.token,
                    reason: "publish rejected".to_string(),
                });
            }
            PublishScript::Silent => {}
            PublishScript::DropConnection => {
                state.connected = false;
                events.emit(TransportEvent::ConnectionLost {
                    cause: "connection reset".to_string(),
                });
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let events = state.events.take().ok_or(TransportError::NotConnected)?;
        state.connected = false;
        events.emit(TransportEvent::Disconnected);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DeliveryToken;

    fn request(token: u64, payload: &[u8]) -> PublishRequest<'_> {
        PublishRequest {
            token: DeliveryToken(token),
            topic: "telemetry",
            payload,
            qos: Qos::AtLeastOnce,
            retain: true,
        }
    }

    #[test]
    fn test_scripted_publish_outcomes() {
        let (sink, rx) = EventSink::channel();
        let mut transport = MemoryTransport::new()
            .with_publish_script([PublishScript::Fail, PublishScript::Silent]);
        let broker = transport.clone();

        transport.connect(&ConnectOptions::default(), sink).expect("connect");
        transport.publish(request(1, b"a")).expect("publish");
        transport.publish(request(2, b"b")).expect("publish");
        transport.publish(request(3, b"c")).expect("publish");

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                TransportEvent::Connected,
                TransportEvent::PublishFailed {
                    token: DeliveryToken(1),
                    reason: "publish rejected".to_string()
                },
                TransportEvent::PublishSucceeded { token: DeliveryToken(3) },
            ]
        );
        assert_eq!(broker.publish_attempts(), 3);
        assert_eq!(broker.published_payloads(), vec![b"c".to_vec()]);
        let msg = &broker.published()[0];
        assert_eq!(msg.topic, "telemetry");
        assert!(msg.retain);
    }

    #[test]
    fn test_pending_connect() {
        let (sink, rx) = EventSink::channel();
        let mut transport = MemoryTransport::new().with_connect_script([ConnectScript::Pending]);
        let broker = transport.clone();

        transport.connect(&ConnectOptions::default(), sink).expect("connect");
        assert!(rx.try_recv().is_err());
        assert!(matches!(
            transport.publish(request(1, b"x")),
            Err(TransportError::NotConnected)
        ));

        assert!(broker.complete_connect());
        assert_eq!(rx.try_recv().expect("event"), TransportEvent::Connected);
        assert!(!broker.complete_connect());
    }

    #[test]
    fn test_drop_connection_on_publish() {
        let (sink, rx) = EventSink::channel();
        let mut transport =
            MemoryTransport::new().with_publish_script([PublishScript::DropConnection]);

        transport.connect(&ConnectOptions::default(), sink).expect("connect");
        transport.publish(request(1, b"x")).expect("publish");
        assert!(!transport.is_connected());

        let events: Vec<_> = rx.try_iter().collect();
        assert!(matches!(events[1], TransportEvent::ConnectionLost { .. }));
    }

    #[test]
    fn test_failed_connect() {
        let (sink, rx) = EventSink::channel();
        let mut transport = MemoryTransport::new().with_connect_script([ConnectScript::Fail]);
        transport.connect(&ConnectOptions::default(), sink).expect("connect call");
        assert!(matches!(
            rx.try_recv().expect("event"),
            TransportEvent::ConnectFailed { .. }
        ));
        assert_eq!(transport.connect_count(), 1);
        assert!(!transport.is_connected());
    }
}
