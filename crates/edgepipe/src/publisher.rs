// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Synchronous pipeline.
//!
//! Reads one payload, publishes it and waits for the outcome before
//! reading the next. No queue: a slow broker directly slows down reading.
//! Each payload gets up to `max_attempts` publishes, reconnecting first
//! when the session was lost.

use crate::delivery::{DeliveryConfig, DeliveryError, DeliveryReport, EngineHandle};
use crate::ingest::{Ingest, Payload};
use crate::stats::PipelineStats;
use crate::transport::{
    DeliveryToken, EventSink, PublishRequest, Transport, TransportEvent,
};
use crossbeam::channel::Receiver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Wait between polls of a momentarily empty input.
const INPUT_POLL: Duration = Duration::from_millis(10);

enum Outcome {
    Acked,
    Failed(String),
}

/// Blocking publisher.
pub struct SyncPublisher<T> {
    transport: T,
    config: DeliveryConfig,
    sink: EventSink,
    events: Receiver<TransportEvent>,
    connected: bool,
    next_token: u64,
    running: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
}

impl<T: Transport> SyncPublisher<T> {
    pub fn new(transport: T, config: DeliveryConfig, stats: Arc<PipelineStats>) -> Self {
        let (sink, events) = EventSink::channel();
        Self {
            transport,
            config,
            sink,
            events,
            connected: false,
            next_token: 0,
            running: Arc::new(AtomicBool::new(true)),
            stats,
        }
    }

    /// Handle for stopping the publisher from another thread. The stop
    /// takes effect after the current payload.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle::new(self.running.clone(), self.stats.clone())
    }

    /// Recover the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Publish everything `ingest` produces, one payload at a time.
    pub fn run<I: Ingest + ?Sized>(&mut self, ingest: &mut I) -> Result<DeliveryReport, DeliveryError> {
        tracing::info!(topic = %self.config.topic, "synchronous publisher started");
        self.connect()?;

        while self.running.load(Ordering::SeqCst) {
            match ingest.next_payload()? {
                Some(payload) => self.deliver(&payload)?,
                None if ingest.is_exhausted() => break,
                None => thread::sleep(INPUT_POLL),
            }
        }

        let interrupted = !self.running.load(Ordering::SeqCst);
        self.disconnect();

        let stats = self.stats.snapshot();
        tracing::info!(
            published = stats.published,
            expired = stats.expired,
            interrupted,
            "synchronous publisher stopped"
        );
        Ok(DeliveryReport { stats, interrupted })
    }

    fn connect(&mut self) -> Result<(), DeliveryError> {
        tracing::info!(client_id = %self.config.connect.client_id, "connecting");
        self.transport
            .connect(&self.config.connect, self.sink.clone())?;

        let deadline = Instant::now() + self.config.connect.connect_timeout + self.config.disconnect_timeout;
        loop {
            let wait = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(wait) {
                Ok(TransportEvent::Connected) => {
                    tracing::info!("connected");
                    self.connected = true;
                    return Ok(());
                }
                Ok(TransportEvent::ConnectFailed { reason }) => {
                    tracing::error!(reason = %reason, "connect failed");
                    return Err(DeliveryError::ConnectFailed(reason));
                }
                Ok(_) => continue,
                Err(_) => {
                    return Err(DeliveryError::ConnectFailed(
                        "timed out waiting for the connection".to_string(),
                    ))
                }
            }
        }
    }

    fn deliver(&mut self, payload: &Payload) -> Result<(), DeliveryError> {
        for attempt in 1..=self.config.max_attempts {
            if !self.connected {
                self.stats.record_reconnect();
                self.connect()?;
            }

            let token = DeliveryToken(self.next_token);
            self.next_token += 1;
            let request = PublishRequest {
                token,
                topic: &self.config.topic,
                payload: payload.as_bytes(),
                qos: self.config.qos,
                retain: self.config.retain,
            };

            let outcome = match self.transport.publish(request) {
                Ok(()) => self.await_outcome(token),
                Err(e) => Outcome::Failed(e.to_string()),
            };

            match outcome {
                Outcome::Acked => {
                    self.stats.record_published(payload.len() as u64);
                    return Ok(());
                }
                Outcome::Failed(reason) => {
                    self.stats.record_failure();
                    tracing::warn!(
                        attempt,
                        max_attempts = self.config.max_attempts,
                        reason = %reason,
                        "publish failed"
                    );
                }
            }
        }

        tracing::warn!(bytes = payload.len(), "dropping message after exhausting attempts");
        self.stats.record_expired();
        Ok(())
    }

    fn await_outcome(&mut self, token: DeliveryToken) -> Outcome {
        let deadline = self.config.publish_timeout.map(|t| Instant::now() + t);

        loop {
            let event = match deadline {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    self.events.recv_timeout(wait).ok()
                }
                None => self.events.recv().ok(),
            };
            let Some(event) = event else {
                return Outcome::Failed(format!("no outcome for {}", token));
            };

            match event {
                TransportEvent::PublishSucceeded { token: acked } if acked == token => {
                    return Outcome::Acked;
                }
                TransportEvent::PublishFailed {
                    token: failed,
                    reason,
                } if failed == token => {
                    return Outcome::Failed(reason);
                }
                TransportEvent::ConnectionLost { cause } => {
                    tracing::warn!(cause = %cause, "connection lost");
                    self.connected = false;
                    return Outcome::Failed(format!("connection lost: {}", cause));
                }
                TransportEvent::Disconnected => {
                    self.connected = false;
                    return Outcome::Failed("disconnected".to_string());
                }
                other => tracing::debug!(event = ?other, "ignoring stale event"),
            }
        }
    }

    fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        if let Err(e) = self.transport.disconnect() {
            tracing::debug!(error = %e, "disconnect failed");
            return;
        }

        let deadline = Instant::now() + self.config.disconnect_timeout;
        loop {
            let wait = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(wait) {
                Ok(TransportEvent::Disconnected) => {
                    tracing::info!("disconnected");
                    break;
                }
                Ok(_) => continue,
                Err(_) => {
                    tracing::warn!("disconnect timed out");
                    break;
                }
            }
        }
        self.connected = false;
    }
}
