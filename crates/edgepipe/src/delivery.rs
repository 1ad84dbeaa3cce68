// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Asynchronous delivery engine.
//!
//! Two threads take part. The `edgepipe-ingest` producer thread owns the
//! input side: it reads, frames and transcodes, then hands payloads to the
//! shared queue. The engine thread runs the loop below; the transport
//! reports outcomes through an event channel that the loop drains on every
//! iteration, so all delivery state has a single writer. A blocked read
//! therefore never stalls publishing, retries or reconnects.
//!
//! ```text
//!            ConnectFailed (fatal)
//!  Connecting ─────────────────────> Failed
//!      │  ^
//!      │  └──────────────┐ ConnectionLost (reconnect)
//!      v Connected       │
//!  Connected ────────────┘
//! ```
//!
//! Each iteration:
//!
//! 1. drain transport events;
//! 2. note whether the producer has finished, collecting its error;
//! 3. fail the in-flight publish if it exceeded the publish timeout;
//! 4. when connected with nothing in flight: retry the failed message
//!    while it has attempts left, otherwise drop it, otherwise dequeue
//!    the next one, and publish;
//! 5. stop once input is exhausted, nothing is queued and nothing is
//!    pending;
//! 6. wait up to `idle_sleep` for an event if nothing moved.
//!
//! The queue is the only backpressure: while it is full the producer does
//! not poll the ingest side and the input is not read. A payload the queue
//! refuses (lock contention) stays in the producer's backlog slot and is
//! offered again before anything new is read.

use crate::framer::FrameError;
use crate::ingest::{Ingest, Payload};
use crate::queue::BoundedQueue;
use crate::stats::{PipelineStats, PipelineStatsSnapshot};
use crate::transport::{
    ConnectOptions, DeliveryToken, EventSink, PublishRequest, Qos, Transport, TransportError,
    TransportEvent,
};
use crossbeam::channel::Receiver;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Delivery errors. All of them end the run.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("input error: {0}")]
    Ingest(#[from] FrameError),

    #[error("cannot start input thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("input thread panicked")]
    InputPanicked,
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub topic: String,
    pub qos: Qos,
    pub retain: bool,
    /// Publish attempts per message before it is dropped.
    pub max_attempts: u32,
    pub queue_capacity: usize,
    /// Longest wait for an event when an iteration made no progress.
    pub idle_sleep: Duration,
    /// In-flight publishes older than this count as failed. `None` waits
    /// forever.
    pub publish_timeout: Option<Duration>,
    /// Bound on each shutdown wait (in-flight publish, then disconnect).
    pub disconnect_timeout: Duration,
    pub connect: ConnectOptions,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            topic: "test".to_string(),
            qos: Qos::AtMostOnce,
            retain: false,
            max_attempts: 5,
            queue_capacity: 20,
            idle_sleep: Duration::from_millis(2),
            publish_timeout: Some(Duration::from_secs(30)),
            disconnect_timeout: Duration::from_secs(2),
            connect: ConnectOptions::default(),
        }
    }
}

/// Broker session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub stats: PipelineStatsSnapshot,
    /// True if the run was stopped through [`EngineHandle::stop`].
    pub interrupted: bool,
}

/// Cross-thread control of a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    running: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
}

impl EngineHandle {
    pub(crate) fn new(running: Arc<AtomicBool>, stats: Arc<PipelineStats>) -> Self {
        Self { running, stats }
    }

    /// Ask the engine to stop after the current iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    token: DeliveryToken,
    started: Instant,
}

/// Queue-decoupled publisher.
pub struct DeliveryEngine<T> {
    transport: T,
    config: DeliveryConfig,
    queue: Arc<BoundedQueue<Payload>>,
    sink: EventSink,
    events: Receiver<TransportEvent>,
    state: ConnectionState,
    /// Message being published or waiting for a retry.
    current: Option<Payload>,
    in_flight: Option<InFlight>,
    attempts: u32,
    /// Set at shutdown; tells the producer to stop reading.
    closing: Arc<AtomicBool>,
    next_token: u64,
    running: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
}

impl<T: Transport> DeliveryEngine<T> {
    /// # Panics
    /// Panics if `config.queue_capacity` is 0.
    pub fn new(transport: T, config: DeliveryConfig, stats: Arc<PipelineStats>) -> Self {
        let release_stats = stats.clone();
        let queue = BoundedQueue::new(config.queue_capacity)
            .with_release(move |_: Payload| release_stats.record_discarded());
        let queue = Arc::new(queue);
        let (sink, events) = EventSink::channel();

        Self {
            transport,
            config,
            queue,
            sink,
            events,
            state: ConnectionState::Disconnected,
            current: None,
            in_flight: None,
            attempts: 0,
            closing: Arc::new(AtomicBool::new(false)),
            next_token: 0,
            running: Arc::new(AtomicBool::new(true)),
            stats,
        }
    }

    /// Handle for stopping the engine from another thread.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle::new(self.running.clone(), self.stats.clone())
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn queue(&self) -> &BoundedQueue<Payload> {
        &self.queue
    }

    /// Recover the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Connect, deliver everything `ingest` produces, then disconnect.
    ///
    /// `ingest` moves to a dedicated producer thread, so a read that
    /// blocks (a quiet pipe or terminal) does not hold up delivery.
    ///
    /// Returns once the input is exhausted and every message was either
    /// acknowledged or dropped after `max_attempts`, or once stopped
    /// through the [`EngineHandle`]. Queued messages left at that point
    /// are released unpublished. A producer still blocked in a read when
    /// the run ends is left behind; it stops at its next wakeup.
    pub fn run<I>(&mut self, ingest: I) -> Result<DeliveryReport, DeliveryError>
    where
        I: Ingest + Send + 'static,
    {
        tracing::info!(
            topic = %self.config.topic,
            qos = u8::from(self.config.qos),
            queue_capacity = self.config.queue_capacity,
            "delivery engine started"
        );

        self.closing.store(false, Ordering::SeqCst);
        let mut producer = None;
        let result = self
            .connect()
            .and_then(|()| {
                producer = Some(self.spawn_producer(ingest)?);
                self.run_loop(&mut producer)
            });
        let interrupted = !self.running.load(Ordering::SeqCst);
        self.shutdown(producer);
        result?;

        let stats = self.stats.snapshot();
        tracing::info!(
            published = stats.published,
            expired = stats.expired,
            discarded = stats.discarded,
            interrupted,
            "delivery engine stopped"
        );
        Ok(DeliveryReport { stats, interrupted })
    }

    fn spawn_producer<I>(&self, ingest: I) -> Result<Producer, DeliveryError>
    where
        I: Ingest + Send + 'static,
    {
        let producer = IngestProducer {
            queue: self.queue.clone(),
            stats: self.stats.clone(),
            running: self.running.clone(),
            closing: self.closing.clone(),
            idle_sleep: self.config.idle_sleep,
        };
        thread::Builder::new()
            .name("edgepipe-ingest".to_string())
            .spawn(move || producer.run(ingest))
            .map_err(DeliveryError::Spawn)
    }

    fn run_loop(&mut self, producer: &mut Option<Producer>) -> Result<(), DeliveryError> {
        let mut done_reading = false;

        while self.running.load(Ordering::SeqCst) {
            let mut progress = self.drain_events()?;

            if !done_reading && producer.as_ref().map_or(true, |p| p.is_finished()) {
                if let Some(finished) = producer.take() {
                    join_producer(finished)?;
                }
                tracing::debug!("input exhausted");
                done_reading = true;
                progress = true;
            }

            progress |= self.check_publish_timeout();

            if self.state == ConnectionState::Connected && self.in_flight.is_none() {
                progress |= self.publish_step();
            }

            if done_reading && self.current.is_none() && self.queue.is_empty() {
                return Ok(());
            }

            if !progress {
                if let Ok(event) = self.events.recv_timeout(self.config.idle_sleep) {
                    self.handle_event(event)?;
                }
            }
        }
        Ok(())
    }

    fn connect(&mut self) -> Result<(), DeliveryError> {
        tracing::info!(client_id = %self.config.connect.client_id, "connecting");
        self.state = ConnectionState::Connecting;
        self.transport
            .connect(&self.config.connect, self.sink.clone())?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    fn drain_events(&mut self) -> Result<bool, DeliveryError> {
        let mut progress = false;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event)?;
            progress = true;
        }
        Ok(progress)
    }

    fn handle_event(&mut self, event: TransportEvent) -> Result<(), DeliveryError> {
        match event {
            TransportEvent::Connected => {
                tracing::info!("connected");
                self.state = ConnectionState::Connected;
            }
            TransportEvent::ConnectFailed { reason } => {
                tracing::error!(reason = %reason, "connect failed");
                self.state = ConnectionState::Failed;
                return Err(DeliveryError::ConnectFailed(reason));
            }
            TransportEvent::ConnectionLost { cause } => {
                tracing::warn!(cause = %cause, "connection lost");
                self.state = ConnectionState::Disconnected;
                if self.in_flight.take().is_some() {
                    self.record_failure(&format!("connection lost: {}", cause));
                }
                if self.running.load(Ordering::SeqCst) && !self.closing.load(Ordering::SeqCst) {
                    self.stats.record_reconnect();
                    self.connect()?;
                }
            }
            TransportEvent::PublishSucceeded { token } => {
                if !self.is_in_flight(token) {
                    tracing::debug!(token = %token, "ignoring stale acknowledgement");
                    return Ok(());
                }
                self.in_flight = None;
                self.attempts = 0;
                if let Some(payload) = self.current.take() {
                    self.stats.record_published(payload.len() as u64);
                }
            }
            TransportEvent::PublishFailed { token, reason } => {
                if !self.is_in_flight(token) {
                    tracing::debug!(token = %token, "ignoring stale failure");
                    return Ok(());
                }
                self.in_flight = None;
                self.record_failure(&reason);
            }
            TransportEvent::Disconnected => {
                tracing::info!("disconnected");
                self.state = ConnectionState::Disconnected;
            }
        }
        Ok(())
    }

    fn is_in_flight(&self, token: DeliveryToken) -> bool {
        self.in_flight.is_some_and(|flight| flight.token == token)
    }

    fn record_failure(&mut self, reason: &str) {
        self.attempts += 1;
        self.stats.record_failure();
        tracing::warn!(
            attempt = self.attempts,
            max_attempts = self.config.max_attempts,
            reason = %reason,
            "publish failed"
        );
    }

    // ------------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------------

    fn check_publish_timeout(&mut self) -> bool {
        let (Some(timeout), Some(flight)) = (self.config.publish_timeout, self.in_flight) else {
            return false;
        };
        if flight.started.elapsed() < timeout {
            return false;
        }
        self.in_flight = None;
        self.record_failure(&format!("no outcome for {} after {:?}", flight.token, timeout));
        true
    }

    fn publish_step(&mut self) -> bool {
        if self.current.is_some() && self.attempts >= self.config.max_attempts {
            if let Some(payload) = self.current.take() {
                tracing::warn!(
                    attempts = self.attempts,
                    bytes = payload.len(),
                    "dropping message after exhausting attempts"
                );
                self.stats.record_expired();
            }
            self.attempts = 0;
        }

        if self.current.is_none() {
            match self.queue.try_dequeue() {
                Some(payload) => {
                    self.current = Some(payload);
                    self.attempts = 0;
                }
                None => return false,
            }
        }

        self.start_publish();
        true
    }

    fn start_publish(&mut self) {
        let Some(payload) = &self.current else {
            return;
        };

        let token = DeliveryToken(self.next_token);
        self.next_token += 1;

        let request = PublishRequest {
            token,
            topic: &self.config.topic,
            payload: payload.as_bytes(),
            qos: self.config.qos,
            retain: self.config.retain,
        };

        match self.transport.publish(request) {
            Ok(()) => {
                self.in_flight = Some(InFlight {
                    token,
                    started: Instant::now(),
                });
            }
            Err(e) => self.record_failure(&e.to_string()),
        }
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    fn shutdown(&mut self, producer: Option<Producer>) {
        self.closing.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + self.config.disconnect_timeout;
        while self.in_flight.is_some() {
            let Some(wait) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            match self.events.recv_timeout(wait) {
                Ok(event) => {
                    if let Err(e) = self.handle_event(event) {
                        tracing::debug!(error = %e, "event failed during shutdown");
                    }
                }
                Err(_) => break,
            }
        }

        if matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            match self.transport.disconnect() {
                Ok(()) => self.await_disconnect(),
                Err(e) => tracing::debug!(error = %e, "disconnect failed"),
            }
        }
        if self.state != ConnectionState::Failed {
            self.state = ConnectionState::Disconnected;
        }

        if let Some(producer) = producer {
            self.await_producer(producer, deadline);
        }

        let mut discarded = 0;
        if self.current.take().is_some() {
            self.stats.record_discarded();
            discarded += 1;
        }
        discarded += self.queue.release_all();
        if discarded > 0 {
            tracing::warn!(discarded, "released undelivered messages");
        }
        self.in_flight = None;
    }

    /// Give the producer until `deadline` to notice the shutdown. One still
    /// blocked in a read is detached.
    fn await_producer(&self, producer: Producer, deadline: Instant) {
        while !producer.is_finished() {
            if Instant::now() >= deadline {
                tracing::debug!("input thread still blocked, detaching");
                return;
            }
            thread::sleep(self.config.idle_sleep);
        }
        if let Err(e) = join_producer(producer) {
            tracing::debug!(error = %e, "input failed during shutdown");
        }
    }

    fn await_disconnect(&mut self) {
        let deadline = Instant::now() + self.config.disconnect_timeout;
        while self.state != ConnectionState::Disconnected {
            let Some(wait) = deadline.checked_duration_since(Instant::now()) else {
                tracing::warn!("disconnect timed out");
                return;
            };
            match self.events.recv_timeout(wait) {
                Ok(event) => {
                    if let Err(e) = self.handle_event(event) {
                        tracing::debug!(error = %e, "event failed during disconnect");
                    }
                }
                Err(_) => {
                    tracing::warn!("disconnect timed out");
                    return;
                }
            }
        }
    }
}

// ============================================================================
// Producer thread
// ============================================================================

type Producer = JoinHandle<Result<(), FrameError>>;

fn join_producer(producer: Producer) -> Result<(), DeliveryError> {
    match producer.join() {
        Ok(result) => result.map_err(DeliveryError::Ingest),
        Err(_) => Err(DeliveryError::InputPanicked),
    }
}

/// Input side of the engine, run on the `edgepipe-ingest` thread.
struct IngestProducer {
    queue: Arc<BoundedQueue<Payload>>,
    stats: Arc<PipelineStats>,
    running: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    idle_sleep: Duration,
}

impl IngestProducer {
    fn active(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.closing.load(Ordering::SeqCst)
    }

    fn run<I: Ingest>(self, mut ingest: I) -> Result<(), FrameError> {
        // Payload the queue refused, offered again before reading more input.
        let mut backlog: Option<Payload> = None;

        while self.active() {
            if let Some(payload) = backlog.take() {
                match self.queue.try_enqueue(payload) {
                    Ok(()) => self.stats.record_enqueued(),
                    Err(rejected) => {
                        backlog = Some(rejected.into_inner());
                        thread::sleep(self.idle_sleep);
                    }
                }
                continue;
            }

            if self.queue.available_slots() == 0 {
                thread::sleep(self.idle_sleep);
                continue;
            }

            match ingest.next_payload()? {
                Some(payload) => backlog = Some(payload),
                None if ingest.is_exhausted() => return Ok(()),
                None => thread::sleep(self.idle_sleep),
            }
        }

        if backlog.take().is_some() {
            self.stats.record_discarded();
        }
        Ok(())
    }
}
