// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Line-oriented TCP transport.
//!
//! Payloads are written to the broker endpoint as newline-terminated
//! lines. All socket work happens on a dedicated I/O thread; the
//! [`Transport`] calls only queue commands for it:
//!
//! ```text
//!  TcpTransport ──Command──> [edgepipe-tcp-io] ──bytes──> broker
//!                                   |
//!  DeliveryEngine <──TransportEvent─+
//! ```
//!
//! A write error fails the publish, reports the connection as lost and
//! drops the socket. The next `connect` opens a fresh one.

use super::{
    ConnectOptions, DeliveryToken, EventSink, PublishRequest, Transport, TransportError,
    TransportEvent,
};
use crossbeam::channel::{self, Receiver, Sender};
use std::io::{self, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Lower bound for the socket write timeout.
const MIN_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Commands
// ============================================================================

/// Commands sent to the I/O thread.
#[derive(Debug)]
enum Command {
    /// Open the session
    Connect {
        options: ConnectOptions,
        events: EventSink,
    },

    /// Write one frame
    Publish {
        token: DeliveryToken,
        frame: Vec<u8>,
    },

    /// Close the session
    Disconnect,

    /// Stop the I/O thread
    Shutdown,
}

// ============================================================================
// Transport handle
// ============================================================================

/// TCP transport to `host:port`.
pub struct TcpTransport {
    host: String,
    port: u16,
    cmd_tx: Option<Sender<Command>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl TcpTransport {
    /// Transport for `host:port`. No thread or socket is created until
    /// the first `connect`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            cmd_tx: None,
            thread_handle: None,
        }
    }

    /// Endpoint in `host:port` form.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn spawn_io_thread(&mut self) -> Result<Sender<Command>, TransportError> {
        if let Some(tx) = &self.cmd_tx {
            return Ok(tx.clone());
        }

        let (tx, rx) = channel::unbounded();
        let worker = IoWorker {
            host: self.host.clone(),
            port: self.port,
            rx,
            stream: None,
            events: None,
        };
        let handle = thread::Builder::new()
            .name("edgepipe-tcp-io".to_string())
            .spawn(move || worker.run())?;

        self.thread_handle = Some(handle);
        self.cmd_tx = Some(tx.clone());
        Ok(tx)
    }

    fn send(&self, command: Command) -> Result<(), TransportError> {
        let tx = self.cmd_tx.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(command).map_err(|_| TransportError::Closed)
    }
}

impl Transport for TcpTransport {
    fn connect(
        &mut self,
        options: &ConnectOptions,
        events: EventSink,
    ) -> Result<(), TransportError> {
        let tx = self.spawn_io_thread()?;
        tx.send(Command::Connect {
            options: options.clone(),
            events,
        })
        .map_err(|_| TransportError::Closed)
    }

    fn publish(&mut self, request: PublishRequest<'_>) -> Result<(), TransportError> {
        tracing::trace!(token = %request.token, topic = request.topic, bytes = request.payload.len(), "queue publish");
        let mut frame = Vec::with_capacity(request.payload.len() + 1);
        frame.extend_from_slice(request.payload);
        frame.push(b'\n');
        self.send(Command::Publish {
            token: request.token,
            frame,
        })
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.send(Command::Disconnect)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(Command::Shutdown);
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

// ============================================================================
// I/O thread
// ============================================================================

struct IoWorker {
    host: String,
    port: u16,
    rx: Receiver<Command>,
    stream: Option<TcpStream>,
    events: Option<EventSink>,
}

impl IoWorker {
    fn run(mut self) {
        while let Ok(command) = self.rx.recv() {
            match command {
                Command::Connect { options, events } => self.handle_connect(&options, events),
                Command::Publish { token, frame } => self.handle_publish(token, &frame),
                Command::Disconnect => self.handle_disconnect(),
                Command::Shutdown => break,
            }
        }

        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    fn handle_connect(&mut self, options: &ConnectOptions, events: EventSink) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.events = Some(events);

        match self.open(options) {
            Ok(stream) => {
                tracing::debug!(
                    peer = %self.host,
                    port = self.port,
                    client_id = %options.client_id,
                    "TCP session open"
                );
                self.stream = Some(stream);
                self.emit(TransportEvent::Connected);
            }
            Err(e) => {
                self.emit(TransportEvent::ConnectFailed {
                    reason: format!("{}:{}: {}", self.host, self.port, e),
                });
            }
        }
    }

    fn open(&self, options: &ConnectOptions) -> io::Result<TcpStream> {
        let mut last_err = None;

        for addr in (self.host.as_str(), self.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, options.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_write_timeout(Some(options.keep_alive.max(MIN_WRITE_TIMEOUT)))?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no address")
        }))
    }

    fn handle_publish(&mut self, token: DeliveryToken, frame: &[u8]) {
        let Some(stream) = self.stream.as_mut() else {
            self.emit(TransportEvent::PublishFailed {
                token,
                reason: "not connected".to_string(),
            });
            return;
        };

        let written = stream.write_all(frame).and_then(|()| stream.flush());
        match written {
            Ok(()) => self.emit(TransportEvent::PublishSucceeded { token }),
            Err(e) => {
                if let Some(stream) = self.stream.take() {
                    let _ = stream.shutdown(Shutdown::Both);
                }
                self.emit(TransportEvent::PublishFailed {
                    token,
                    reason: e.to_string(),
                });
                self.emit(TransportEvent::ConnectionLost {
                    cause: e.to_string(),
                });
            }
        }
    }

    fn handle_disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.emit(TransportEvent::Disconnected);
        self.events = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Qos;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    const WAIT: Duration = Duration::from_secs(5);

    fn request(token: u64, payload: &[u8]) -> PublishRequest<'_> {
        PublishRequest {
            token: DeliveryToken(token),
            topic: "test",
            payload,
            qos: Qos::AtMostOnce,
            retain: false,
        }
    }

    #[test]
    fn test_publish_lines_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let reader = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            BufReader::new(stream)
                .lines()
                .map(|line| line.expect("line"))
                .collect::<Vec<_>>()
        });

        let (sink, rx) = EventSink::channel();
        let mut transport = TcpTransport::new("127.0.0.1", port);
        transport.connect(&ConnectOptions::default(), sink).expect("connect");
        assert_eq!(rx.recv_timeout(WAIT).expect("event"), TransportEvent::Connected);

        transport.publish(request(1, b"{\"a\":1}")).expect("publish");
        transport.publish(request(2, b"{\"b\":2}")).expect("publish");
        assert_eq!(
            rx.recv_timeout(WAIT).expect("event"),
            TransportEvent::PublishSucceeded { token: DeliveryToken(1) }
        );
        assert_eq!(
            rx.recv_timeout(WAIT).expect("event"),
            TransportEvent::PublishSucceeded { token: DeliveryToken(2) }
        );

        transport.disconnect().expect("disconnect");
        assert_eq!(rx.recv_timeout(WAIT).expect("event"), TransportEvent::Disconnected);

        let lines = reader.join().expect("reader thread");
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn test_connect_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").port()
        };

        let (sink, rx) = EventSink::channel();
        let mut transport = TcpTransport::new("127.0.0.1", port);
        transport.connect(&ConnectOptions::default(), sink).expect("connect");
        assert!(matches!(
            rx.recv_timeout(WAIT).expect("event"),
            TransportEvent::ConnectFailed { .. }
        ));
    }

    #[test]
    fn test_publish_before_connect() {
        let mut transport = TcpTransport::new("127.0.0.1", 1);
        assert!(matches!(
            transport.publish(request(1, b"x")),
            Err(TransportError::NotConnected)
        ));
        assert_eq!(transport.endpoint(), "127.0.0.1:1");
    }
}
