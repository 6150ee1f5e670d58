// Copyright 2026 The Framegate Project
// SPDX-License-Identifier: Apache-2.0

// Backpressured event emitter.
//
// One ordered outbound queue per session, drained by a single flusher
// task that serializes events to the byte sink in text event-stream
// framing. `send` is non-blocking up to the queue bound; past it the
// caller yields once and then awaits queue space (soft backpressure).
// A heartbeat ping keeps intermediaries from collapsing idle streams.

use crate::event::WireEvent;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// Heartbeat period for `ping` events.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// The byte sink has gone away (client disconnect or transport close).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Destination for serialized event frames. The flusher owns the sink and
/// is the only writer, so implementations see strictly ordered whole
/// frames. A write returning `SinkClosed` ends the stream silently.
#[async_trait]
pub trait ByteSink: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<(), SinkClosed>;
}

/// Sink backed by a bounded byte channel (the HTTP response body). When
/// the channel is full the flusher suspends here until the client drains.
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ByteSink for ChannelSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        self.tx.send(chunk).await.map_err(|_| SinkClosed)
    }
}

enum Outbound {
    Event(WireEvent),
    Close,
}

/// Serialize one event in text event-stream framing.
fn frame_bytes(event: &WireEvent) -> Bytes {
    let data = event.data().to_string();
    Bytes::from(format!("event: {}\ndata: {}\n\n", event.name(), data))
}

/// The per-session outbound event queue.
pub struct EventEmitter {
    tx: mpsc::Sender<Outbound>,
    closed: Arc<AtomicBool>,
    flusher: JoinHandle<()>,
}

impl EventEmitter {
    /// Create an emitter with the default heartbeat period.
    pub fn new(sink: impl ByteSink + 'static, capacity: usize) -> Self {
        Self::with_heartbeat(sink, capacity, HEARTBEAT_INTERVAL)
    }

    pub fn with_heartbeat(
        sink: impl ByteSink + 'static,
        capacity: usize,
        heartbeat: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let closed = Arc::new(AtomicBool::new(false));
        let flusher = tokio::spawn(flush_loop(rx, sink, closed.clone(), heartbeat));
        Self {
            tx,
            closed,
            flusher,
        }
    }

    /// Queue one event. Non-blocking while the queue has room; on overflow
    /// the caller yields once, then awaits space. No-op once closed.
    pub async fn send(&self, event: WireEvent) {
        if self.is_closed() {
            return;
        }
        match self.tx.try_send(Outbound::Event(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(ev)) => {
                tokio::task::yield_now().await;
                let _ = self.tx.send(ev).await;
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// True once the sink failed (client gone) or `close` was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Drain the queue, then close the sink. Subsequent sends are no-ops.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        let _ = self.tx.send(Outbound::Close).await;
    }

    /// Wait for the flusher to finish writing everything it will write.
    pub async fn join(self) {
        let _ = self.flusher.await;
    }
}

async fn flush_loop(
    mut rx: mpsc::Receiver<Outbound>,
    mut sink: impl ByteSink,
    closed: Arc<AtomicBool>,
    heartbeat: Duration,
) {
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(Outbound::Event(event)) => {
                    if sink.write(frame_bytes(&event)).await.is_err() {
                        closed.store(true, Ordering::Relaxed);
                        break;
                    }
                }
                Some(Outbound::Close) | None => break,
            },
            _ = ticker.tick() => {
                if sink.write(frame_bytes(&WireEvent::Ping)).await.is_err() {
                    closed.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }
    }
    // Dropping the sink ends the byte stream (closes the response body).
}
