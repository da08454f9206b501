//! # Stream Registry (§3 Stream, §4.2)
//!
//! A process-wide mapping from [`StreamId`] to the bounded byte-queue that
//! drains into that stream's public socket. Same `DashMap` discipline as
//! the Session Registry.
//!
//! Closing the queue is deliberately *not* this registry's job (§4.2):
//! `Remove` only ever drops the map entry. [`StreamInbound`] is owned
//! exclusively by Pump A — the only task that ever calls [`recv`](StreamInbound::recv)
//! — and teardown is signaled out-of-band through a [`CancellationToken`]
//! shared with Pump B, rather than through the queue itself: a `Mutex`
//! guarding the `Receiver` would let Pump A hold the lock across an idle
//! `recv().await`, and Pump B's teardown call would then block forever
//! waiting for that same lock (§8 S6 depends on this *not* happening).

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type StreamId = String;

/// Capacity of a stream's inbound (agent → public) byte-queue (§3).
pub const QUEUE_CAPACITY: usize = 100;

/// The consumer half of a stream's inbound queue, held exclusively by
/// Pump A. Not `Clone` — there is never a second reader. Pump B requests
/// teardown through a [`CancellationToken`] obtained via
/// [`cancel_token`](Self::cancel_token), which only ever signals, never
/// touches the `Receiver`, so it can never block on a concurrent `recv`.
pub struct StreamInbound {
    rx: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
}

impl StreamInbound {
    /// A cloneable handle onto this stream's teardown signal. Cancelling
    /// it wakes a `recv` that is parked waiting on an otherwise-idle
    /// queue; dropping `self` afterward closes the queue for good, which
    /// is what makes further sends into the registry's `Sender` fail.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Dequeues the next chunk. Once cancellation has been requested,
    /// drains whatever is already buffered before returning `None`
    /// instead of waiting on a queue that will never receive more —
    /// §8 S6's "Pump A continues draining any in-flight queue before
    /// exiting".
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        tokio::select! {
            biased;
            chunk = self.rx.recv() => chunk,
            _ = self.cancel.cancelled() => self.rx.try_recv().ok(),
        }
    }
}

/// Creates a fresh bounded queue: the `Sender` half goes into the Stream
/// Registry for the control-channel demultiplexer to enqueue into, the
/// [`StreamInbound`] half is handed directly to the admitting connection's
/// Pump A.
pub fn new_queue() -> (mpsc::Sender<Vec<u8>>, StreamInbound) {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    (
        tx,
        StreamInbound {
            rx,
            cancel: CancellationToken::new(),
        },
    )
}

/// §4.2 Stream Registry.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    streams: Arc<DashMap<StreamId, mpsc::Sender<Vec<u8>>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `queue` (the producer half) for inbound bytes under `stream_id`.
    pub fn add(&self, stream_id: StreamId, queue: mpsc::Sender<Vec<u8>>) {
        self.streams.insert(stream_id, queue);
    }

    /// Returns a clone of the producer handle, if the stream is still live.
    pub fn lookup(&self, stream_id: &str) -> Option<mpsc::Sender<Vec<u8>>> {
        self.streams.get(stream_id).map(|e| e.value().clone())
    }

    /// Idempotent. Does not close the queue (see module docs).
    pub fn remove(&self, stream_id: &str) {
        self.streams.remove(stream_id);
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }
}
