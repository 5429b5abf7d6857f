//! Peer connections.
//!
//! A [`Connection`] is one bidirectional, message-framed link to a remote
//! peer. The broker only ever needs its identity and a way to push an
//! already-encoded frame at it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use taskcast_core::{ConnectionError, ConnectionId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A link to a remote peer that the broker can send frames on.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Stable identity of this link; keys disconnect cleanup.
    fn id(&self) -> &ConnectionId;

    /// Hand one encoded frame to the link.
    ///
    /// May wait while the peer's outbound queue is full. There is no timeout.
    async fn send(&self, frame: Arc<str>) -> Result<(), ConnectionError>;
}

/// Connection backed by an mpsc queue drained by a transport writer task.
pub struct ClientConnection {
    id: ConnectionId,
    tx: mpsc::Sender<Arc<str>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the peer has responded since the last heartbeat check.
    pub is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    /// Frames that could not be delivered because the link was gone.
    pub dropped_messages: AtomicU64,
    closed: CancellationToken,
}

impl ClientConnection {
    /// Wrap the sending half of a transport's outbound queue.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<str>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            closed: CancellationToken::new(),
        }
    }

    /// Mark the connection as alive (pong or any inbound traffic).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Signal that the peer is gone. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Closed explicitly, or the writer dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Connection for ClientConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn send(&self, frame: Arc<str>) -> Result<(), ConnectionError> {
        // A send parked on a full queue is released when the link closes.
        let sent = !self.is_closed()
            && tokio::select! {
                biased;
                () = self.closed.cancelled() => false,
                res = self.tx.send(frame) => res.is_ok(),
            };
        if sent {
            Ok(())
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            Err(ConnectionError::Closed(self.id.to_string()))
        }
    }
}
