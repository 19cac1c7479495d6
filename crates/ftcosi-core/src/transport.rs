//! Point-to-point message transport between roster positions.
//!
//! The protocol's orchestration logic (subtree.rs, root.rs) only needs a
//! typed, per-pair FIFO channel and a way to address a broadcast stop signal
//! — it has no business knowing whether that channel is a real network
//! socket or an in-process queue. [`Transport`] is that seam; the only
//! implementation shipped here is [`InMemoryTransport`], which backs tests
//! and single-process deployments with `tokio::sync::mpsc`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::crypto::SignaturePoint;

/// The messages exchanged over the wire, per spec §6.
#[derive(Clone, Debug)]
pub enum WireMessage {
    /// Root (or subleader) asks `message` to be signed for this round.
    Announce { round: u64, message: Vec<u8> },
    /// A leaf's (or subtree's aggregated) partial result.
    Response {
        round: u64,
        signature: SignaturePoint,
        mask_bytes: Vec<u8>,
    },
    /// Broadcast: abandon the current round.
    Stop { round: u64 },
}

/// A message along with the roster index that sent it.
pub type Envelope = (usize, WireMessage);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no such roster position: {0}")]
    UnknownPeer(usize),
    #[error("peer {0} is no longer listening")]
    PeerGone(usize),
}

/// Point-to-point and broadcast delivery between roster positions,
/// addressed by roster index.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `message` from `from` to `to`. Per-pair delivery is FIFO.
    async fn send(&self, from: usize, to: usize, message: WireMessage) -> Result<(), TransportError>;

    /// Send `message` from `from` to every other known roster position.
    async fn broadcast(&self, from: usize, message: WireMessage) -> Result<(), TransportError>;

    /// Receive the next message addressed to `at`. Returns `None` once the
    /// sender side has been fully dropped (used in tests to detect
    /// shutdown, never expected during normal operation).
    async fn recv(&self, at: usize) -> Option<Envelope>;
}

/// An in-process [`Transport`] backed by one unbounded MPSC channel per
/// ordered pair of roster positions plus one inbox per position.
pub struct InMemoryTransport {
    size: usize,
    senders: HashMap<usize, mpsc::UnboundedSender<Envelope>>,
    receivers: std::sync::Mutex<HashMap<usize, mpsc::UnboundedReceiver<Envelope>>>,
}

impl InMemoryTransport {
    /// Build a fully connected in-memory transport for `n` roster positions,
    /// returning one [`Arc`] handle shared by every task.
    pub fn build(n: usize) -> Arc<Self> {
        let mut senders = HashMap::with_capacity(n);
        let mut receivers = HashMap::with_capacity(n);
        for i in 0..n {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(i, tx);
            receivers.insert(i, rx);
        }
        Arc::new(Self {
            size: n,
            senders,
            receivers: std::sync::Mutex::new(receivers),
        })
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, from: usize, to: usize, message: WireMessage) -> Result<(), TransportError> {
        let tx = self.senders.get(&to).ok_or(TransportError::UnknownPeer(to))?;
        tx.send((from, message)).map_err(|_| TransportError::PeerGone(to))
    }

    async fn broadcast(&self, from: usize, message: WireMessage) -> Result<(), TransportError> {
        for to in 0..self.size {
            if to == from {
                continue;
            }
            // A single gone peer does not abort the broadcast to the rest.
            let _ = self.send(from, to, message.clone()).await;
        }
        Ok(())
    }

    async fn recv(&self, at: usize) -> Option<Envelope> {
        let mut rx = self
            .receivers
            .lock()
            .expect("receivers mutex poisoned")
            .remove(&at)?;
        let result = rx.recv().await;
        self.receivers.lock().expect("receivers mutex poisoned").insert(at, rx);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn point_to_point_delivery_preserves_fifo_order() {
        let t = InMemoryTransport::build(3);
        t.send(0, 1, WireMessage::Announce { round: 1, message: vec![1] })
            .await
            .unwrap();
        t.send(0, 1, WireMessage::Announce { round: 1, message: vec![2] })
            .await
            .unwrap();

        let (from_a, msg_a) = t.recv(1).await.unwrap();
        let (from_b, msg_b) = t.recv(1).await.unwrap();
        assert_eq!(from_a, 0);
        assert_eq!(from_b, 0);
        assert!(matches!(msg_a, WireMessage::Announce { message, .. } if message == vec![1]));
        assert!(matches!(msg_b, WireMessage::Announce { message, .. } if message == vec![2]));
    }

    #[tokio::test]
    async fn broadcast_reaches_every_other_position() {
        let t = InMemoryTransport::build(4);
        t.broadcast(0, WireMessage::Stop { round: 7 }).await.unwrap();

        for at in [1, 2, 3] {
            let (from, msg) = t.recv(at).await.unwrap();
            assert_eq!(from, 0);
            assert!(matches!(msg, WireMessage::Stop { round: 7 }));
        }
    }

    #[tokio::test]
    async fn sending_to_unknown_peer_fails() {
        let t = InMemoryTransport::build(2);
        let err = t
            .send(0, 99, WireMessage::Stop { round: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::UnknownPeer(99)));
    }
}
