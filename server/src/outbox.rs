//! Queue of datagrams waiting to be sent
//!
//! Handlers and tick loops never touch the socket. They encode envelopes and
//! push them here; the network sender task owns the actual `send_to` calls.

use crate::error::ServerError;
use shared::{encode, Envelope};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One datagram addressed to one endpoint
#[derive(Debug, Clone)]
pub struct Outbound {
    pub addr: SocketAddr,
    pub datagram: Arc<[u8]>,
}

#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Outbox {
    /// Creates an outbox and the receiver the sender task drains
    ///
    /// The queue is unbounded. Once the receiver is dropped every send fails
    /// with `OutboxClosed`.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Encodes `envelope` and queues it for `addr`
    pub fn send(&self, addr: SocketAddr, envelope: &Envelope) -> Result<(), ServerError> {
        let datagram: Arc<[u8]> = encode(envelope)?.into();
        self.send_datagram(addr, datagram)
    }

    /// Queues an already encoded datagram, sharing the buffer between sends
    pub fn send_datagram(&self, addr: SocketAddr, datagram: Arc<[u8]>) -> Result<(), ServerError> {
        self.tx
            .send(Outbound { addr, datagram })
            .map_err(|_| ServerError::OutboxClosed)
    }
}
