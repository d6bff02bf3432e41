//! Error taxonomy for the server
//!
//! Every variant except `Bind` describes a failure scoped to a single
//! datagram, recipient or tick. Callers log those and keep looping.

use crate::store::StoreError;
use shared::{CodecError, MessageType, PlayerId};
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("{message_type} from {addr} has no session")]
    UnknownSender {
        addr: SocketAddr,
        message_type: MessageType,
    },

    #[error("session already exists for endpoint {addr} or player {player_id}")]
    DuplicateSession { addr: SocketAddr, player_id: PlayerId },

    #[error("registration failed for name {name:?}")]
    RegistrationFailed { name: String },

    #[error("invalid player name {0:?}")]
    InvalidName(String),

    #[error("failed to send to {addr}: {source}")]
    SendFailure {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("outbound queue is closed")]
    OutboxClosed,

    #[error("player store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
