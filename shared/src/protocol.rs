//! Message envelope exchanged between clients and the server
//!
//! Every datagram carries exactly one `Envelope`. The `client_id` names the
//! sending player (or, for server pushes, the subject player) and is left
//! empty by clients that have not completed the connect handshake yet.

use crate::PlayerId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag identifying the kind of a message, used as the dispatch key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    None,
    PlayerConnect,
    SetName,
    UpdatePosition,
    Chat,
    PlayerId,
    PlayerInit,
    Heartbeat,
}

impl MessageType {
    #[cfg(test)]
    pub(crate) const ALL: [MessageType; 8] = [
        MessageType::None,
        MessageType::PlayerConnect,
        MessageType::SetName,
        MessageType::UpdatePosition,
        MessageType::Chat,
        MessageType::PlayerId,
        MessageType::PlayerInit,
        MessageType::Heartbeat,
    ];
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::None => "None",
            MessageType::PlayerConnect => "PlayerConnect",
            MessageType::SetName => "SetName",
            MessageType::UpdatePosition => "UpdatePosition",
            MessageType::Chat => "Chat",
            MessageType::PlayerId => "PlayerId",
            MessageType::PlayerInit => "PlayerInit",
            MessageType::Heartbeat => "Heartbeat",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Message {
    None,
    /// Client hello carrying the requested display name
    PlayerConnect {
        name: String,
    },
    SetName {
        name: String,
    },
    UpdatePosition {
        x: f32,
        y: f32,
    },
    Chat {
        contents: String,
    },
    /// Server acknowledgement of a successful connect
    PlayerId {
        player_id: PlayerId,
    },
    /// Server push of the full persisted player state
    PlayerInit {
        player_id: PlayerId,
        name: String,
        x: f32,
        y: f32,
    },
    Heartbeat,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::None => MessageType::None,
            Message::PlayerConnect { .. } => MessageType::PlayerConnect,
            Message::SetName { .. } => MessageType::SetName,
            Message::UpdatePosition { .. } => MessageType::UpdatePosition,
            Message::Chat { .. } => MessageType::Chat,
            Message::PlayerId { .. } => MessageType::PlayerId,
            Message::PlayerInit { .. } => MessageType::PlayerInit,
            Message::Heartbeat => MessageType::Heartbeat,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Envelope {
    pub client_id: String,
    pub message: Message,
}

impl Envelope {
    pub fn new(client_id: impl Into<String>, message: Message) -> Self {
        Self {
            client_id: client_id.into(),
            message,
        }
    }

    /// Envelope sent before the sender has been assigned an identity
    pub fn anonymous(message: Message) -> Self {
        Self::new(String::new(), message)
    }

    pub fn from_player(player_id: PlayerId, message: Message) -> Self {
        Self::new(player_id.to_string(), message)
    }

    pub fn message_type(&self) -> MessageType {
        self.message.message_type()
    }

    /// The sender identity, if `client_id` holds a valid one
    pub fn sender_id(&self) -> Option<PlayerId> {
        crate::parse_player_id(&self.client_id)
    }
}
