use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod codec;
pub mod protocol;

pub use codec::{decode, encode, CodecError};
pub use protocol::{Envelope, Message, MessageType};

pub const DEFAULT_PORT: u16 = 22122;
pub const MAX_DATAGRAM_SIZE: usize = 1024;
pub const MAX_NAME_LEN: usize = 32;

/// Stable identity of a player across sessions
pub type PlayerId = Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub x: f32,
    pub y: f32,
}

impl Player {
    /// Creates a player with a fresh identity at the origin
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    pub fn with_id(id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            x: 0.0,
            y: 0.0,
        }
    }

    pub fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    pub fn set_position(&mut self, x: f32, y: f32) {
        self.x = x;
        self.y = y;
    }
}

/// Returns the trimmed name if it is acceptable as a display name
///
/// A valid name is non-empty after trimming, at most `MAX_NAME_LEN`
/// characters long and contains no control characters.
pub fn normalize_name(name: &str) -> Option<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_NAME_LEN {
        return None;
    }
    if trimmed.chars().any(char::is_control) {
        return None;
    }
    Some(trimmed)
}

/// Parses a wire client id, treating anything but a UUID as anonymous
pub fn parse_player_id(raw: &str) -> Option<PlayerId> {
    if raw.is_empty() {
        return None;
    }
    Uuid::parse_str(raw).ok()
}
