//! Connected-player sessions and the registry that tracks them
//!
//! This module handles the server-side bookkeeping of connected clients:
//! - Binding a network endpoint to the in-memory player it controls
//! - Lookup of sessions by endpoint and by player id
//! - Consistent snapshots for the broadcast and persistence ticks
//! - Idle tracking so silent endpoints can be expired
//!
//! The registry keeps both indexes behind a single lock, so every reader
//! and writer observes them in agreement.

use log::info;
use parking_lot::RwLock;
use shared::{Player, PlayerId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type SessionId = u64;

/// In-memory player state shared between a session and the tick loops
pub type SharedPlayer = Arc<RwLock<Player>>;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Binding of a network endpoint to the player it controls
///
/// Cloning a session is cheap and every clone refers to the same
/// in-memory player, so a mutation made through one clone is visible
/// to the snapshot taken by the next tick.
#[derive(Debug, Clone)]
pub struct Session {
    /// Monotonic identifier, also the snapshot ordering key
    pub id: SessionId,
    /// Endpoint that datagrams for this player are sent to
    pub addr: SocketAddr,
    /// Identity of the owned player, fixed for the life of the session
    pub player_id: PlayerId,
    player: SharedPlayer,
}

impl Session {
    pub fn new(addr: SocketAddr, player: Player) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            addr,
            player_id: player.id,
            player: Arc::new(RwLock::new(player)),
        }
    }

    /// Copy of the player's current state
    pub fn player(&self) -> Player {
        self.player.read().clone()
    }

    pub fn position(&self) -> (f32, f32) {
        self.player.read().position()
    }

    pub fn set_position(&self, x: f32, y: f32) {
        self.player.write().set_position(x, y);
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.player.write().name = name.into();
    }

    /// True when both sessions drive the same in-memory player
    #[cfg(test)]
    pub(crate) fn shares_player_with(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.player, &other.player)
    }
}

#[derive(Debug)]
struct Entry {
    session: Session,
    last_seen: Instant,
}

#[derive(Debug, Default)]
struct Indexes {
    by_endpoint: HashMap<SocketAddr, Entry>,
    by_player: HashMap<PlayerId, SocketAddr>,
}

/// Returned by `SessionRegistry::add` when the endpoint or player is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateSession {
    pub addr: SocketAddr,
    pub player_id: PlayerId,
}

/// Authoritative set of connected sessions
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<Indexes>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session bound to `addr`, if any
    ///
    /// This is the only way an inbound datagram is attributed to a player;
    /// the sender id inside the envelope is never trusted on its own.
    pub fn find_by_endpoint(&self, addr: SocketAddr) -> Option<Session> {
        self.inner
            .read()
            .by_endpoint
            .get(&addr)
            .map(|entry| entry.session.clone())
    }

    /// Session currently driving `player_id`
    ///
    /// A player is bound to at most one endpoint at a time, so there is never
    /// more than one candidate.
    pub fn find_by_player_id(&self, player_id: PlayerId) -> Option<Session> {
        let inner = self.inner.read();
        inner
            .by_player
            .get(&player_id)
            .and_then(|addr| inner.by_endpoint.get(addr))
            .map(|entry| entry.session.clone())
    }

    /// Registers a session
    ///
    /// Fails without modifying the registry if the endpoint or the player
    /// already has a session.
    pub fn add(&self, session: Session) -> Result<(), DuplicateSession> {
        let mut inner = self.inner.write();

        if inner.by_endpoint.contains_key(&session.addr)
            || inner.by_player.contains_key(&session.player_id)
        {
            return Err(DuplicateSession {
                addr: session.addr,
                player_id: session.player_id,
            });
        }

        info!(
            "Session {} opened for player {} at {}",
            session.id, session.player_id, session.addr
        );
        inner.by_player.insert(session.player_id, session.addr);
        inner.by_endpoint.insert(
            session.addr,
            Entry {
                session,
                last_seen: Instant::now(),
            },
        );
        Ok(())
    }

    /// Removes the session bound to `addr`, if any
    pub fn remove(&self, addr: SocketAddr) -> Option<Session> {
        let mut inner = self.inner.write();
        let entry = inner.by_endpoint.remove(&addr)?;
        inner.by_player.remove(&entry.session.player_id);
        info!(
            "Session {} closed for player {} at {}",
            entry.session.id, entry.session.player_id, addr
        );
        Some(entry.session)
    }

    /// Point-in-time copy of all sessions, oldest first
    pub fn snapshot(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .inner
            .read()
            .by_endpoint
            .values()
            .map(|entry| entry.session.clone())
            .collect();
        sessions.sort_by_key(|session| session.id);
        sessions
    }

    /// Records activity from `addr`; returns false if it has no session
    pub fn touch(&self, addr: SocketAddr) -> bool {
        match self.inner.write().by_endpoint.get_mut(&addr) {
            Some(entry) => {
                entry.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Removes and returns every session silent for longer than `timeout`
    pub fn expire_idle(&self, timeout: Duration) -> Vec<Session> {
        let mut inner = self.inner.write();
        let expired: Vec<SocketAddr> = inner
            .by_endpoint
            .iter()
            .filter(|(_, entry)| entry.last_seen.elapsed() > timeout)
            .map(|(addr, _)| *addr)
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for addr in expired {
            if let Some(entry) = inner.by_endpoint.remove(&addr) {
                inner.by_player.remove(&entry.session.player_id);
                info!(
                    "Session {} for player {} at {} timed out",
                    entry.session.id, entry.session.player_id, addr
                );
                removed.push(entry.session);
            }
        }
        removed.sort_by_key(|session| session.id);
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_endpoint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_endpoint.is_empty()
    }

    #[cfg(test)]
    fn backdate(&self, addr: SocketAddr, by: Duration) {
        if let Some(entry) = self.inner.write().by_endpoint.get_mut(&addr) {
            entry.last_seen = Instant::now() - by;
        }
    }
}
