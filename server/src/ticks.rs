//! Periodic position broadcast and persistence
//!
//! Both ticks work from a registry snapshot and never hold the registry
//! lock while encoding, queueing or writing to the store.

use crate::error::ServerError;
use crate::outbox::Outbox;
use crate::session::SessionRegistry;
use crate::store::{PlayerStore, StoreError};
use log::{debug, error, warn};
use shared::{encode, Envelope, Message, Player};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Sends every session's position to every session, itself included
///
/// Each position is encoded once and the buffer is shared by all of its
/// recipients. Returns the number of datagrams queued.
pub fn broadcast_positions(registry: &SessionRegistry, outbox: &Outbox) -> usize {
    let sessions = registry.snapshot();
    let mut queued = 0;

    for subject in &sessions {
        let (x, y) = subject.position();
        let envelope = Envelope::from_player(subject.player_id, Message::UpdatePosition { x, y });
        let datagram: Arc<[u8]> = match encode(&envelope) {
            Ok(bytes) => bytes.into(),
            Err(e) => {
                warn!("Could not encode position of {}: {}", subject.player_id, e);
                continue;
            }
        };

        for recipient in &sessions {
            match outbox.send_datagram(recipient.addr, Arc::clone(&datagram)) {
                Ok(()) => queued += 1,
                Err(e) => {
                    debug!("Broadcast stopped: {}", e);
                    return queued;
                }
            }
        }
    }
    queued
}

/// Current state of every connected player
pub fn collect_players(registry: &SessionRegistry) -> Vec<Player> {
    registry
        .snapshot()
        .iter()
        .map(|session| session.player())
        .collect()
}

/// Writes the state of every connected player through to the store
pub fn persist_players(
    registry: &SessionRegistry,
    store: &dyn PlayerStore,
) -> Result<usize, StoreError> {
    let players = collect_players(registry);
    if players.is_empty() {
        return Ok(0);
    }
    store.upsert_batch(&players)
}

pub async fn run_broadcast_loop(
    registry: Arc<SessionRegistry>,
    outbox: Outbox,
    period: Duration,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        broadcast_positions(&registry, &outbox);
    }
}

/// Saves connected players every `period` until `stop` flips to true
///
/// The stop signal is only observed between ticks, so a batch already handed
/// to the store always completes before this future returns. Callers that
/// flush one last time must await this loop first, or an older batch could
/// land on top of the final one.
pub async fn run_persistence_loop(
    registry: Arc<SessionRegistry>,
    store: Arc<dyn PlayerStore>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // The first tick fires immediately and there is nothing to save yet
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    debug!("Persistence loop stopped");
                    return;
                }
                continue;
            }
        }

        let players = collect_players(&registry);
        if players.is_empty() {
            continue;
        }

        let store = Arc::clone(&store);
        match tokio::task::spawn_blocking(move || store.upsert_batch(&players)).await {
            Ok(Ok(saved)) => debug!("Persisted {} players", saved),
            Ok(Err(e)) => warn!("{}", ServerError::StoreUnavailable(e)),
            Err(e) => error!("Persistence task failed: {}", e),
        }
    }
}
