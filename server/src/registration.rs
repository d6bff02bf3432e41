//! Name-based player registration
//!
//! A connect request carries only a display name. The first connect under a
//! name creates a durable player; later ones load it back.

use crate::store::PlayerStore;
use log::{info, warn};
use shared::{normalize_name, Player};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    Created,
    Loaded,
    Failed,
}

/// Outcome of a connect request; `player` is absent exactly when it failed
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub player: Option<Player>,
    pub status: RegistrationStatus,
}

impl Registration {
    fn created(player: Player) -> Self {
        Self {
            player: Some(player),
            status: RegistrationStatus::Created,
        }
    }

    fn loaded(player: Player) -> Self {
        Self {
            player: Some(player),
            status: RegistrationStatus::Loaded,
        }
    }

    fn failed() -> Self {
        Self {
            player: None,
            status: RegistrationStatus::Failed,
        }
    }

    #[cfg(test)]
    fn is_success(&self) -> bool {
        self.status != RegistrationStatus::Failed
    }
}

/// Turns a requested display name into a durable player
pub struct RegistrationService {
    store: Arc<dyn PlayerStore>,
}

impl RegistrationService {
    pub fn new(store: Arc<dyn PlayerStore>) -> Self {
        Self { store }
    }

    /// Loads the player registered under `name`, creating it if needed
    ///
    /// Creation relies on the store rejecting a second insert under the same
    /// name, so of two racing creates at most one succeeds and the other
    /// reports `Failed`.
    pub fn register(&self, name: &str) -> Registration {
        let Some(name) = normalize_name(name) else {
            warn!("Rejected registration with invalid name {:?}", name);
            return Registration::failed();
        };

        match self.store.get_by_name(name) {
            Ok(Some(player)) => {
                info!("Loaded player {} ({})", player.name, player.id);
                return Registration::loaded(player);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Lookup of {:?} failed: {}", name, e);
                return Registration::failed();
            }
        }

        let player = Player::new(name);
        match self.store.insert(&player) {
            Ok(()) => {
                info!("Created player {} ({})", player.name, player.id);
                Registration::created(player)
            }
            Err(e) => {
                warn!("Could not create player {:?}: {}", name, e);
                Registration::failed()
            }
        }
    }
}
