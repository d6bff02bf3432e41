//! Durable player storage
//!
//! The server only depends on the `PlayerStore` trait. Two backends are
//! provided: `MemoryPlayerStore` for tests and throwaway servers, and
//! `FilePlayerStore`, which keeps the same table in memory and rewrites a
//! bincode snapshot file after every successful mutation.

use log::{debug, info};
use parking_lot::Mutex;
use shared::{Player, PlayerId};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("name {0:?} is already taken")]
    NameTaken(String),
    #[error("player {0} already exists")]
    IdTaken(PlayerId),
    #[error("store i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("store file is corrupt: {0}")]
    Corrupt(#[from] bincode::Error),
}

/// Lookup and persistence of player records
pub trait PlayerStore: Send + Sync {
    fn get_by_id(&self, id: PlayerId) -> Result<Option<Player>, StoreError>;

    fn get_by_name(&self, name: &str) -> Result<Option<Player>, StoreError>;

    /// Inserts a new player, failing on an id or name conflict
    fn insert(&self, player: &Player) -> Result<(), StoreError>;

    /// Writes the given players over their stored records
    ///
    /// Players with no stored record are skipped. Returns how many records
    /// were written.
    fn upsert_batch(&self, players: &[Player]) -> Result<usize, StoreError>;
}

/// Player records indexed by id and by name
#[derive(Debug, Default)]
struct PlayerTable {
    players: HashMap<PlayerId, Player>,
    names: HashMap<String, PlayerId>,
}

impl PlayerTable {
    fn from_players(players: Vec<Player>) -> Self {
        let mut table = Self::default();
        for player in players {
            table.names.insert(player.name.clone(), player.id);
            table.players.insert(player.id, player);
        }
        table
    }

    fn get_by_id(&self, id: PlayerId) -> Option<Player> {
        self.players.get(&id).cloned()
    }

    fn get_by_name(&self, name: &str) -> Option<Player> {
        self.names
            .get(name)
            .and_then(|id| self.players.get(id))
            .cloned()
    }

    fn insert(&mut self, player: &Player) -> Result<(), StoreError> {
        if self.players.contains_key(&player.id) {
            return Err(StoreError::IdTaken(player.id));
        }
        if self.names.contains_key(&player.name) {
            return Err(StoreError::NameTaken(player.name.clone()));
        }
        self.names.insert(player.name.clone(), player.id);
        self.players.insert(player.id, player.clone());
        Ok(())
    }

    fn upsert_batch(&mut self, players: &[Player]) -> usize {
        let mut written = 0;
        for player in players {
            let Some(stored) = self.players.get_mut(&player.id) else {
                continue;
            };

            stored.x = player.x;
            stored.y = player.y;

            // A rename onto a name held by another player keeps the stored name
            if stored.name != player.name {
                match self.names.get(&player.name) {
                    Some(owner) if *owner != player.id => {
                        debug!(
                            "Keeping stored name for {}: {:?} belongs to {}",
                            player.id, player.name, owner
                        );
                    }
                    _ => {
                        self.names.remove(&stored.name);
                        self.names.insert(player.name.clone(), player.id);
                        stored.name = player.name.clone();
                    }
                }
            }
            written += 1;
        }
        written
    }

    fn to_records(&self) -> Vec<Player> {
        let mut records: Vec<Player> = self.players.values().cloned().collect();
        records.sort_by_key(|player| player.id);
        records
    }
}

/// Volatile store backed by a locked in-memory table
#[derive(Debug, Default)]
pub struct MemoryPlayerStore {
    table: Mutex<PlayerTable>,
}

impl MemoryPlayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.lock().players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().players.is_empty()
    }
}

impl PlayerStore for MemoryPlayerStore {
    fn get_by_id(&self, id: PlayerId) -> Result<Option<Player>, StoreError> {
        Ok(self.table.lock().get_by_id(id))
    }

    fn get_by_name(&self, name: &str) -> Result<Option<Player>, StoreError> {
        Ok(self.table.lock().get_by_name(name))
    }

    fn insert(&self, player: &Player) -> Result<(), StoreError> {
        self.table.lock().insert(player)
    }

    fn upsert_batch(&self, players: &[Player]) -> Result<usize, StoreError> {
        Ok(self.table.lock().upsert_batch(players))
    }
}

/// Store that survives restarts by snapshotting to a file
///
/// Every successful insert or upsert rewrites the whole file through a
/// temporary sibling and a rename, so a crash leaves either the old or the
/// new snapshot on disk. If the write fails the in-memory change is rolled
/// back and the error is returned.
#[derive(Debug)]
pub struct FilePlayerStore {
    path: PathBuf,
    table: Mutex<PlayerTable>,
}

impl FilePlayerStore {
    /// Opens the store at `path`, creating an empty one if it does not exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let table = match fs::read(&path) {
            Ok(bytes) => {
                let players: Vec<Player> = bincode::deserialize(&bytes)?;
                info!("Loaded {} players from {}", players.len(), path.display());
                PlayerTable::from_players(players)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("Creating new player store at {}", path.display());
                PlayerTable::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_snapshot(&self, table: &PlayerTable) -> Result<(), StoreError> {
        let bytes = bincode::serialize(&table.to_records())?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PlayerStore for FilePlayerStore {
    fn get_by_id(&self, id: PlayerId) -> Result<Option<Player>, StoreError> {
        Ok(self.table.lock().get_by_id(id))
    }

    fn get_by_name(&self, name: &str) -> Result<Option<Player>, StoreError> {
        Ok(self.table.lock().get_by_name(name))
    }

    fn insert(&self, player: &Player) -> Result<(), StoreError> {
        let mut table = self.table.lock();
        table.insert(player)?;
        if let Err(e) = self.write_snapshot(&table) {
            table.names.remove(&player.name);
            table.players.remove(&player.id);
            return Err(e);
        }
        Ok(())
    }

    fn upsert_batch(&self, players: &[Player]) -> Result<usize, StoreError> {
        let mut table = self.table.lock();
        let previous = PlayerTable::from_players(table.to_records());
        let written = table.upsert_batch(players);
        if written > 0 {
            if let Err(e) = self.write_snapshot(&table) {
                *table = previous;
                return Err(e);
            }
        }
        Ok(written)
    }
}
