//! # Realm Relay Server Library
//!
//! This library provides the real-time transport core of a small multiplayer
//! game backend. It accepts UDP datagrams from many clients, routes each
//! decoded message to a handler by type, keeps the live set of connected
//! sessions and periodically pushes every player's position to every peer.
//! Player state is flushed to a durable store once a second.
//!
//! ## Core Responsibilities
//!
//! ### Session Tracking
//! The server binds each client endpoint to the player it controls:
//! - A player is created or loaded by name on `PlayerConnect`
//! - At most one session exists per endpoint and per player
//! - Sessions end when the peer becomes unreachable or goes silent
//!
//! ### Message Routing
//! Every inbound datagram is decoded into an `Envelope`, attributed to a
//! session by the sender id it carries, and handed to the handlers
//! registered for its message type. Unauthenticated endpoints may only
//! send `PlayerConnect`.
//!
//! ### State Broadcasting
//! A fixed-rate tick (32 ms by default) sends each session's position to
//! every session, including itself. The cost is quadratic in the number of
//! connected players, which limits this design to small rooms.
//!
//! ### Persistence
//! A second tick (1 s by default) writes every connected player's name and
//! position to the `PlayerStore`. Handlers only mutate memory, so a crash
//! loses at most one save interval of movement.
//!
//! ## Architecture Design
//!
//! ### Single Writer
//! The ingress loop is the only unit that adds or removes sessions. The
//! tick loops read consistent snapshots of the `SessionRegistry` and never
//! mutate it.
//!
//! ### Outbound Queue
//! Handlers and ticks never touch the socket directly. They push encoded
//! datagrams onto an `Outbox`; a dedicated sender task performs the
//! `send_to` calls and reports unreachable peers back to the ingress loop.
//!
//! ## Module Organization
//!
//! - `config`: runtime settings and their defaults
//! - `dispatcher`: message type to handler table
//! - `error`: the `ServerError` taxonomy
//! - `handlers`: connect, rename, movement and chat handlers
//! - `network`: ingress loop, sender task and the `Server` itself
//! - `outbox`: queue of datagrams awaiting send
//! - `registration`: create-or-load of players by name
//! - `session`: sessions and the concurrent registry
//! - `store`: the `PlayerStore` trait with memory and file backends
//! - `ticks`: broadcast and persistence loops
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use server::store::MemoryPlayerStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default(), Arc::new(MemoryPlayerStore::new())).await?;
//!
//!     // Serves until Ctrl+C, then saves connected players one last time
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod network;
pub mod outbox;
pub mod registration;
pub mod session;
pub mod store;
pub mod ticks;
