//! # Typing Race Server Library
//!
//! This library provides the authoritative server for multiplayer typing
//! races. It owns every race session, validates client requests against the
//! session's phase, drives the countdown and race clocks, and broadcasts the
//! resulting session snapshots to the players in each room.
//!
//! ## Core Responsibilities
//!
//! ### Session Lifecycle
//! Sessions move `Lobby -> Countdown -> InProgress -> Over`, and a restart
//! takes them back into the countdown with fresh race text. Up to four
//! players race in a session; the founding player leads it and only the
//! leader may start the countdown.
//!
//! ### Authoritative Scoring
//! Clients report their word progress. The server decides when a player has
//! finished, computes words per minute from its own race clock, and ends the
//! race when everyone finished or the time ran out.
//!
//! ### State Broadcasting
//! Every accepted mutation is persisted and then broadcast as a complete
//! snapshot, so clients never have to merge partial updates.
//!
//! ## Architecture Design
//!
//! ### Per-Session Serialization
//! Each session sits behind its own lock. Client events and clock ticks for
//! one session are applied one after another, while unrelated sessions never
//! wait on each other.
//!
//! ### UDP-Based Communication
//! Clients exchange bincode-encoded `Packet`s with the server over UDP. A
//! connection that goes quiet for too long is treated as having left its
//! session.
//!
//! ## Module Organization
//!
//! - `engine`: the synchronization engine applying client and clock events
//! - `game` and `player`: the session aggregate and its state machine
//! - `clock`: per-session countdown and race tick sources
//! - `registry`: live sessions and connection memberships
//! - `store`: write-through persistence of session snapshots
//! - `words`: race text provider
//! - `broadcast`: outbound delivery capability handed to the engine
//! - `connection_manager` and `network`: the UDP transport
//! - `config`: command line and environment configuration
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::{EngineConfig, ServerConfig};
//! use server::network::Server;
//! use server::store::MemoryStore;
//! use server::words::SentenceBank;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         address: "127.0.0.1:3000".to_string(),
//!         max_clients: 32,
//!         client_timeout: Duration::from_secs(5),
//!     };
//!
//!     let mut server = Server::new(
//!         &config,
//!         EngineConfig::default(),
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(SentenceBank::builtin()),
//!     )
//!     .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod clock;
pub mod config;
pub mod connection_manager;
pub mod engine;
pub mod error;
pub mod game;
pub mod network;
pub mod player;
pub mod registry;
pub mod store;
pub mod utils;
pub mod words;
