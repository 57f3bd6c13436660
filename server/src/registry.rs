//! Live sessions indexed by game id
//!
//! The registry only guards the map itself; each session sits behind its own
//! `Mutex`, and every read-modify-write of a session happens while holding
//! that lock. Different sessions never contend with one another.

use crate::clock::{Clock, ClockEvent, ClockKind};
use crate::game::Game;
use shared::{ConnectionId, GameId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};

/// A game plus the clock currently driving it
#[derive(Debug)]
pub struct Session {
    pub game: Game,
    clock: Option<Clock>,
    epoch: u64,
    retired: bool,
}

impl Session {
    pub fn new(game: Game) -> Self {
        Self {
            game,
            clock: None,
            epoch: 0,
            retired: false,
        }
    }

    /// Replaces any running clock with a fresh one under a new epoch
    pub fn start_clock(
        &mut self,
        kind: ClockKind,
        duration_ticks: u32,
        period: Duration,
        events: mpsc::UnboundedSender<ClockEvent>,
    ) {
        self.cancel_clock();
        self.clock = Some(Clock::start(
            self.game.id.clone(),
            self.epoch,
            kind,
            duration_ticks,
            period,
            events,
        ));
    }

    /// Stops the running clock, if any. Bumping the epoch invalidates events
    /// the old clock already queued.
    pub fn cancel_clock(&mut self) {
        if let Some(clock) = self.clock.take() {
            clock.cancel();
        }
        self.epoch += 1;
    }

    /// Marks a session that has been dropped from the registry. Handles
    /// obtained before removal see this once they get the lock.
    pub fn retire(&mut self) {
        self.cancel_clock();
        self.retired = true;
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn clock_running(&self) -> bool {
        self.clock.as_ref().map(Clock::is_running).unwrap_or(false)
    }

    /// True if `event` came from the clock currently owned by this session
    pub fn is_current(&self, event: &ClockEvent) -> bool {
        self.clock
            .as_ref()
            .map(|clock| clock.epoch() == event.epoch && clock.kind() == event.kind)
            .unwrap_or(false)
    }
}

pub type SessionHandle = Arc<Mutex<Session>>;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<GameId, SessionHandle>>,
    /// Session each connection currently plays in
    memberships: RwLock<HashMap<ConnectionId, GameId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, game: Game) -> SessionHandle {
        let id = game.id.clone();
        let handle = Arc::new(Mutex::new(Session::new(game)));
        self.sessions.write().await.insert(id, Arc::clone(&handle));
        handle
    }

    pub async fn get(&self, id: &GameId) -> Option<SessionHandle> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &GameId) -> Option<SessionHandle> {
        self.sessions.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn register_member(&self, connection_id: ConnectionId, id: GameId) {
        self.memberships.write().await.insert(connection_id, id);
    }

    /// Drops the membership only if it still points at `id`
    pub async fn unregister_member(&self, connection_id: ConnectionId, id: &GameId) {
        let mut memberships = self.memberships.write().await;
        if memberships.get(&connection_id) == Some(id) {
            memberships.remove(&connection_id);
        }
    }

    pub async fn membership(&self, connection_id: ConnectionId) -> Option<GameId> {
        self.memberships.read().await.get(&connection_id).cloned()
    }

    /// True if any of `connections` is still registered in session `id`
    pub async fn has_members(&self, id: &GameId, connections: &[ConnectionId]) -> bool {
        let memberships = self.memberships.read().await;
        connections
            .iter()
            .any(|conn| memberships.get(conn) == Some(id))
    }
}
