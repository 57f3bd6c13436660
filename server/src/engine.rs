//! Session synchronization engine
//!
//! Receives client events and clock events, validates them against the
//! session's phase, applies the transition and broadcasts the resulting
//! snapshot to the room.
//!
//! ## Serialization
//! Every handler takes the session's lock before reading its state and keeps
//! it until the new state is committed and the deliveries are queued. Client
//! events and clock ticks for one session are therefore linearized, while
//! different sessions proceed independently.
//!
//! ## Commit protocol
//! Transitions are applied to a copy of the game, the copy is saved to the
//! store, and only then does it replace the live state. A failed save leaves
//! the session untouched and nothing is broadcast.
//!
//! ## Clocks
//! Clock tasks push `ClockEvent`s onto a channel drained by a pump task
//! spawned in `SyncEngine::new`. The pump holds only a weak reference, so
//! dropping the last engine handle shuts everything down.

use crate::broadcast::Broadcaster;
use crate::clock::{ClockEvent, ClockKind, ClockSignal};
use crate::config::{EngineConfig, RestartMode};
use crate::error::EngineError;
use crate::game::{Game, InputOutcome, LeaveOutcome};
use crate::registry::{Session, SessionHandle, SessionRegistry};
use crate::store::GameStore;
use crate::utils::{clean_nickname, get_timestamp};
use crate::words::WordSource;
use log::{debug, error, info, warn};
use shared::{
    ClientEvent, ConnectionId, GameId, GameSnapshot, Phase, PlayerId, ServerEvent, TimerUpdate,
};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, MutexGuard};
use tokio::time::Instant;

struct EngineInner {
    config: EngineConfig,
    registry: SessionRegistry,
    store: Arc<dyn GameStore>,
    words: Arc<dyn WordSource>,
    broadcaster: Arc<dyn Broadcaster>,
    clock_tx: mpsc::UnboundedSender<ClockEvent>,
}

/// Cheaply cloneable handle to the engine
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Creates the engine and spawns its clock pump. Must be called from
    /// within a tokio runtime.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn GameStore>,
        words: Arc<dyn WordSource>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        let (clock_tx, clock_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(EngineInner {
            config,
            registry: SessionRegistry::new(),
            store,
            words,
            broadcaster,
            clock_tx,
        });

        tokio::spawn(Self::pump_clock_events(Arc::downgrade(&inner), clock_rx));

        Self { inner }
    }

    async fn pump_clock_events(
        inner: Weak<EngineInner>,
        mut clock_rx: mpsc::UnboundedReceiver<ClockEvent>,
    ) {
        while let Some(event) = clock_rx.recv().await {
            let Some(engine) = inner.upgrade().map(|inner| SyncEngine { inner }) else {
                break;
            };
            engine.on_clock(event).await;
        }
        debug!("Clock pump stopped");
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Current snapshot of a live session
    pub async fn snapshot(&self, id: &GameId) -> Option<GameSnapshot> {
        let handle = self.inner.registry.get(id).await?;
        let session = handle.lock().await;
        Some(session.game.snapshot())
    }

    /// Entry point for every client event. Errors are reported back to the
    /// requesting connection only.
    pub async fn handle(&self, connection_id: ConnectionId, event: ClientEvent) {
        let result = match event {
            ClientEvent::CreateGame { nickname } => self.create_game(connection_id, nickname).await,
            ClientEvent::JoinGame { nickname, game_id } => {
                self.join_game(connection_id, nickname, &game_id).await
            }
            ClientEvent::LeaveGame { game_id } => self.leave_game(connection_id, &game_id).await,
            ClientEvent::StartTimer { player_id, game_id } => {
                self.start_timer(connection_id, player_id, &game_id).await
            }
            ClientEvent::RestartTimer { game_id } => self.restart(connection_id, &game_id).await,
            ClientEvent::UserInput {
                current_word_index,
                typed_word_count,
                game_id,
            } => {
                self.user_input(connection_id, current_word_index, typed_word_count, &game_id)
                    .await
            }
        };

        if let Err(e) = result {
            self.report(connection_id, e);
        }
    }

    fn report(&self, connection_id: ConnectionId, err: EngineError) {
        match &err {
            EngineError::Permission(reason) => {
                debug!("Ignoring request from connection {}: {}", connection_id, reason);
            }
            EngineError::Persistence(_) | EngineError::Words(_) => {
                error!("Request from connection {} failed: {}", connection_id, err);
            }
            EngineError::Validation(_) | EngineError::NotFound(_) => {
                debug!("Rejected request from connection {}: {}", connection_id, err);
            }
        }

        if let Some(message) = err.client_message() {
            self.inner
                .broadcaster
                .send(connection_id, ServerEvent::Error(message));
        }
    }

    /// Handles a connection that went away without leaving
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let Some(id) = self.inner.registry.membership(connection_id).await else {
            return;
        };

        match self.inner.registry.get(&id).await {
            Some(handle) => {
                if let Err(e) = self.depart(connection_id, &id, &handle).await {
                    warn!(
                        "Failed to remove connection {} from game {}: {}",
                        connection_id, id, e
                    );
                }
            }
            None => self.inner.registry.unregister_member(connection_id, &id).await,
        }
    }

    async fn create_game(
        &self,
        connection_id: ConnectionId,
        nickname: String,
    ) -> Result<(), EngineError> {
        let nickname = self.nickname(&nickname)?;
        let words = self.inner.words.fetch().await?;
        let game = Game::new(GameId::generate(), words, connection_id, nickname)?;
        self.inner.store.save(&game.snapshot()).await?;

        let id = game.id.clone();
        self.leave_previous(connection_id, &id).await;

        let handle = self.inner.registry.insert(game).await;
        let session = handle.lock().await;
        info!(
            "Game {} created by connection {} ({})",
            id, connection_id, session.game.players[0].nickname
        );

        self.enter_room(connection_id, &id).await;
        self.inner
            .broadcaster
            .broadcast(&id, ServerEvent::UpdateGame(session.game.snapshot()));
        Ok(())
    }

    async fn join_game(
        &self,
        connection_id: ConnectionId,
        nickname: String,
        raw_id: &str,
    ) -> Result<(), EngineError> {
        let nickname = self.nickname(&nickname)?;
        let (id, handle) = self.lookup(raw_id).await?;

        // the previous session is only left once a seat looks available
        self.lock_live(&handle)
            .await?
            .game
            .check_joinable(connection_id)?;
        self.leave_previous(connection_id, &id).await;

        let mut session = self.lock_live(&handle).await?;
        let mut next = session.game.clone();
        let player_id = next.add_player(connection_id, nickname)?;
        self.commit(&mut session, next).await?;
        info!(
            "Connection {} joined game {} as player {} ({}/{})",
            connection_id,
            id,
            player_id,
            session.game.players.len(),
            shared::MAX_PLAYERS
        );

        self.enter_room(connection_id, &id).await;
        self.inner
            .broadcaster
            .broadcast(&id, ServerEvent::UpdateGame(session.game.snapshot()));
        Ok(())
    }

    async fn leave_game(&self, connection_id: ConnectionId, raw_id: &str) -> Result<(), EngineError> {
        let (id, handle) = self.lookup(raw_id).await?;
        self.depart(connection_id, &id, &handle).await
    }

    async fn start_timer(
        &self,
        connection_id: ConnectionId,
        player_id: PlayerId,
        raw_id: &str,
    ) -> Result<(), EngineError> {
        let (id, handle) = self.lookup(raw_id).await?;
        let mut session = self.lock_live(&handle).await?;

        let mut next = session.game.clone();
        next.begin_countdown(connection_id, player_id)?;
        self.commit(&mut session, next).await?;

        let config = &self.inner.config;
        session.start_clock(
            ClockKind::Countdown,
            config.countdown_ticks,
            config.tick_interval,
            self.inner.clock_tx.clone(),
        );
        info!("Game {}: countdown started", id);

        self.broadcast_state(&session);
        Ok(())
    }

    async fn restart(&self, connection_id: ConnectionId, raw_id: &str) -> Result<(), EngineError> {
        let (id, handle) = self.lookup(raw_id).await?;

        // checked once before fetching text and again once it is in hand
        {
            let session = self.lock_live(&handle).await?;
            Self::check_restart(&session, connection_id)?;
        }
        let words = self.inner.words.fetch().await?;

        let mut session = self.lock_live(&handle).await?;
        Self::check_restart(&session, connection_id)?;

        let mut next = session.game.clone();
        next.restart(words)?;
        if self.inner.config.restart_mode == RestartMode::Immediate {
            next.start_race(Instant::now(), get_timestamp());
        }
        self.commit(&mut session, next).await?;

        let config = &self.inner.config;
        let (kind, ticks) = match config.restart_mode {
            RestartMode::Countdown => (ClockKind::Countdown, config.countdown_ticks),
            RestartMode::Immediate => (ClockKind::Race, config.race_ticks),
        };
        session.start_clock(kind, ticks, config.tick_interval, self.inner.clock_tx.clone());
        info!("Game {} restarted by connection {}", id, connection_id);

        self.broadcast_state(&session);
        Ok(())
    }

    fn check_restart(session: &Session, connection_id: ConnectionId) -> Result<(), EngineError> {
        Ok(session
            .game
            .authorize_restart(connection_id, session.clock_running())?)
    }

    async fn user_input(
        &self,
        connection_id: ConnectionId,
        current_word_index: u32,
        typed_word_count: u32,
        raw_id: &str,
    ) -> Result<(), EngineError> {
        let (id, handle) = self.lookup(raw_id).await?;
        let mut session = self.lock_live(&handle).await?;

        let mut next = session.game.clone();
        let outcome = next.record_input(
            connection_id,
            current_word_index,
            typed_word_count,
            Instant::now(),
        )?;
        if outcome == InputOutcome::Ignored {
            debug!(
                "Game {}: ignoring input from finished connection {}",
                id, connection_id
            );
            return Ok(());
        }
        self.commit(&mut session, next).await?;

        match outcome {
            InputOutcome::Typing | InputOutcome::Ignored => {}
            InputOutcome::Finished => {
                if let Some(player) = session.game.player_by_connection(connection_id) {
                    info!(
                        "Game {}: {} finished with {} wpm",
                        id,
                        player.nickname,
                        player.wpm.unwrap_or_default()
                    );
                }
                self.inner.broadcaster.send(connection_id, ServerEvent::Done);
            }
            InputOutcome::RaceOver => {
                session.cancel_clock();
                info!("Game {}: every player finished, race over", id);
                self.inner.broadcaster.broadcast(&id, ServerEvent::Done);
            }
        }

        self.broadcast_state(&session);
        Ok(())
    }

    /// Removes `connection_id` from a session. Once a race is over the
    /// results stay put and only the connection's membership goes.
    async fn depart(
        &self,
        connection_id: ConnectionId,
        id: &GameId,
        handle: &SessionHandle,
    ) -> Result<(), EngineError> {
        let mut session = handle.lock().await;
        if session.is_retired() {
            self.inner.registry.unregister_member(connection_id, id).await;
            return Ok(());
        }

        if session.game.phase == Phase::Over {
            self.drop_membership(connection_id, id).await;
            let connections: Vec<ConnectionId> = session
                .game
                .players
                .iter()
                .map(|p| p.connection_id)
                .collect();
            if !self.inner.registry.has_members(id, &connections).await {
                self.dispose(&mut session).await;
            }
            return Ok(());
        }

        let mut next = session.game.clone();
        let outcome = next.remove_player(connection_id, Instant::now())?;

        if outcome == LeaveOutcome::Empty {
            session.game = next;
            self.drop_membership(connection_id, id).await;
            self.dispose(&mut session).await;
            return Ok(());
        }

        self.commit(&mut session, next).await?;
        self.drop_membership(connection_id, id).await;
        info!("Connection {} left game {}", connection_id, id);

        if outcome == LeaveOutcome::RaceOver {
            session.cancel_clock();
            info!("Game {}: remaining players all finished, race over", id);
            self.inner.broadcaster.broadcast(id, ServerEvent::Done);
        }

        self.broadcast_state(&session);
        Ok(())
    }

    /// Drops an abandoned session from the registry and the store
    async fn dispose(&self, session: &mut MutexGuard<'_, Session>) {
        let id = session.game.id.clone();
        session.retire();
        self.inner.registry.remove(&id).await;
        if let Err(e) = self.inner.store.delete(&id).await {
            error!("Failed to delete stored game {}: {}", id, e);
        }
        info!("Game {} disposed, no players left", id);
    }

    async fn on_clock(&self, event: ClockEvent) {
        let Some(handle) = self.inner.registry.get(&event.game_id).await else {
            debug!("Clock event for unknown game {}", event.game_id);
            return;
        };
        let mut session = handle.lock().await;
        if session.is_retired() || !session.is_current(&event) {
            debug!("Dropping stale clock event for game {}", event.game_id);
            return;
        }

        let id = &event.game_id;
        match (event.kind, event.signal) {
            (ClockKind::Countdown, ClockSignal::Tick { remaining }) => {
                debug!("Game {}: countdown {}", id, remaining);
                self.inner
                    .broadcaster
                    .broadcast(id, ServerEvent::Timer(TimerUpdate::countdown(remaining)));
            }
            (ClockKind::Race, ClockSignal::Tick { remaining }) => {
                debug!("Game {}: {}s remaining", id, remaining);
                self.inner
                    .broadcaster
                    .broadcast(id, ServerEvent::Timer(TimerUpdate::remaining(remaining)));
            }
            (ClockKind::Countdown, ClockSignal::Expired) => self.begin_race(&mut session).await,
            (ClockKind::Race, ClockSignal::Expired) => self.end_race(&mut session).await,
        }
    }

    async fn begin_race(&self, session: &mut MutexGuard<'_, Session>) {
        let id = session.game.id.clone();
        if session.game.phase != Phase::Countdown {
            warn!("Game {}: countdown expired in phase {:?}", id, session.game.phase);
            session.cancel_clock();
            return;
        }

        let mut next = session.game.clone();
        next.start_race(Instant::now(), get_timestamp());
        if let Err(e) = self.commit(session, next).await {
            error!("Game {}: failed to start race: {}", id, e);
            session.cancel_clock();
            return;
        }

        let config = &self.inner.config;
        session.start_clock(
            ClockKind::Race,
            config.race_ticks,
            config.tick_interval,
            self.inner.clock_tx.clone(),
        );
        info!("Game {}: race started", id);

        self.broadcast_state(session);
    }

    async fn end_race(&self, session: &mut MutexGuard<'_, Session>) {
        let id = session.game.id.clone();
        let mut next = session.game.clone();
        next.finish_race(Instant::now());

        let committed = self.commit(session, next).await;
        session.cancel_clock();
        if let Err(e) = committed {
            error!("Game {}: failed to end race: {}", id, e);
            return;
        }

        info!("Game {}: time is up, race over", id);
        self.inner.broadcaster.broadcast(&id, ServerEvent::Done);
        self.broadcast_state(session);
    }

    async fn lookup(&self, raw_id: &str) -> Result<(GameId, SessionHandle), EngineError> {
        let id = GameId::parse(raw_id)?;
        let handle = self
            .inner
            .registry
            .get(&id)
            .await
            .ok_or_else(EngineError::game_not_found)?;
        Ok((id, handle))
    }

    async fn lock_live<'a>(
        &self,
        handle: &'a SessionHandle,
    ) -> Result<MutexGuard<'a, Session>, EngineError> {
        let session = handle.lock().await;
        if session.is_retired() {
            return Err(EngineError::game_not_found());
        }
        Ok(session)
    }

    /// Persists `next` and makes it the live state
    async fn commit(&self, session: &mut Session, next: Game) -> Result<(), EngineError> {
        self.inner.store.save(&next.snapshot()).await?;
        session.game = next;
        Ok(())
    }

    /// Leaves the session the connection currently plays in, if it is not `id`
    async fn leave_previous(&self, connection_id: ConnectionId, id: &GameId) {
        let Some(previous) = self.inner.registry.membership(connection_id).await else {
            return;
        };
        if &previous == id {
            return;
        }
        if let Some(handle) = self.inner.registry.get(&previous).await {
            if let Err(e) = self.depart(connection_id, &previous, &handle).await {
                warn!(
                    "Failed to leave game {} for connection {}: {}",
                    previous, connection_id, e
                );
            }
        }
    }

    /// Registers the connection in session `id` and its room. Callers hold
    /// the session lock so the join is ordered with the session's broadcasts.
    async fn enter_room(&self, connection_id: ConnectionId, id: &GameId) {
        self.inner
            .registry
            .register_member(connection_id, id.clone())
            .await;
        self.inner.broadcaster.join(id, connection_id);
    }

    async fn drop_membership(&self, connection_id: ConnectionId, id: &GameId) {
        self.inner.registry.unregister_member(connection_id, id).await;
        self.inner.broadcaster.leave(id, connection_id);
    }

    fn broadcast_state(&self, session: &Session) {
        self.inner.broadcaster.broadcast(
            &session.game.id,
            ServerEvent::UpdateGameState(session.game.snapshot()),
        );
    }

    fn nickname(&self, raw: &str) -> Result<String, EngineError> {
        clean_nickname(raw, self.inner.config.max_nickname_len)
            .ok_or_else(|| EngineError::Validation("Please enter a nickname".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{ChannelBroadcaster, Outbound};
    use crate::store::{MemoryStore, StoreError};
    use crate::words::WordsError;
    use async_trait::async_trait;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct FixedWords(Vec<String>);

    #[async_trait]
    impl WordSource for FixedWords {
        async fn fetch(&self) -> Result<Vec<String>, WordsError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct FlakyStore {
        games: MemoryStore,
        failing: AtomicBool,
    }

    #[async_trait]
    impl GameStore for FlakyStore {
        async fn find_by_id(&self, id: &GameId) -> Result<Option<GameSnapshot>, StoreError> {
            self.games.find_by_id(id).await
        }

        async fn save(&self, game: &GameSnapshot) -> Result<(), StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Io(io::Error::new(io::ErrorKind::Other, "disk full")));
            }
            self.games.save(game).await
        }

        async fn delete(&self, id: &GameId) -> Result<(), StoreError> {
            self.games.delete(id).await
        }
    }

    struct Harness {
        engine: SyncEngine,
        outbound: mpsc::UnboundedReceiver<Outbound>,
        store: Arc<FlakyStore>,
    }

    fn ten_words() -> Vec<String> {
        (0..10).map(|i| format!("word{}", i)).collect()
    }

    fn harness(config: EngineConfig) -> Harness {
        let store = Arc::new(FlakyStore::default());
        let (broadcaster, outbound) = ChannelBroadcaster::channel();
        let engine = SyncEngine::new(
            config,
            store.clone(),
            Arc::new(FixedWords(ten_words())),
            Arc::new(broadcaster),
        );
        Harness {
            engine,
            outbound,
            store,
        }
    }

    impl Harness {
        fn drain(&mut self) -> Vec<Outbound> {
            let mut messages = Vec::new();
            while let Ok(message) = self.outbound.try_recv() {
                messages.push(message);
            }
            messages
        }

        async fn create(&mut self, connection_id: ConnectionId, nickname: &str) -> GameId {
            self.engine
                .handle(
                    connection_id,
                    ClientEvent::CreateGame {
                        nickname: nickname.into(),
                    },
                )
                .await;
            let messages = self.drain();
            messages
                .iter()
                .find_map(|m| match m {
                    Outbound::Broadcast {
                        event: ServerEvent::UpdateGame(snapshot),
                        ..
                    } => Some(snapshot.id.clone()),
                    _ => None,
                })
                .unwrap()
        }

        async fn join(&mut self, connection_id: ConnectionId, nickname: &str, id: &GameId) {
            self.engine
                .handle(
                    connection_id,
                    ClientEvent::JoinGame {
                        nickname: nickname.into(),
                        game_id: id.to_string(),
                    },
                )
                .await;
        }

        async fn input(&mut self, connection_id: ConnectionId, index: u32, typed: u32, id: &GameId) {
            self.engine
                .handle(
                    connection_id,
                    ClientEvent::UserInput {
                        current_word_index: index,
                        typed_word_count: typed,
                        game_id: id.to_string(),
                    },
                )
                .await;
        }

        async fn start(&mut self, connection_id: ConnectionId, player_id: PlayerId, id: &GameId) {
            self.engine
                .handle(
                    connection_id,
                    ClientEvent::StartTimer {
                        player_id,
                        game_id: id.to_string(),
                    },
                )
                .await;
        }

        async fn phase(&self, id: &GameId) -> Phase {
            self.engine.snapshot(id).await.unwrap().phase
        }
    }

    fn errors_for(messages: &[Outbound], conn: ConnectionId) -> Vec<String> {
        messages
            .iter()
            .filter_map(|m| match m {
                Outbound::Send {
                    connection_id,
                    event: ServerEvent::Error(message),
                } if *connection_id == conn => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    fn countdowns(messages: &[Outbound]) -> Vec<u32> {
        messages
            .iter()
            .filter_map(|m| match m {
                Outbound::Broadcast {
                    event: ServerEvent::Timer(TimerUpdate::Countdown { countdown, .. }),
                    ..
                } => Some(*countdown),
                _ => None,
            })
            .collect()
    }

    fn room_done(messages: &[Outbound]) -> bool {
        messages.iter().any(|m| {
            matches!(
                m,
                Outbound::Broadcast {
                    event: ServerEvent::Done,
                    ..
                }
            )
        })
    }

    fn last_state(messages: &[Outbound]) -> Option<GameSnapshot> {
        messages.iter().rev().find_map(|m| match m {
            Outbound::Broadcast {
                event: ServerEvent::UpdateGameState(snapshot),
                ..
            } => Some(snapshot.clone()),
            _ => None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_race() {
        let mut h = harness(EngineConfig {
            race_ticks: 90,
            ..EngineConfig::default()
        });

        let id = h.create(1, "Ann").await;
        let snapshot = h.engine.snapshot(&id).await.unwrap();
        assert_eq!(snapshot.players.len(), 1);
        assert!(snapshot.players[0].is_party_leader);
        assert_eq!(snapshot.phase, Phase::Lobby);

        h.join(2, "Bob", &id).await;
        let joined = h.drain();
        assert!(joined.contains(&Outbound::Join {
            room: id.clone(),
            connection_id: 2
        }));
        let snapshot = h.engine.snapshot(&id).await.unwrap();
        assert_eq!(snapshot.players.len(), 2);
        assert_eq!(snapshot.phase, Phase::Lobby);

        h.start(1, 1, &id).await;
        assert_eq!(h.phase(&id).await, Phase::Countdown);

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        let countdown = h.drain();
        assert_eq!(countdowns(&countdown), vec![4, 3, 2, 1, 0]);
        let racing = last_state(&countdown).unwrap();
        assert_eq!(racing.phase, Phase::InProgress);
        assert!(racing.start_time.is_some());

        tokio::time::sleep(Duration::from_millis(29_500)).await;
        h.drain();
        h.input(1, 9, 10, &id).await;
        let ann_done = h.drain();
        assert!(ann_done.contains(&Outbound::Send {
            connection_id: 1,
            event: ServerEvent::Done
        }));
        assert!(!room_done(&ann_done));
        let state = last_state(&ann_done).unwrap();
        assert_eq!(state.players[0].wpm, Some(20));
        assert_eq!(state.phase, Phase::InProgress);

        tokio::time::sleep(Duration::from_secs(30)).await;
        h.drain();
        h.input(2, 9, 10, &id).await;
        let bob_done = h.drain();
        assert!(room_done(&bob_done));
        let state = last_state(&bob_done).unwrap();
        assert_eq!(state.players[1].wpm, Some(10));
        assert_eq!(state.phase, Phase::Over);

        // race clock was stopped early
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(h.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_clock_expiry_scores_everyone() {
        let mut h = harness(EngineConfig {
            race_ticks: 30,
            ..EngineConfig::default()
        });
        let id = h.create(1, "Ann").await;
        h.join(2, "Bob", &id).await;
        h.start(1, 1, &id).await;

        tokio::time::sleep(Duration::from_millis(6_500)).await;
        h.input(2, 2, 2, &id).await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        let messages = h.drain();
        assert!(room_done(&messages));
        let state = last_state(&messages).unwrap();
        assert_eq!(state.phase, Phase::Over);
        assert_eq!(state.players[0].wpm, Some(0));
        assert_eq!(state.players[1].wpm, Some(4));
    }

    #[tokio::test]
    async fn test_join_errors_reach_only_the_requester() {
        let mut h = harness(EngineConfig::default());
        let id = h.create(1, "Ann").await;

        h.engine
            .handle(
                2,
                ClientEvent::JoinGame {
                    nickname: "Bob".into(),
                    game_id: "not-an-id".into(),
                },
            )
            .await;
        h.join(2, "Bob", &GameId::generate()).await;

        let messages = h.drain();
        assert_eq!(
            errors_for(&messages, 2),
            vec!["Please enter a valid game ID", "Game not found"]
        );
        assert!(messages
            .iter()
            .all(|m| !matches!(m, Outbound::Broadcast { .. })));
        assert_eq!(h.engine.snapshot(&id).await.unwrap().players.len(), 1);
    }

    #[tokio::test]
    async fn test_fifth_player_is_rejected() {
        let mut h = harness(EngineConfig::default());
        let id = h.create(1, "Ann").await;
        for conn in 2..=4 {
            h.join(conn, "p", &id).await;
        }
        h.drain();

        h.join(5, "Eve", &id).await;

        assert_eq!(errors_for(&h.drain(), 5), vec!["The game is full"]);
        assert_eq!(h.engine.snapshot(&id).await.unwrap().players.len(), 4);
    }

    #[tokio::test]
    async fn test_join_after_start_is_rejected() {
        let mut h = harness(EngineConfig::default());
        let id = h.create(1, "Ann").await;
        h.start(1, 1, &id).await;
        h.drain();

        h.join(2, "Bob", &id).await;

        assert_eq!(
            errors_for(&h.drain(), 2),
            vec!["The game is currently in progress, please try again later!"]
        );
    }

    #[tokio::test]
    async fn test_non_leader_start_is_ignored() {
        let mut h = harness(EngineConfig::default());
        let id = h.create(1, "Ann").await;
        h.join(2, "Bob", &id).await;
        h.drain();

        h.start(2, 2, &id).await;
        h.start(2, 1, &id).await;

        assert!(h.drain().is_empty());
        assert_eq!(h.phase(&id).await, Phase::Lobby);
    }

    #[tokio::test]
    async fn test_input_outside_race_is_rejected() {
        let mut h = harness(EngineConfig::default());
        let id = h.create(1, "Ann").await;

        h.input(1, 3, 3, &id).await;

        assert_eq!(
            errors_for(&h.drain(), 1),
            vec!["The race is not in progress"]
        );
    }

    #[tokio::test]
    async fn test_leader_leaving_promotes_next_player() {
        let mut h = harness(EngineConfig::default());
        let id = h.create(1, "Ann").await;
        h.join(2, "Bob", &id).await;
        h.drain();

        h.engine
            .handle(
                1,
                ClientEvent::LeaveGame {
                    game_id: id.to_string(),
                },
            )
            .await;

        let messages = h.drain();
        assert!(messages.contains(&Outbound::Leave {
            room: id.clone(),
            connection_id: 1
        }));
        let state = last_state(&messages).unwrap();
        assert_eq!(state.players.len(), 1);
        assert_eq!(state.players[0].nickname, "Bob");
        assert!(state.players[0].is_party_leader);
        assert_eq!(h.engine.registry().membership(1).await, None);
    }

    #[tokio::test]
    async fn test_last_player_leaving_disposes_session() {
        let mut h = harness(EngineConfig::default());
        let id = h.create(1, "Ann").await;
        assert!(h.store.find_by_id(&id).await.unwrap().is_some());

        h.engine.disconnect(1).await;

        assert!(h.engine.snapshot(&id).await.is_none());
        assert!(h.engine.registry().is_empty().await);
        assert!(h.store.find_by_id(&id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_after_race_keeps_results() {
        let mut h = harness(EngineConfig::default());
        let id = h.create(1, "Ann").await;
        h.join(2, "Bob", &id).await;
        h.start(1, 1, &id).await;
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        h.input(1, 9, 9, &id).await;
        h.input(2, 9, 9, &id).await;
        assert_eq!(h.phase(&id).await, Phase::Over);
        h.drain();

        h.engine.disconnect(1).await;
        let snapshot = h.engine.snapshot(&id).await.unwrap();
        assert_eq!(snapshot.players.len(), 2);

        h.engine.disconnect(2).await;
        assert!(h.engine.snapshot(&id).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_race() {
        let mut h = harness(EngineConfig::default());
        let id = h.create(1, "Ann").await;
        h.start(1, 1, &id).await;
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        h.input(1, 9, 10, &id).await;
        assert_eq!(h.phase(&id).await, Phase::Over);
        h.drain();

        h.engine
            .handle(
                1,
                ClientEvent::RestartTimer {
                    game_id: id.to_string(),
                },
            )
            .await;

        let state = last_state(&h.drain()).unwrap();
        assert_eq!(state.phase, Phase::Countdown);
        assert_eq!(state.players[0].wpm, None);
        assert_eq!(state.players[0].current_word_index, 0);

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(h.phase(&id).await, Phase::InProgress);
    }

    #[tokio::test]
    async fn test_restart_during_countdown_is_rejected() {
        let mut h = harness(EngineConfig::default());
        let id = h.create(1, "Ann").await;
        h.start(1, 1, &id).await;
        h.drain();

        h.engine
            .handle(
                1,
                ClientEvent::RestartTimer {
                    game_id: id.to_string(),
                },
            )
            .await;

        assert_eq!(
            errors_for(&h.drain(), 1),
            vec!["The game cannot be restarted right now"]
        );
    }

    #[tokio::test]
    async fn test_immediate_restart_starts_race() {
        let mut h = harness(EngineConfig {
            restart_mode: RestartMode::Immediate,
            ..EngineConfig::default()
        });
        let id = h.create(1, "Ann").await;

        h.engine
            .handle(
                1,
                ClientEvent::RestartTimer {
                    game_id: id.to_string(),
                },
            )
            .await;

        let state = last_state(&h.drain()).unwrap();
        assert_eq!(state.phase, Phase::InProgress);
        assert!(state.start_time.is_some());
    }

    #[tokio::test]
    async fn test_failed_save_changes_nothing() {
        let mut h = harness(EngineConfig::default());
        let id = h.create(1, "Ann").await;
        h.store.failing.store(true, Ordering::SeqCst);

        h.join(2, "Bob", &id).await;

        let messages = h.drain();
        assert_eq!(
            errors_for(&messages, 2),
            vec!["Something went wrong, please try again"]
        );
        assert!(last_state(&messages).is_none());
        assert_eq!(h.engine.snapshot(&id).await.unwrap().players.len(), 1);
        assert_eq!(h.engine.registry().membership(2).await, None);
    }

    #[tokio::test]
    async fn test_creating_a_second_game_leaves_the_first() {
        let mut h = harness(EngineConfig::default());
        let first = h.create(1, "Ann").await;
        h.join(2, "Bob", &first).await;
        h.drain();

        let second = h.create(2, "Bob").await;

        assert_eq!(h.engine.registry().membership(2).await, Some(second));
        let snapshot = h.engine.snapshot(&first).await.unwrap();
        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(snapshot.players[0].nickname, "Ann");
    }

    #[tokio::test]
    async fn test_blank_nickname_is_rejected() {
        let mut h = harness(EngineConfig::default());
        h.engine
            .handle(
                1,
                ClientEvent::CreateGame {
                    nickname: "   ".into(),
                },
            )
            .await;

        assert_eq!(errors_for(&h.drain(), 1), vec!["Please enter a nickname"]);
        assert!(h.engine.registry().is_empty().await);
    }

    fn last_room_snapshot(messages: &[Outbound], id: &GameId) -> Option<GameSnapshot> {
        messages.iter().rev().find_map(|m| match m {
            Outbound::Broadcast {
                room,
                event: ServerEvent::UpdateGame(snapshot) | ServerEvent::UpdateGameState(snapshot),
            } if room == id => Some(snapshot.clone()),
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_join_enters_room_before_broadcast() {
        let mut h = harness(EngineConfig::default());
        let id = h.create(1, "Ann").await;

        h.join(2, "Bob", &id).await;

        let messages = h.drain();
        let entered = messages
            .iter()
            .position(|m| {
                *m == Outbound::Join {
                    room: id.clone(),
                    connection_id: 2,
                }
            })
            .unwrap();
        let announced = messages
            .iter()
            .position(|m| matches!(m, Outbound::Broadcast { event: ServerEvent::UpdateGame(_), .. }))
            .unwrap();
        assert!(entered < announced);
        assert_eq!(h.engine.registry().membership(2).await, Some(id));
    }

    #[tokio::test]
    async fn test_stalled_join_never_broadcasts_stale_lobby() {
        let mut h = harness(EngineConfig::default());
        let first = h.create(1, "Ann").await;
        let second = h.create(2, "Bob").await;

        // Bob's move stalls while his current session is locked
        let previous = h.engine.registry().get(&second).await.unwrap();
        let guard = previous.lock().await;
        let engine = h.engine.clone();
        let target = first.to_string();
        let join = tokio::spawn(async move {
            engine
                .handle(
                    2,
                    ClientEvent::JoinGame {
                        nickname: "Bob".into(),
                        game_id: target,
                    },
                )
                .await;
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        h.start(1, 1, &first).await;
        drop(guard);
        join.await.unwrap();

        let messages = h.drain();
        assert_eq!(
            errors_for(&messages, 2),
            vec!["The game is currently in progress, please try again later!"]
        );
        let announced = last_room_snapshot(&messages, &first).unwrap();
        assert_eq!(announced.phase, Phase::Countdown);
        assert_eq!(announced.players.len(), 1);

        let live = h.engine.snapshot(&first).await.unwrap();
        assert_eq!(live.phase, Phase::Countdown);
        assert_eq!(live.players.len(), 1);
        assert_eq!(h.engine.registry().membership(2).await, None);
        assert!(h.engine.snapshot(&second).await.is_none());
    }

    #[tokio::test]
    async fn test_full_game_keeps_joiner_in_previous_session() {
        let mut h = harness(EngineConfig::default());
        let full = h.create(1, "Ann").await;
        for conn in 2..=4 {
            h.join(conn, "p", &full).await;
        }
        let own = h.create(5, "Eve").await;
        h.drain();

        h.join(5, "Eve", &full).await;

        assert_eq!(errors_for(&h.drain(), 5), vec!["The game is full"]);
        assert_eq!(h.engine.registry().membership(5).await, Some(own.clone()));
        assert_eq!(h.engine.snapshot(&own).await.unwrap().players.len(), 1);
    }

    #[tokio::test]
    async fn test_only_leader_restarts_from_lobby() {
        let mut h = harness(EngineConfig::default());
        let id = h.create(1, "Ann").await;
        h.join(2, "Bob", &id).await;
        h.drain();

        h.engine
            .handle(
                2,
                ClientEvent::RestartTimer {
                    game_id: id.to_string(),
                },
            )
            .await;

        assert!(h.drain().is_empty());
        assert_eq!(h.phase(&id).await, Phase::Lobby);

        h.engine
            .handle(
                1,
                ClientEvent::RestartTimer {
                    game_id: id.to_string(),
                },
            )
            .await;

        assert_eq!(last_state(&h.drain()).unwrap().phase, Phase::Countdown);
    }
}
