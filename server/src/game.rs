//! Race session aggregate and its lifecycle state machine
//!
//! `Game` holds everything that is persisted and broadcast about a session:
//! the race text, the players in join order, the current phase and the race
//! start time. All transitions are plain synchronous methods so they can be
//! applied to a copy, persisted, and only then committed by the engine.
//!
//! Phases move `Lobby -> Countdown -> InProgress -> Over`, and a restart
//! takes a session from `Lobby` or `Over` back into `Countdown`.

use crate::player::Player;
use log::info;
use shared::{calculate_wpm, ConnectionId, GameId, GameSnapshot, Phase, PlayerId, MAX_PLAYERS};
use std::time::Duration;
use tokio::time::Instant;

/// Rule violations raised by session transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("The game is currently in progress, please try again later!")]
    NotJoinable,
    #[error("The game is full")]
    Full,
    #[error("You are already in this game")]
    AlreadyJoined,
    #[error("You are not in this game")]
    NotAPlayer,
    #[error("Only the party leader can start the game")]
    NotLeader,
    #[error("The game can only be started from the lobby")]
    NotInLobby,
    #[error("The race is not in progress")]
    NotInProgress,
    #[error("The game cannot be restarted right now")]
    CannotRestart,
    #[error("The race text is empty")]
    EmptyText,
}

/// Result of applying a progress report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    /// Player is still typing
    Typing,
    /// Player reached the end; others are still racing
    Finished,
    /// Player reached the end and was the last one to do so
    RaceOver,
    /// Player had already finished, nothing changed
    Ignored,
}

/// Result of removing a player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left,
    /// Only finished players remain, so the race ended
    RaceOver,
    /// No players remain
    Empty,
}

#[derive(Debug, Clone)]
pub struct Game {
    pub id: GameId,
    pub words: Vec<String>,
    pub players: Vec<Player>,
    pub phase: Phase,
    /// Race start in milliseconds since the unix epoch
    pub start_time: Option<u64>,
    started_at: Option<Instant>,
    next_player_id: PlayerId,
}

impl Game {
    /// Creates a session in the lobby with its founding player as leader
    pub fn new(
        id: GameId,
        words: Vec<String>,
        connection_id: ConnectionId,
        nickname: String,
    ) -> Result<Self, GameError> {
        if words.is_empty() {
            return Err(GameError::EmptyText);
        }

        Ok(Self {
            id,
            words,
            players: vec![Player::leader(1, connection_id, nickname)],
            phase: Phase::Lobby,
            start_time: None,
            started_at: None,
            next_player_id: 2,
        })
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            id: self.id.clone(),
            words: self.words.clone(),
            players: self.players.iter().map(Player::snapshot).collect(),
            phase: self.phase,
            start_time: self.start_time,
        }
    }

    pub fn player(&self, player_id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == player_id)
    }

    pub fn player_by_connection(&self, connection_id: ConnectionId) -> Option<&Player> {
        self.players
            .iter()
            .find(|p| p.connection_id == connection_id)
    }

    fn player_by_connection_mut(&mut self, connection_id: ConnectionId) -> Option<&mut Player> {
        self.players
            .iter_mut()
            .find(|p| p.connection_id == connection_id)
    }

    pub fn has_player(&self, connection_id: ConnectionId) -> bool {
        self.player_by_connection(connection_id).is_some()
    }

    pub fn all_finished(&self) -> bool {
        !self.players.is_empty() && self.players.iter().all(Player::has_finished)
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        self.started_at
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }

    /// Checks whether `connection_id` could take a seat right now
    pub fn check_joinable(&self, connection_id: ConnectionId) -> Result<(), GameError> {
        if !self.phase.accepts_players() {
            return Err(GameError::NotJoinable);
        }
        if self.players.len() >= MAX_PLAYERS {
            return Err(GameError::Full);
        }
        if self.has_player(connection_id) {
            return Err(GameError::AlreadyJoined);
        }
        Ok(())
    }

    pub fn add_player(
        &mut self,
        connection_id: ConnectionId,
        nickname: String,
    ) -> Result<PlayerId, GameError> {
        self.check_joinable(connection_id)?;

        let id = self.next_player_id;
        self.next_player_id += 1;
        self.players.push(Player::new(id, connection_id, nickname));
        Ok(id)
    }

    /// Removes the player on `connection_id`. Leadership passes to the
    /// earliest-joined remaining player.
    pub fn remove_player(
        &mut self,
        connection_id: ConnectionId,
        now: Instant,
    ) -> Result<LeaveOutcome, GameError> {
        let index = self
            .players
            .iter()
            .position(|p| p.connection_id == connection_id)
            .ok_or(GameError::NotAPlayer)?;
        let removed = self.players.remove(index);

        if self.players.is_empty() {
            return Ok(LeaveOutcome::Empty);
        }

        if removed.is_party_leader {
            let heir = &mut self.players[0];
            heir.is_party_leader = true;
            info!(
                "Game {}: leadership passed from {} to {}",
                self.id, removed.nickname, heir.nickname
            );
        }

        if self.phase == Phase::InProgress && self.all_finished() {
            self.finish_race(now);
            return Ok(LeaveOutcome::RaceOver);
        }

        Ok(LeaveOutcome::Left)
    }

    /// Moves the lobby into the countdown. Only the leader, acting from
    /// their own connection, may do this.
    pub fn begin_countdown(
        &mut self,
        connection_id: ConnectionId,
        player_id: PlayerId,
    ) -> Result<(), GameError> {
        let player = self.player(player_id).ok_or(GameError::NotAPlayer)?;
        if !player.is_party_leader || player.connection_id != connection_id {
            return Err(GameError::NotLeader);
        }
        if self.phase != Phase::Lobby {
            return Err(GameError::NotInLobby);
        }

        self.phase = Phase::Countdown;
        Ok(())
    }

    pub fn start_race(&mut self, now: Instant, now_ms: u64) {
        self.phase = Phase::InProgress;
        self.started_at = Some(now);
        self.start_time = Some(now_ms);
    }

    /// Applies a progress report from the player on `connection_id`
    pub fn record_input(
        &mut self,
        connection_id: ConnectionId,
        current_word_index: u32,
        typed_word_count: u32,
        now: Instant,
    ) -> Result<InputOutcome, GameError> {
        if self.phase != Phase::InProgress {
            return Err(GameError::NotInProgress);
        }

        let last_word = self.words.len().saturating_sub(1) as u32;
        let elapsed = self.elapsed(now);
        let player = self
            .player_by_connection_mut(connection_id)
            .ok_or(GameError::NotAPlayer)?;

        if player.has_finished() {
            return Ok(InputOutcome::Ignored);
        }

        player.record_progress(current_word_index, typed_word_count);
        if player.current_word_index < last_word {
            return Ok(InputOutcome::Typing);
        }

        player.wpm = Some(calculate_wpm(elapsed, player.typed_word_count));

        if self.all_finished() {
            self.phase = Phase::Over;
            Ok(InputOutcome::RaceOver)
        } else {
            Ok(InputOutcome::Finished)
        }
    }

    /// Ends the race, scoring everyone who has not finished from their
    /// last reported word count.
    pub fn finish_race(&mut self, now: Instant) {
        let elapsed = self.elapsed(now);
        for player in self.players.iter_mut().filter(|p| !p.has_finished()) {
            player.wpm = Some(calculate_wpm(elapsed, player.typed_word_count));
        }
        self.phase = Phase::Over;
    }

    /// Restart is allowed from the lobby, after a race, or when a countdown
    /// or race lost its clock.
    pub fn can_restart(&self, clock_running: bool) -> bool {
        match self.phase {
            Phase::Lobby | Phase::Over => true,
            Phase::Countdown | Phase::InProgress => !clock_running,
        }
    }

    /// Checks that `connection_id` may restart the session now. From the
    /// lobby a restart starts the countdown, so only the leader may send it.
    pub fn authorize_restart(
        &self,
        connection_id: ConnectionId,
        clock_running: bool,
    ) -> Result<(), GameError> {
        let player = self
            .player_by_connection(connection_id)
            .ok_or(GameError::NotAPlayer)?;
        if self.phase == Phase::Lobby && !player.is_party_leader {
            return Err(GameError::NotLeader);
        }
        if !self.can_restart(clock_running) {
            return Err(GameError::CannotRestart);
        }
        Ok(())
    }

    /// Swaps in new race text, resets all progress and enters the countdown
    pub fn restart(&mut self, words: Vec<String>) -> Result<(), GameError> {
        if words.is_empty() {
            return Err(GameError::EmptyText);
        }

        self.words = words;
        for player in &mut self.players {
            player.reset_progress();
        }
        self.start_time = None;
        self.started_at = None;
        self.phase = Phase::Countdown;
        Ok(())
    }
}
