use serde::{Deserialize, Serialize};

mod game_id;
mod timing;

pub use game_id::{GameId, InvalidGameId, GAME_ID_LEN};
pub use timing::{calculate_wpm, elapsed_minutes, format_time};

pub const CLIENT_VERSION: u32 = 1;
pub const MAX_PLAYERS: usize = 4;
pub const COUNTDOWN_TICKS: u32 = 5;
pub const RACE_TICKS: u32 = 60;

pub const COUNTDOWN_MESSAGE: &str = "Game Starting in...";
pub const REMAINING_MESSAGE: &str = "Time Remaining";

pub type ConnectionId = u32;
pub type PlayerId = u32;

/// Lifecycle stage of a race session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Lobby,
    Countdown,
    InProgress,
    Over,
}

impl Phase {
    pub fn accepts_players(self) -> bool {
        self == Phase::Lobby
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub connection_id: ConnectionId,
    pub nickname: String,
    pub is_party_leader: bool,
    pub current_word_index: u32,
    pub typed_word_count: u32,
    /// `None` until the player finishes or the race clock runs out
    pub wpm: Option<u32>,
}

/// Immutable view of a session, broadcast to the room and persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub id: GameId,
    pub words: Vec<String>,
    pub players: Vec<PlayerSnapshot>,
    pub phase: Phase,
    /// Race start as milliseconds since the unix epoch
    pub start_time: Option<u64>,
}

impl GameSnapshot {
    pub fn leader(&self) -> Option<&PlayerSnapshot> {
        self.players.iter().find(|p| p.is_party_leader)
    }

    pub fn player_by_connection(&self, connection_id: ConnectionId) -> Option<&PlayerSnapshot> {
        self.players
            .iter()
            .find(|p| p.connection_id == connection_id)
    }
}

/// Events sent by a client. Game ids travel as raw strings and are
/// validated by the server before any lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientEvent {
    CreateGame {
        nickname: String,
    },
    JoinGame {
        nickname: String,
        game_id: String,
    },
    LeaveGame {
        game_id: String,
    },
    StartTimer {
        player_id: PlayerId,
        game_id: String,
    },
    RestartTimer {
        game_id: String,
    },
    UserInput {
        current_word_index: u32,
        typed_word_count: u32,
        game_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerUpdate {
    Countdown { countdown: u32, message: String },
    Remaining { remaining: String, message: String },
}

impl TimerUpdate {
    pub fn countdown(countdown: u32) -> Self {
        TimerUpdate::Countdown {
            countdown,
            message: COUNTDOWN_MESSAGE.to_string(),
        }
    }

    pub fn remaining(seconds: u32) -> Self {
        TimerUpdate::Remaining {
            remaining: format_time(seconds),
            message: REMAINING_MESSAGE.to_string(),
        }
    }
}

/// Events sent by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerEvent {
    UpdateGame(GameSnapshot),
    UpdateGameState(GameSnapshot),
    Timer(TimerUpdate),
    Done,
    Error(String),
}

/// Datagram envelope
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect { client_version: u32 },
    Heartbeat,
    Event(ClientEvent),
    Disconnect,

    Connected { client_id: ConnectionId },
    Server(ServerEvent),
    Disconnected { reason: String },
}
