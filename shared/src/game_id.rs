use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of a textual game id, matching storage object-id conventions
pub const GAME_ID_LEN: usize = 24;

static ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Identifier of a race session, 12 bytes rendered as 24 lowercase hex chars
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GameId(String);

/// Returned when a string is not a well-formed game id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidGameId;

impl fmt::Display for InvalidGameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Please enter a valid game ID")
    }
}

impl std::error::Error for InvalidGameId {}

impl GameId {
    /// Generates a new id from a seconds timestamp, 5 random bytes and a
    /// process-wide counter, so ids sort roughly by creation time.
    pub fn generate() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let random: [u8; 5] = rand::random();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(&random);
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);

        GameId(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn parse(raw: &str) -> Result<Self, InvalidGameId> {
        if raw.len() == GAME_ID_LEN && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(GameId(raw.to_ascii_lowercase()))
        } else {
            Err(InvalidGameId)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for GameId {
    type Err = InvalidGameId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GameId::parse(s)
    }
}

impl TryFrom<String> for GameId {
    type Error = InvalidGameId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        GameId::parse(&value)
    }
}

impl From<GameId> for String {
    fn from(id: GameId) -> Self {
        id.0
    }
}
