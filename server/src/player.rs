use shared::{ConnectionId, PlayerId, PlayerSnapshot};

/// A race participant and their progress through the current text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    pub connection_id: ConnectionId,
    pub nickname: String,
    pub is_party_leader: bool,
    pub current_word_index: u32,
    pub typed_word_count: u32,
    pub wpm: Option<u32>,
}

impl Player {
    pub fn new(id: PlayerId, connection_id: ConnectionId, nickname: String) -> Self {
        Self {
            id,
            connection_id,
            nickname,
            is_party_leader: false,
            current_word_index: 0,
            typed_word_count: 0,
            wpm: None,
        }
    }

    pub fn leader(id: PlayerId, connection_id: ConnectionId, nickname: String) -> Self {
        Self {
            is_party_leader: true,
            ..Self::new(id, connection_id, nickname)
        }
    }

    pub fn has_finished(&self) -> bool {
        self.wpm.is_some()
    }

    /// Records reported progress. The word index never moves backwards
    /// within a race.
    pub fn record_progress(&mut self, current_word_index: u32, typed_word_count: u32) {
        self.current_word_index = self.current_word_index.max(current_word_index);
        self.typed_word_count = typed_word_count;
    }

    pub fn reset_progress(&mut self) {
        self.current_word_index = 0;
        self.typed_word_count = 0;
        self.wpm = None;
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id,
            connection_id: self.connection_id,
            nickname: self.nickname.clone(),
            is_party_leader: self.is_party_leader,
            current_word_index: self.current_word_index,
            typed_word_count: self.typed_word_count,
            wpm: self.wpm,
        }
    }
}
