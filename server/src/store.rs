//! Session persistence
//!
//! The engine keeps live sessions in memory and writes every committed
//! change through a `GameStore`. Two stores are provided: an in-memory map
//! (the default) and a directory of JSON documents, one per game.

use async_trait::async_trait;
use log::debug;
use shared::{GameId, GameSnapshot};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("stored game is corrupt: {0}")]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait GameStore: Send + Sync {
    async fn find_by_id(&self, id: &GameId) -> Result<Option<GameSnapshot>, StoreError>;
    async fn save(&self, game: &GameSnapshot) -> Result<(), StoreError>;
    async fn delete(&self, id: &GameId) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryStore {
    games: RwLock<HashMap<GameId, GameSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn find_by_id(&self, id: &GameId) -> Result<Option<GameSnapshot>, StoreError> {
        Ok(self.games.read().await.get(id).cloned())
    }

    async fn save(&self, game: &GameSnapshot) -> Result<(), StoreError> {
        self.games
            .write()
            .await
            .insert(game.id.clone(), game.clone());
        Ok(())
    }

    async fn delete(&self, id: &GameId) -> Result<(), StoreError> {
        self.games.write().await.remove(id);
        Ok(())
    }
}

/// Stores each game as `<dir>/<game id>.json`
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &GameId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

#[async_trait]
impl GameStore for FileStore {
    async fn find_by_id(&self, id: &GameId) -> Result<Option<GameSnapshot>, StoreError> {
        match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, game: &GameSnapshot) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(game)?;
        let path = self.path_for(&game.id);
        // readers only ever see whole documents
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Saved game {} to {}", game.id, path.display());
        Ok(())
    }

    async fn delete(&self, id: &GameId) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
