//! Session persistence.
//!
//! The engine serializes its own sessions into an opaque blob wrapped in a
//! versioned envelope; where the blob goes is up to a [`SessionStore`].

use crate::session::{GameSession, SessionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Invalid session id: {0:?}")]
    InvalidId(String),

    #[error("Store error: {0}")]
    Store(String),
}

/// Current save format version.
pub const SAVE_VERSION: u32 = 1;

/// A saved session with its format version and save time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedSession {
    pub version: u32,
    /// RFC 3339 timestamp.
    pub saved_at: String,
    pub session: GameSession,
}

impl SavedSession {
    pub fn new(session: GameSession) -> Self {
        Self {
            version: SAVE_VERSION,
            saved_at: chrono::Utc::now().to_rfc3339(),
            session,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PersistError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decode a blob, checking the version before the body.
    pub fn decode(bytes: &[u8]) -> Result<Self, PersistError> {
        #[derive(Deserialize)]
        struct Header {
            version: u32,
        }

        let header: Header = serde_json::from_slice(bytes)?;
        if header.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: header.version,
            });
        }

        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Serialize a session for storage.
pub fn encode_session(session: &GameSession) -> Result<Vec<u8>, PersistError> {
    SavedSession::new(session.clone()).encode()
}

/// Restore a session from storage.
pub fn decode_session(bytes: &[u8]) -> Result<GameSession, PersistError> {
    Ok(SavedSession::decode(bytes)?.session)
}

/// An opaque key-value store for session blobs.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, id: &SessionId, blob: Vec<u8>) -> Result<(), PersistError>;

    /// `Ok(None)` if nothing is stored under `id`.
    async fn load(&self, id: &SessionId) -> Result<Option<Vec<u8>>, PersistError>;
}

// ============================================================================
// File store
// ============================================================================

/// One JSON file per session under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &SessionId) -> Result<PathBuf, PersistError> {
        let raw = id.as_str();
        let valid = !raw.is_empty()
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(PersistError::InvalidId(raw.to_string()));
        }
        Ok(self.dir.join(format!("{raw}.json")))
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn save(&self, id: &SessionId, blob: Vec<u8>) -> Result<(), PersistError> {
        let path = self.path_for(id)?;
        fs::create_dir_all(&self.dir).await?;

        // Write beside the target, then rename into place.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, blob).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, id: &SessionId) -> Result<Option<Vec<u8>>, PersistError> {
        let path = self.path_for(id)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Memory store
// ============================================================================

/// Keeps blobs in memory. Used by tests and throwaway games.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<SessionId, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, id: &SessionId) -> bool {
        self.blobs.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn save(&self, id: &SessionId, blob: Vec<u8>) -> Result<(), PersistError> {
        self.blobs.write().await.insert(id.clone(), blob);
        Ok(())
    }

    async fn load(&self, id: &SessionId) -> Result<Option<Vec<u8>>, PersistError> {
        Ok(self.blobs.read().await.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip() {
        let session = GameSession::new_game().unwrap();
        let bytes = encode_session(&session).unwrap();

        let saved = SavedSession::decode(&bytes).unwrap();
        assert_eq!(saved.version, SAVE_VERSION);
        assert!(chrono::DateTime::parse_from_rfc3339(&saved.saved_at).is_ok());
        assert_eq!(saved.session, session);
    }

    #[test]
    fn test_version_mismatch() {
        let bytes = br#"{"version": 99, "saved_at": "", "session": null}"#;
        let err = decode_session(bytes).unwrap_err();
        assert!(matches!(
            err,
            PersistError::VersionMismatch {
                expected: 1,
                found: 99
            }
        ));
    }

    #[test]
    fn test_adjacency_serialized_by_key() {
        let mut session = GameSession::new_game().unwrap();
        session.world.move_to("River");
        let json: serde_json::Value =
            serde_json::from_slice(&encode_session(&session).unwrap()).unwrap();

        let river = &json["session"]["world"]["locations"]["river"];
        assert_eq!(river["adjacent"], serde_json::json!(["blue_house"]));
        assert_eq!(json["session"]["world"]["current_location"], "river");
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("saves"));
        let id = SessionId::new("00ff00ff00ff00ff");

        assert!(store.load(&id).await.unwrap().is_none());
        store.save(&id, b"blob".to_vec()).await.unwrap();
        assert_eq!(store.load(&id).await.unwrap().as_deref(), Some(&b"blob"[..]));
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let err = store
            .load(&SessionId::new("../etc/passwd"))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistError::InvalidId(_)));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        let id = SessionId::generate();
        store.save(&id, vec![1, 2, 3]).await.unwrap();
        assert!(store.contains(&id).await);
        assert_eq!(store.load(&id).await.unwrap(), Some(vec![1, 2, 3]));
    }
}
