//! Crash-safe YAML session persistence.
//!
//! Each session lives in its own directory under the sessions root:
//!
//! ```text
//! sessions/
//!   .index.yaml                      # { uuid: dirname } map
//!   2025-01-31_a1b2c3d4/
//!     session.yaml
//! ```
//!
//! Writes are atomic (sibling `.tmp` file, then rename) so readers see
//! either the prior version or the new one, never a torn file. A missing
//! or corrupt `session.yaml` makes the session unreadable — it is never
//! treated as half-present. The index is a cache: when missing or
//! corrupt it is rebuilt by scanning the session directories.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ironloop_core::MemoryError;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::Session;

/// One row in a session listing.
#[derive(Debug, Clone)]
pub struct SessionListEntry {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    /// First user message, truncated
    pub preview: String,
}

/// YAML file-backed session store.
pub struct SessionStore {
    sessions_dir: PathBuf,
    /// UUID → directory name cache; `None` until first load.
    index: Mutex<Option<HashMap<Uuid, String>>>,
}

impl SessionStore {
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            index: Mutex::new(None),
        }
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    /// Persist a session snapshot. Creates the session directory on the
    /// first save and registers it in the index. Idempotent.
    pub async fn save(&self, session: &Session) -> Result<(), MemoryError> {
        let dir_name = session.dir_name();
        let session_dir = self.sessions_dir.join(&dir_name);
        tokio::fs::create_dir_all(&session_dir)
            .await
            .map_err(|e| MemoryError::Storage(format!("failed to create session dir: {e}")))?;

        let yaml = serde_yaml::to_string(session)
            .map_err(|e| MemoryError::Serialization(e.to_string()))?;
        write_atomic(&session_dir.join("session.yaml"), &yaml).await?;

        let mut guard = self.index.lock().await;
        let index = self.loaded_index(&mut *guard).await;
        if index.get(&session.id) != Some(&dir_name) {
            index.insert(session.id, dir_name.clone());
            let snapshot = index.clone();
            drop(guard);
            self.save_index(&snapshot).await?;
        }

        debug!(session_id = %session.id, dir = %dir_name, "Session saved");
        Ok(())
    }

    /// Load a session by exact UUID.
    pub async fn load(&self, id: Uuid) -> Result<Session, MemoryError> {
        let mut guard = self.index.lock().await;
        let index = self.loaded_index(&mut *guard).await;
        let dir_name = index
            .get(&id)
            .cloned()
            .ok_or_else(|| MemoryError::SessionNotFound(id.to_string()))?;
        drop(guard);

        self.load_from_dir(&dir_name)
            .await?
            .ok_or_else(|| MemoryError::SessionNotFound(id.to_string()))
    }

    /// Resolve a UUID prefix to the unique matching session.
    ///
    /// Errors when zero or more than one session matches.
    pub async fn find_by_prefix(&self, prefix: &str) -> Result<Uuid, MemoryError> {
        let mut guard = self.index.lock().await;
        let index = self.loaded_index(&mut *guard).await;

        let needle = prefix.to_lowercase().replace('-', "");
        let matches: Vec<Uuid> = index
            .keys()
            .filter(|id| id.simple().to_string().starts_with(&needle))
            .copied()
            .collect();

        match matches.len() {
            1 => Ok(matches[0]),
            0 => Err(MemoryError::SessionNotFound(prefix.to_string())),
            n => Err(MemoryError::AmbiguousPrefix {
                prefix: prefix.to_string(),
                matches: n,
            }),
        }
    }

    /// The most recently updated session, if any.
    pub async fn find_latest(&self) -> Result<Option<Uuid>, MemoryError> {
        let sessions = self.list().await?;
        Ok(sessions.first().map(|s| s.id))
    }

    /// List all readable sessions, most recently updated first.
    pub async fn list(&self) -> Result<Vec<SessionListEntry>, MemoryError> {
        let mut guard = self.index.lock().await;
        let index = self.loaded_index(&mut *guard).await.clone();
        drop(guard);

        let mut entries = Vec::new();
        for (id, dir_name) in index {
            match self.load_from_dir(&dir_name).await {
                Ok(Some(session)) => entries.push(SessionListEntry {
                    id,
                    created_at: session.created_at,
                    updated_at: session.updated_at,
                    message_count: session.messages.len(),
                    preview: session.preview(),
                }),
                Ok(None) => {}
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Skipping unreadable session");
                }
            }
        }

        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(entries)
    }

    /// Delete a session directory and drop it from the index.
    pub async fn delete(&self, id: Uuid) -> Result<bool, MemoryError> {
        let mut guard = self.index.lock().await;
        let index = self.loaded_index(&mut *guard).await;
        let Some(dir_name) = index.remove(&id) else {
            return Ok(false);
        };
        let snapshot = index.clone();
        drop(guard);

        let session_dir = self.sessions_dir.join(&dir_name);
        if session_dir.exists() {
            tokio::fs::remove_dir_all(&session_dir)
                .await
                .map_err(|e| MemoryError::Storage(format!("failed to delete session: {e}")))?;
        }
        self.save_index(&snapshot).await?;

        info!(session_id = %id, "Session deleted");
        Ok(true)
    }

    // ── Index handling ────────────────────────────────────────────────

    async fn loaded_index<'a>(
        &self,
        guard: &'a mut Option<HashMap<Uuid, String>>,
    ) -> &'a mut HashMap<Uuid, String> {
        if guard.is_none() {
            *guard = Some(self.load_or_rebuild_index().await);
        }
        guard.as_mut().unwrap()
    }

    fn index_path(&self) -> PathBuf {
        self.sessions_dir.join(".index.yaml")
    }

    async fn load_or_rebuild_index(&self) -> HashMap<Uuid, String> {
        let path = self.index_path();
        if let Ok(content) = tokio::fs::read_to_string(&path).await {
            match serde_yaml::from_str::<HashMap<Uuid, String>>(&content) {
                Ok(index) => return index,
                Err(e) => warn!(error = %e, "Corrupt session index, rebuilding"),
            }
        }
        self.rebuild_index().await
    }

    /// Rebuild the index by scanning session directories for readable
    /// `session.yaml` files.
    async fn rebuild_index(&self) -> HashMap<Uuid, String> {
        let mut index = HashMap::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.sessions_dir).await else {
            return index;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            match self.load_from_dir(&name).await {
                Ok(Some(session)) => {
                    index.insert(session.id, name);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(dir = %name, error = %e, "Skipping unreadable session during rebuild");
                }
            }
        }

        if let Err(e) = self.save_index(&index).await {
            warn!(error = %e, "Failed to persist rebuilt index");
        }
        info!(sessions = index.len(), "Session index rebuilt");
        index
    }

    async fn save_index(&self, index: &HashMap<Uuid, String>) -> Result<(), MemoryError> {
        tokio::fs::create_dir_all(&self.sessions_dir)
            .await
            .map_err(|e| MemoryError::Storage(format!("failed to create sessions dir: {e}")))?;
        let yaml = serde_yaml::to_string(index)
            .map_err(|e| MemoryError::Serialization(e.to_string()))?;
        write_atomic(&self.index_path(), &yaml).await
    }

    /// Read a session file; `Ok(None)` when absent, `Err` when torn or
    /// unparseable.
    async fn load_from_dir(&self, dir_name: &str) -> Result<Option<Session>, MemoryError> {
        let path = self.sessions_dir.join(dir_name).join("session.yaml");
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MemoryError::Storage(format!("failed to read session: {e}"))),
        };

        serde_yaml::from_str(&content)
            .map(Some)
            .map_err(|e| MemoryError::Storage(format!("unreadable session file: {e}")))
    }
}

/// Write `content` to `path` atomically: sibling `.tmp` file + rename.
async fn write_atomic(path: &Path, content: &str) -> Result<(), MemoryError> {
    let tmp_path = path.with_extension("yaml.tmp");
    tokio::fs::write(&tmp_path, content)
        .await
        .map_err(|e| MemoryError::Storage(format!("failed to write temp file: {e}")))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| MemoryError::Storage(format!("failed to replace file: {e}")))?;
    Ok(())
}
