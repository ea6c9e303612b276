//! Upload Session Manager
//!
//! Holds the in-memory record of every resumable upload:
//! - Deterministic session ids derived from (filename, size, destination)
//! - Status transitions for chunk uploads and finalize
//! - Idle expiry driven by the sweeper
//!
//! Records describe the chunk plan only. Chunk bytes live on disk and are
//! owned by the chunk store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use super::types::{SessionStatus, UploadError, UploadResult, UploadSession};

/// Derive the session id for an upload target
///
/// SHA-256 over the filename, declared size and destination, hex encoded.
/// Identical parameters always produce the same id.
pub fn derive_session_id(filename: &str, declared_size: u64, destination: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(filename.as_bytes());
    hasher.update([0u8]);
    hasher.update(declared_size.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(destination.to_string_lossy().as_bytes());
    hex::encode(hasher.finalize())
}

/// Outcome of registering a session
#[derive(Debug, Clone)]
pub struct Registration {
    /// The record now stored under the session id
    pub session: UploadSession,

    /// Whether an open record with this id already existed
    pub resumed: bool,

    /// An open record for the same target with a different id, now removed
    pub superseded: Option<UploadSession>,
}

// ============================================================================
// Session Manager
// ============================================================================

/// Manages upload session records
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionManagerInner>,
}

struct SessionManagerInner {
    /// Sessions indexed by ID
    sessions: RwLock<HashMap<String, UploadSession>>,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SessionManagerInner {
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Register a freshly planned session
    ///
    /// An open record with the same id is kept as is (idempotent initiate).
    /// A completed record with the same id is replaced. An open record for
    /// the same target under another id is removed and returned as
    /// superseded; if that record is finalizing the call fails with
    /// `SessionBusy`.
    pub async fn register(&self, candidate: UploadSession) -> UploadResult<Registration> {
        let mut sessions = self.inner.sessions.write().await;

        if let Some(existing) = sessions.get_mut(&candidate.id) {
            match existing.status {
                SessionStatus::Finalizing => {
                    return Err(UploadError::SessionBusy(candidate.id));
                }
                SessionStatus::Initiated | SessionStatus::Uploading => {
                    existing.updated_at = Utc::now();
                    return Ok(Registration {
                        session: existing.clone(),
                        resumed: true,
                        superseded: None,
                    });
                }
                SessionStatus::Complete => {}
            }
        }

        let rival = sessions
            .values()
            .find(|s| {
                s.id != candidate.id
                    && s.destination == candidate.destination
                    && s.filename == candidate.filename
                    && s.status != SessionStatus::Complete
            })
            .map(|s| (s.id.clone(), s.status));

        let superseded = match rival {
            Some((id, SessionStatus::Finalizing)) => return Err(UploadError::SessionBusy(id)),
            Some((id, _)) => sessions.remove(&id),
            None => None,
        };

        if let Some(old) = &superseded {
            tracing::info!(
                session_id = %old.id,
                replaced_by = %candidate.id,
                filename = %old.filename,
                "Superseded upload session"
            );
        }

        tracing::info!(
            session_id = %candidate.id,
            filename = %candidate.filename,
            declared_size = candidate.declared_size,
            total_chunks = candidate.total_chunks,
            "Created upload session"
        );

        sessions.insert(candidate.id.clone(), candidate.clone());

        Ok(Registration {
            session: candidate,
            resumed: false,
            superseded,
        })
    }

    /// Get a session by ID
    pub async fn get(&self, id: &str) -> UploadResult<UploadSession> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| UploadError::SessionNotFound(id.to_string()))
    }

    /// Record chunk activity; the session must still accept chunks
    pub async fn mark_uploading(&self, id: &str) -> UploadResult<UploadSession> {
        let mut sessions = self.inner.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| UploadError::SessionNotFound(id.to_string()))?;

        match session.status {
            SessionStatus::Initiated | SessionStatus::Uploading => {
                session.status = SessionStatus::Uploading;
                session.updated_at = Utc::now();
                Ok(session.clone())
            }
            SessionStatus::Finalizing => Err(UploadError::SessionBusy(id.to_string())),
            SessionStatus::Complete => Err(UploadError::SessionComplete(id.to_string())),
        }
    }

    /// Move a session into `Finalizing`
    pub async fn begin_finalize(&self, id: &str) -> UploadResult<UploadSession> {
        let mut sessions = self.inner.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| UploadError::SessionNotFound(id.to_string()))?;

        match session.status {
            SessionStatus::Initiated | SessionStatus::Uploading => {
                session.status = SessionStatus::Finalizing;
                session.updated_at = Utc::now();
                Ok(session.clone())
            }
            SessionStatus::Finalizing => Err(UploadError::SessionBusy(id.to_string())),
            SessionStatus::Complete => Err(UploadError::SessionComplete(id.to_string())),
        }
    }

    /// Leave `Finalizing`: `Complete` on success, back to `Uploading` otherwise
    pub async fn finish_finalize(&self, id: &str, succeeded: bool) {
        let mut sessions = self.inner.sessions.write().await;
        if let Some(session) = sessions.get_mut(id) {
            session.status = if succeeded {
                SessionStatus::Complete
            } else {
                SessionStatus::Uploading
            };
            session.updated_at = Utc::now();

            if succeeded {
                tracing::info!(
                    session_id = %id,
                    filename = %session.filename,
                    "Upload session completed"
                );
            }
        }
    }

    /// Remove a session record
    pub async fn remove(&self, id: &str) -> UploadResult<UploadSession> {
        let session = {
            let mut sessions = self.inner.sessions.write().await;
            sessions
                .remove(id)
                .ok_or_else(|| UploadError::SessionNotFound(id.to_string()))?
        };

        tracing::info!(
            session_id = %id,
            filename = %session.filename,
            "Upload session removed"
        );

        Ok(session)
    }

    // ========================================================================
    // Query Methods
    // ========================================================================

    /// Get all sessions still accepting chunks
    pub async fn active_sessions(&self) -> Vec<UploadSession> {
        let sessions = self.inner.sessions.read().await;
        sessions.values().filter(|s| s.is_open()).cloned().collect()
    }

    /// Get session count
    pub async fn session_count(&self) -> usize {
        let sessions = self.inner.sessions.read().await;
        sessions.len()
    }

    /// Get active session count
    pub async fn active_session_count(&self) -> usize {
        let sessions = self.inner.sessions.read().await;
        sessions.values().filter(|s| s.is_open()).count()
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Remove records idle longer than `ttl`
    ///
    /// Finalizing sessions are never expired. Returns the removed records.
    pub async fn cleanup_expired(&self, ttl: chrono::Duration) -> Vec<UploadSession> {
        let mut sessions = self.inner.sessions.write().await;

        let expired_ids: Vec<String> = sessions
            .values()
            .filter(|s| s.status != SessionStatus::Finalizing && s.is_idle_for(ttl))
            .map(|s| s.id.clone())
            .collect();

        let expired: Vec<UploadSession> = expired_ids
            .iter()
            .filter_map(|id| sessions.remove(id))
            .collect();

        for session in &expired {
            tracing::debug!(
                session_id = %session.id,
                filename = %session.filename,
                "Cleaned up expired session"
            );
        }

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Cleaned up expired upload sessions");
        }

        expired
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
