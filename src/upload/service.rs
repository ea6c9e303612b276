//! Upload Service
//!
//! Drives the classifier, session manager, chunk store and assembler
//! through the upload lifecycle:
//!
//! 1. `initiate` validates the target and returns the chunk plan
//! 2. `accept_chunk` stores chunks in any order, duplicates overwrite
//! 3. `finalize` assembles under the per-target lock
//!
//! `upload_direct` covers single-shot uploads and `open_download` the
//! streaming read path.

use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::assembler::Assembler;
use super::chunk_store::ChunkStore;
use super::classifier::{FileCategory, FileClassifier};
use super::locks::KeyedLocks;
use super::session::{derive_session_id, SessionManager};
use super::stream::{open_stream, FileStream};
use super::types::*;
use crate::storage::paths::{normalize_filename, safe_relative_path};

// ============================================================================
// Settings
// ============================================================================

/// Tunables of the upload engine
#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Chunk size handed to clients
    pub chunk_size: u64,

    /// Global file size ceiling
    pub max_file_size: u64,

    /// Block size of download streams
    pub stream_block_size: usize,

    /// Idle time after which sessions and working sets are swept
    pub session_ttl: chrono::Duration,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_file_size: MAX_FILE_SIZE,
            stream_block_size: DEFAULT_STREAM_BLOCK_SIZE,
            session_ttl: chrono::Duration::hours(SESSION_EXPIRY_HOURS),
        }
    }
}

// ============================================================================
// Upload Service
// ============================================================================

/// Entry point of the chunked upload engine
#[derive(Clone)]
pub struct UploadService {
    inner: Arc<UploadServiceInner>,
}

struct UploadServiceInner {
    settings: UploadSettings,
    classifier: FileClassifier,
    store: ChunkStore,
    sessions: SessionManager,
    locks: KeyedLocks,
}

impl UploadService {
    /// Create a new upload service
    pub fn new(settings: UploadSettings) -> Self {
        Self {
            inner: Arc::new(UploadServiceInner {
                classifier: FileClassifier::new(settings.max_file_size),
                settings,
                store: ChunkStore::new(),
                sessions: SessionManager::new(),
                locks: KeyedLocks::new(),
            }),
        }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.inner.settings
    }

    pub fn classifier(&self) -> &FileClassifier {
        &self.inner.classifier
    }

    pub fn store(&self) -> &ChunkStore {
        &self.inner.store
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    pub fn locks(&self) -> &KeyedLocks {
        &self.inner.locks
    }

    // ========================================================================
    // Resumable Uploads
    // ========================================================================

    /// Start or resume a chunked upload
    ///
    /// Validation failures create nothing, neither a record nor anything on
    /// disk. Repeating the call with identical parameters returns the same
    /// session id and plan, along with the chunks already stored.
    pub async fn initiate(
        &self,
        filename: &str,
        declared_size: u64,
        destination: &Path,
    ) -> UploadResult<SessionDescriptor> {
        let filename = normalize_filename(filename)
            .ok_or_else(|| UploadError::InvalidFilename(filename.to_string()))?;

        let category = self
            .inner
            .classifier
            .classify(&filename, Some(declared_size), &[])
            .into_result()?;

        let chunk_size = self.inner.settings.chunk_size;
        let now = Utc::now();
        let candidate = UploadSession {
            id: derive_session_id(&filename, declared_size, destination),
            filename: filename.clone(),
            declared_size,
            chunk_size,
            total_chunks: total_chunks(declared_size, chunk_size),
            destination: destination.to_path_buf(),
            category,
            status: SessionStatus::Initiated,
            created_at: now,
            updated_at: now,
        };

        let registration = self.inner.sessions.register(candidate).await?;

        // Chunks on disk are only reusable when their recorded plan matches.
        // The marker outlives the session registry, so a restart still
        // discards chunks cut for another size.
        let plan = registration.session.plan_marker();
        {
            let _guard = self.inner.locks.lock(destination, &filename).await;
            match self.inner.store.read_plan(destination, &filename).await? {
                Some(recorded) if recorded == plan => {}
                recorded => {
                    let removed = self.inner.store.clear(destination, &filename).await?;
                    if removed > 0 {
                        tracing::info!(
                            filename = %filename,
                            destination = %destination.display(),
                            recorded_plan = ?recorded,
                            superseded = ?registration.superseded.as_ref().map(|old| &old.id),
                            removed = removed,
                            "Discarded chunks of another upload plan"
                        );
                    }
                    self.inner.store.write_plan(destination, &filename, &plan).await?;
                }
            }
        }

        let uploaded = self.uploaded_indices(&registration.session).await;

        tracing::info!(
            session_id = %registration.session.id,
            filename = %filename,
            destination = %destination.display(),
            declared_size = declared_size,
            total_chunks = registration.session.total_chunks,
            already_uploaded = uploaded.len(),
            resumed = registration.resumed,
            "Initiated resumable upload"
        );

        Ok(registration.session.descriptor(uploaded))
    }

    /// Store one chunk of a session
    ///
    /// `filename` defaults to the session's when `None`.
    pub async fn accept_chunk(
        &self,
        session_id: &str,
        index: u64,
        bytes: &[u8],
        filename: Option<&str>,
        destination: &Path,
    ) -> UploadResult<ChunkAck> {
        let session = self.inner.sessions.get(session_id).await?;
        check_target(&session, filename, destination)?;

        if index >= session.total_chunks {
            return Err(UploadError::ChunkIndexOutOfBounds {
                index,
                total: session.total_chunks,
            });
        }

        let size = bytes.len() as u64;
        if size > session.chunk_size {
            return Err(UploadError::ChunkTooLarge {
                index,
                size,
                max: session.chunk_size,
            });
        }

        self.inner.sessions.mark_uploading(session_id).await?;
        self.inner
            .store
            .save_chunk(&session.destination, &session.filename, index, bytes)
            .await?;

        tracing::debug!(
            session_id = %session_id,
            chunk_index = index,
            size = size,
            "Accepted chunk"
        );

        Ok(ChunkAck::uploaded(index))
    }

    /// Assemble a session's chunks into the final file
    ///
    /// Concurrent calls for the same target are serialized; the later caller
    /// sees the session as complete.
    pub async fn finalize(
        &self,
        session_id: &str,
        filename: Option<&str>,
        total_chunks: u64,
        destination: &Path,
    ) -> UploadResult<Artifact> {
        let session = self.inner.sessions.get(session_id).await?;
        check_target(&session, filename, destination)?;

        if total_chunks != session.total_chunks {
            return Err(UploadError::SessionMismatch(format!(
                "expected {} chunks, got {}",
                session.total_chunks, total_chunks
            )));
        }

        let _guard = self
            .inner
            .locks
            .lock(&session.destination, &session.filename)
            .await;
        self.inner.sessions.begin_finalize(session_id).await?;

        let result = Assembler::new(&self.inner.store)
            .assemble(&session.destination, &session.filename, total_chunks)
            .await;
        self.inner
            .sessions
            .finish_finalize(session_id, result.is_ok())
            .await;
        let (path, size) = result?;

        if size != session.declared_size {
            tracing::warn!(
                session_id = %session_id,
                declared_size = session.declared_size,
                size = size,
                "Assembled size differs from declared size"
            );
        }

        let category = self.category_of(&session.filename);

        Ok(Artifact {
            filename: session.filename,
            path,
            size,
            category,
        })
    }

    /// Progress of a session, with chunk presence read from disk
    pub async fn session_progress(
        &self,
        session_id: &str,
        destination: &Path,
    ) -> UploadResult<SessionProgress> {
        let session = self.inner.sessions.get(session_id).await?;
        check_target(&session, None, destination)?;

        let uploaded = self.uploaded_indices(&session).await;
        let progress = uploaded.len() as f64 / session.total_chunks as f64 * 100.0;

        Ok(SessionProgress {
            session_id: session.id,
            filename: session.filename,
            declared_size: session.declared_size,
            status: session.status,
            total_chunks: session.total_chunks,
            uploaded_chunks: uploaded,
            progress,
            created_at: session.created_at,
            updated_at: session.updated_at,
        })
    }

    /// Abandon a session and remove its working set
    pub async fn cancel(&self, session_id: &str, destination: &Path) -> UploadResult<UploadSession> {
        let session = self.inner.sessions.get(session_id).await?;
        check_target(&session, None, destination)?;

        let _guard = self
            .inner
            .locks
            .lock(&session.destination, &session.filename)
            .await;

        let session = self.inner.sessions.remove(session_id).await?;
        if session.status != SessionStatus::Complete {
            self.inner
                .store
                .clear(&session.destination, &session.filename)
                .await?;
        }

        Ok(session)
    }

    /// Indices whose stored chunk has the size the plan expects
    async fn uploaded_indices(&self, session: &UploadSession) -> Vec<u64> {
        let mut present = Vec::new();
        for index in 0..session.total_chunks {
            let len = self
                .inner
                .store
                .chunk_len(&session.destination, &session.filename, index)
                .await;
            if len == Some(session.expected_chunk_len(index)) {
                present.push(index);
            }
        }
        present
    }

    // ========================================================================
    // Direct Uploads
    // ========================================================================

    /// Store a single-shot upload from a byte stream
    ///
    /// The first block doubles as the content sample. The size ceiling is
    /// enforced on the bytes actually received, so a missing or wrong
    /// `declared_size` cannot bypass it. Rejected uploads leave nothing
    /// behind.
    pub async fn upload_direct<S>(
        &self,
        stream: S,
        filename: &str,
        declared_size: Option<u64>,
        destination: &Path,
    ) -> UploadResult<Artifact>
    where
        S: Stream<Item = std::io::Result<Bytes>>,
    {
        let filename = normalize_filename(filename)
            .ok_or_else(|| UploadError::InvalidFilename(filename.to_string()))?;

        let mut stream = std::pin::pin!(stream);
        let first = stream.next().await.transpose()?.unwrap_or_default();

        let category = self
            .inner
            .classifier
            .classify(&filename, declared_size, &first)
            .into_result()?;
        let limit = self.inner.classifier.limit_for(category);

        let _guard = self.inner.locks.lock(destination, &filename).await;
        let store = &self.inner.store;
        let (temp_path, mut file) = store.create_temp(destination, &filename, "direct").await?;

        let spooled = spool(&mut file, first, stream.as_mut(), category, limit).await;
        drop(file);

        let final_path = destination.join(&filename);
        let result = match spooled {
            Ok(size) => async {
                if let Some(parent) = final_path.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::rename(&temp_path, &final_path).await?;
                Ok::<u64, UploadError>(size)
            }
            .await,
            Err(e) => Err(e),
        };

        store.release_temp(destination, &filename, &temp_path).await;
        let size = result?;

        tracing::info!(
            path = %final_path.display(),
            category = %category,
            size = size,
            "Stored direct upload"
        );

        Ok(Artifact {
            filename,
            path: final_path,
            size,
            category,
        })
    }

    // ========================================================================
    // Downloads
    // ========================================================================

    /// Open a finished file below `destination` for streaming
    pub async fn open_download(
        &self,
        destination: &Path,
        relative_path: &str,
    ) -> UploadResult<FileStream> {
        let relative = safe_relative_path(relative_path)
            .ok_or_else(|| UploadError::NotFound(relative_path.to_string()))?;

        open_stream(
            &destination.join(relative),
            self.inner.settings.stream_block_size,
        )
        .await
    }

    /// Category of a filename, `Unknown` when unrecognized
    pub fn category_of(&self, filename: &str) -> FileCategory {
        self.inner.classifier.classify(filename, None, &[]).category
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Number of chunks for a declared size, at least one
pub fn total_chunks(declared_size: u64, chunk_size: u64) -> u64 {
    declared_size.div_ceil(chunk_size.max(1)).max(1)
}

fn check_target(
    session: &UploadSession,
    filename: Option<&str>,
    destination: &Path,
) -> UploadResult<()> {
    if session.destination != destination {
        return Err(UploadError::SessionMismatch(format!(
            "session {} belongs to another destination",
            session.id
        )));
    }

    if let Some(raw) = filename {
        let normalized = normalize_filename(raw)
            .ok_or_else(|| UploadError::InvalidFilename(raw.to_string()))?;
        if normalized != session.filename {
            return Err(UploadError::SessionMismatch(format!(
                "session {} is for {}, not {}",
                session.id, session.filename, normalized
            )));
        }
    }

    Ok(())
}

/// Copy the stream into `file`, failing once `limit` is exceeded
async fn spool<S>(
    file: &mut fs::File,
    first: Bytes,
    mut rest: Pin<&mut S>,
    category: FileCategory,
    limit: u64,
) -> UploadResult<u64>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    let mut written = 0u64;
    let mut pending = Some(first);

    loop {
        let block = match pending.take() {
            Some(block) => block,
            None => match rest.next().await {
                Some(block) => block?,
                None => break,
            },
        };

        written += block.len() as u64;
        if written > limit {
            return Err(UploadError::FileTooLarge {
                category,
                size: written,
                max: limit,
            });
        }
        file.write_all(&block).await?;
    }

    file.sync_all().await?;
    Ok(written)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    fn service_with_chunk_size(chunk_size: u64) -> UploadService {
        UploadService::new(UploadSettings {
            chunk_size,
            stream_block_size: 4,
            ..Default::default()
        })
    }

    fn byte_stream(blocks: Vec<&'static [u8]>) -> impl Stream<Item = std::io::Result<Bytes>> {
        futures::stream::iter(blocks.into_iter().map(|b| Ok(Bytes::from_static(b))))
    }

    #[test]
    fn test_total_chunks() {
        assert_eq!(total_chunks(0, 10), 1);
        assert_eq!(total_chunks(1, 10), 1);
        assert_eq!(total_chunks(10, 10), 1);
        assert_eq!(total_chunks(11, 10), 2);
        assert_eq!(total_chunks(25 * 1024 * 1024, DEFAULT_CHUNK_SIZE), 3);
    }

    #[tokio::test]
    async fn test_initiate_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let service = service_with_chunk_size(4);

        let first = service.initiate("notes.txt", 10, temp_dir.path()).await.unwrap();
        let second = service.initiate("notes.txt", 10, temp_dir.path()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.total_chunks, 3);
        assert_eq!(first.chunk_size, 4);
        assert_eq!(first.category, FileCategory::Documents);
        assert!(first.uploaded_chunks.is_empty());
    }

    #[tokio::test]
    async fn test_initiate_rejections_create_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let service = UploadService::new(UploadSettings::default());

        let too_large = service
            .initiate("photo.png", 600 * 1000 * 1000, temp_dir.path())
            .await;
        assert!(matches!(too_large, Err(UploadError::FileTooLarge { .. })));

        let bad_type = service.initiate("virus.bat", 10, temp_dir.path()).await;
        assert!(matches!(bad_type, Err(UploadError::InvalidFileType(_))));

        let escape = service.initiate("../up.txt", 10, temp_dir.path()).await;
        assert!(matches!(escape, Err(UploadError::InvalidFilename(_))));

        assert_eq!(service.sessions().session_count().await, 0);
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_chunks_assemble() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path();
        let service = service_with_chunk_size(4);

        let plan = service.initiate("notes.txt", 10, dest).await.unwrap();
        let id = plan.session_id.as_str();

        service.accept_chunk(id, 2, b"ij", None, dest).await.unwrap();
        service.accept_chunk(id, 0, b"abcd", Some("notes.txt"), dest).await.unwrap();
        let ack = service.accept_chunk(id, 1, b"efgh", None, dest).await.unwrap();
        assert_eq!(ack, ChunkAck::uploaded(1));

        let artifact = service.finalize(id, Some("notes.txt"), 3, dest).await.unwrap();
        assert_eq!(artifact.size, 10);
        assert_eq!(artifact.category, FileCategory::Documents);
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"abcdefghij");
        assert!(!dest.join(".chunks").exists());
    }

    #[tokio::test]
    async fn test_missing_chunk_then_retry() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path();
        let service = service_with_chunk_size(4);

        let plan = service.initiate("notes.txt", 10, dest).await.unwrap();
        let id = plan.session_id.as_str();
        service.accept_chunk(id, 0, b"abcd", None, dest).await.unwrap();
        service.accept_chunk(id, 2, b"ij", None, dest).await.unwrap();

        let result = service.finalize(id, None, 3, dest).await;
        assert!(matches!(result, Err(UploadError::MissingChunk { index: 1 })));
        assert!(service.store().has_chunk(dest, "notes.txt", 0).await);
        assert!(service.store().has_chunk(dest, "notes.txt", 2).await);

        // Resume reports what is already there
        let resumed = service.initiate("notes.txt", 10, dest).await.unwrap();
        assert_eq!(resumed.uploaded_chunks, vec![0, 2]);

        service.accept_chunk(id, 1, b"efgh", None, dest).await.unwrap();
        let artifact = service.finalize(id, None, 3, dest).await.unwrap();
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"abcdefghij");
    }

    #[tokio::test]
    async fn test_chunk_validation() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path();
        let service = service_with_chunk_size(4);

        let plan = service.initiate("notes.txt", 10, dest).await.unwrap();
        let id = plan.session_id.as_str();

        assert!(matches!(
            service.accept_chunk(id, 3, b"x", None, dest).await,
            Err(UploadError::ChunkIndexOutOfBounds { index: 3, total: 3 })
        ));
        assert!(matches!(
            service.accept_chunk(id, 0, b"too long", None, dest).await,
            Err(UploadError::ChunkTooLarge { .. })
        ));
        assert!(matches!(
            service.accept_chunk(id, 0, b"abcd", Some("other.txt"), dest).await,
            Err(UploadError::SessionMismatch(_))
        ));
        assert!(matches!(
            service.accept_chunk(id, 0, b"abcd", None, &dest.join("elsewhere")).await,
            Err(UploadError::SessionMismatch(_))
        ));
        assert!(matches!(
            service.accept_chunk("unknown", 0, b"abcd", None, dest).await,
            Err(UploadError::SessionNotFound(_))
        ));
        assert!(matches!(
            service.finalize(id, None, 2, dest).await,
            Err(UploadError::SessionMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_second_finalize_conflicts() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path();
        let service = service_with_chunk_size(4);

        let plan = service.initiate("a.txt", 3, dest).await.unwrap();
        let id = plan.session_id.clone();
        service.accept_chunk(&id, 0, b"abc", None, dest).await.unwrap();

        let (first, second) = tokio::join!(
            service.finalize(&id, None, 1, dest),
            service.finalize(&id, None, 1, dest)
        );

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(UploadError::SessionComplete(_)))));

        assert!(matches!(
            service.accept_chunk(&id, 0, b"abc", None, dest).await,
            Err(UploadError::SessionComplete(_))
        ));
    }

    #[tokio::test]
    async fn test_new_size_supersedes_working_set() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path();
        let service = service_with_chunk_size(4);

        let old = service.initiate("a.txt", 8, dest).await.unwrap();
        service.accept_chunk(&old.session_id, 0, b"abcd", None, dest).await.unwrap();

        let new = service.initiate("a.txt", 6, dest).await.unwrap();
        assert_ne!(new.session_id, old.session_id);
        assert!(new.uploaded_chunks.is_empty());
        assert!(!service.store().has_chunk(dest, "a.txt", 0).await);
        assert!(matches!(
            service.accept_chunk(&old.session_id, 1, b"efgh", None, dest).await,
            Err(UploadError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_restart_discards_chunks_of_another_size() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path();

        let before = service_with_chunk_size(4);
        let old = before.initiate("a.txt", 8, dest).await.unwrap();
        before.accept_chunk(&old.session_id, 0, b"OLD!", None, dest).await.unwrap();
        drop(before);

        // A fresh process has no session records, only what is on disk
        let after = service_with_chunk_size(4);
        let plan = after.initiate("a.txt", 6, dest).await.unwrap();
        assert!(plan.uploaded_chunks.is_empty());
        assert!(!after.store().has_chunk(dest, "a.txt", 0).await);

        after.accept_chunk(&plan.session_id, 1, b"ef", None, dest).await.unwrap();
        assert!(matches!(
            after.finalize(&plan.session_id, None, 2, dest).await,
            Err(UploadError::MissingChunk { index: 0 })
        ));

        after.accept_chunk(&plan.session_id, 0, b"abcd", None, dest).await.unwrap();
        let artifact = after.finalize(&plan.session_id, None, 2, dest).await.unwrap();
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_restart_resumes_same_plan() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path();

        let before = service_with_chunk_size(4);
        let old = before.initiate("a.txt", 6, dest).await.unwrap();
        before.accept_chunk(&old.session_id, 0, b"abcd", None, dest).await.unwrap();
        drop(before);

        let after = service_with_chunk_size(4);
        let plan = after.initiate("a.txt", 6, dest).await.unwrap();
        assert_eq!(plan.session_id, old.session_id);
        assert_eq!(plan.uploaded_chunks, vec![0]);

        after.accept_chunk(&plan.session_id, 1, b"ef", None, dest).await.unwrap();
        let artifact = after.finalize(&plan.session_id, None, 2, dest).await.unwrap();
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_restart_with_new_chunk_size_discards_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path();

        let before = service_with_chunk_size(2);
        let old = before.initiate("a.txt", 8, dest).await.unwrap();
        before.accept_chunk(&old.session_id, 0, b"zz", None, dest).await.unwrap();
        before.accept_chunk(&old.session_id, 2, b"zz", None, dest).await.unwrap();
        drop(before);

        let after = service_with_chunk_size(4);
        let plan = after.initiate("a.txt", 8, dest).await.unwrap();
        assert_eq!(plan.session_id, old.session_id);
        assert!(plan.uploaded_chunks.is_empty());
        assert!(!after.store().has_chunk(dest, "a.txt", 2).await);
    }

    #[tokio::test]
    async fn test_unmarked_chunks_are_discarded() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path();
        let service = service_with_chunk_size(4);

        service.store().save_chunk(dest, "a.txt", 0, b"????").await.unwrap();

        let plan = service.initiate("a.txt", 6, dest).await.unwrap();
        assert!(plan.uploaded_chunks.is_empty());
        assert!(!service.store().has_chunk(dest, "a.txt", 0).await);
        assert_eq!(
            service.store().read_plan(dest, "a.txt").await.unwrap(),
            Some(format!("{} 4", plan.session_id))
        );
    }

    #[tokio::test]
    async fn test_default_plan_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path();
        let service = UploadService::new(UploadSettings::default());
        let declared_size = 25 * 1024 * 1024;

        let plan = service.initiate("footage.mp4", declared_size, dest).await.unwrap();
        assert_eq!(plan.chunk_size, 10 * 1024 * 1024);
        assert_eq!(plan.total_chunks, 3);

        let chunk_len = |index: u64| {
            (declared_size - index * plan.chunk_size).min(plan.chunk_size) as usize
        };
        for index in [1u64, 0, 2] {
            let data = vec![index as u8 + 1; chunk_len(index)];
            service
                .accept_chunk(&plan.session_id, index, &data, None, dest)
                .await
                .unwrap();
        }

        let artifact = service.finalize(&plan.session_id, None, 3, dest).await.unwrap();
        assert_eq!(artifact.size, 26_214_400);
        assert_eq!(artifact.category, FileCategory::Videos);

        let written = std::fs::read(&artifact.path).unwrap();
        assert_eq!(written.len(), 26_214_400);
        let ten_mib = 10 * 1024 * 1024;
        assert!(written[..ten_mib].iter().all(|&b| b == 1));
        assert!(written[ten_mib..2 * ten_mib].iter().all(|&b| b == 2));
        assert!(written[2 * ten_mib..].iter().all(|&b| b == 3));
        assert!(!dest.join(".chunks").exists());
    }

    fn permutations(items: &[u64]) -> Vec<Vec<u64>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut all = Vec::new();
        for (i, &first) in items.iter().enumerate() {
            let mut rest = items.to_vec();
            rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, first);
                all.push(tail);
            }
        }
        all
    }

    #[tokio::test]
    async fn test_every_arrival_order_assembles() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path();
        let service = service_with_chunk_size(4);
        let content = b"abcdefghijklmn";
        let chunks: Vec<&[u8]> = content.chunks(4).collect();

        let orders = permutations(&[0, 1, 2, 3]);
        assert_eq!(orders.len(), 24);

        for (n, order) in orders.iter().enumerate() {
            let filename = format!("order-{}.txt", n);
            let plan = service
                .initiate(&filename, content.len() as u64, dest)
                .await
                .unwrap();
            assert_eq!(plan.total_chunks, 4);

            for &index in order {
                service
                    .accept_chunk(&plan.session_id, index, chunks[index as usize], None, dest)
                    .await
                    .unwrap();
            }

            let artifact = service.finalize(&plan.session_id, None, 4, dest).await.unwrap();
            assert_eq!(
                std::fs::read(&artifact.path).unwrap(),
                content.to_vec(),
                "arrival order {:?}",
                order
            );
        }

        assert!(!dest.join(".chunks").exists());
    }

    #[tokio::test]
    async fn test_progress_and_cancel() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path();
        let service = service_with_chunk_size(4);

        let plan = service.initiate("a.txt", 8, dest).await.unwrap();
        service.accept_chunk(&plan.session_id, 1, b"efgh", None, dest).await.unwrap();

        let progress = service.session_progress(&plan.session_id, dest).await.unwrap();
        assert_eq!(progress.status, SessionStatus::Uploading);
        assert_eq!(progress.uploaded_chunks, vec![1]);
        assert_eq!(progress.progress, 50.0);

        service.cancel(&plan.session_id, dest).await.unwrap();
        assert!(!dest.join(".chunks").exists());
        assert!(matches!(
            service.session_progress(&plan.session_id, dest).await,
            Err(UploadError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_direct_upload() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path();
        let service = UploadService::new(UploadSettings::default());

        let artifact = service
            .upload_direct(byte_stream(vec![b"# Title\n", b"body\n"]), "docs/readme.md", None, dest)
            .await
            .unwrap();

        assert_eq!(artifact.filename, "docs/readme.md");
        assert_eq!(artifact.size, 13);
        assert_eq!(artifact.category, FileCategory::Documents);
        assert_eq!(std::fs::read(dest.join("docs/readme.md")).unwrap(), b"# Title\nbody\n");
        assert!(!dest.join(".chunks").exists());
    }

    #[tokio::test]
    async fn test_direct_upload_enforces_actual_size() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path();
        let service = UploadService::new(UploadSettings {
            max_file_size: 8,
            ..Default::default()
        });

        let result = service
            .upload_direct(byte_stream(vec![b"12345", b"67890"]), "a.txt", Some(4), dest)
            .await;

        assert!(matches!(result, Err(UploadError::FileTooLarge { size: 10, max: 8, .. })));
        assert!(!dest.join("a.txt").exists());
        assert!(!dest.join(".chunks").exists());

        let result = service
            .upload_direct(byte_stream(vec![b"MZ"]), "tool.bat", None, dest)
            .await;
        assert!(matches!(result, Err(UploadError::InvalidFileType(_))));
    }

    #[tokio::test]
    async fn test_download_streams_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path();
        let service = service_with_chunk_size(4);

        let plan = service.initiate("a.txt", 6, dest).await.unwrap();
        service.accept_chunk(&plan.session_id, 1, b"ef", None, dest).await.unwrap();
        service.accept_chunk(&plan.session_id, 0, b"abcd", None, dest).await.unwrap();
        service.finalize(&plan.session_id, None, 2, dest).await.unwrap();

        let download = service.open_download(dest, "a.txt").await.unwrap();
        assert_eq!(download.size, 6);
        let blocks: Vec<Bytes> = download.stream.try_collect().await.unwrap();
        assert_eq!(blocks.concat(), b"abcdef");

        assert!(matches!(
            service.open_download(dest, "missing.txt").await,
            Err(UploadError::NotFound(_))
        ));
        assert!(matches!(
            service.open_download(dest, "../a.txt").await,
            Err(UploadError::NotFound(_))
        ));
    }
}
