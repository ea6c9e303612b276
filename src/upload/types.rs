//! Upload types for the chunked upload engine

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::classifier::FileCategory;

// ============================================================================
// Constants
// ============================================================================

/// Default chunk size: 10MB
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum file size: 10GB
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// Default block size for streamed reads: 1MB
pub const DEFAULT_STREAM_BLOCK_SIZE: usize = 1024 * 1024;

/// Session expiry time: 24 hours
pub const SESSION_EXPIRY_HOURS: i64 = 24;

/// Name of the per-destination directory holding chunk working sets
pub const CHUNKS_DIR: &str = ".chunks";

/// File name prefix of a stored chunk (`chunk_00000000`)
pub const CHUNK_FILE_PREFIX: &str = "chunk_";

/// File inside a working set naming the plan its chunks belong to
pub const PLAN_MARKER: &str = ".plan";

// ============================================================================
// Initiate Types
// ============================================================================

/// Result of initiating a resumable upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// Deterministic session identifier
    pub session_id: String,

    /// Chunk size the client must use
    pub chunk_size: u64,

    /// Number of chunks expected
    pub total_chunks: u64,

    /// Category of the target file
    pub category: FileCategory,

    /// Indices already present on disk (resume support)
    pub uploaded_chunks: Vec<u64>,
}

// ============================================================================
// Chunk Upload Types
// ============================================================================

/// Acknowledgement for a stored chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAck {
    /// Chunk index that was stored
    pub index: u64,

    /// Always "uploaded"
    pub status: String,
}

impl ChunkAck {
    pub fn uploaded(index: u64) -> Self {
        Self {
            index,
            status: "uploaded".to_string(),
        }
    }
}

// ============================================================================
// Artifact Types
// ============================================================================

/// A finished file on durable storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Filename relative to the destination
    pub filename: String,

    /// Absolute path of the file
    pub path: PathBuf,

    /// Size in bytes, read back from the written file
    pub size: u64,

    /// Category derived from the final filename
    pub category: FileCategory,
}

// ============================================================================
// Session Types
// ============================================================================

/// Upload session state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    /// Deterministic session ID
    pub id: String,

    /// Target filename, relative to the destination
    pub filename: String,

    /// Declared total size in bytes
    pub declared_size: u64,

    /// Chunk size used for this upload
    pub chunk_size: u64,

    /// Number of chunks expected
    pub total_chunks: u64,

    /// Destination directory
    pub destination: PathBuf,

    /// Category of the target file
    pub category: FileCategory,

    /// Current status
    pub status: SessionStatus,

    /// Session creation time
    pub created_at: DateTime<Utc>,

    /// Last chunk, finalize or initiate activity
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    /// Whether the session is still accepting chunks
    pub fn is_open(&self) -> bool {
        matches!(self.status, SessionStatus::Initiated | SessionStatus::Uploading)
    }

    /// Whether the session has been idle longer than `ttl`
    pub fn is_idle_for(&self, ttl: chrono::Duration) -> bool {
        Utc::now() - self.updated_at > ttl
    }

    /// Expected size of the chunk at `index`
    pub fn expected_chunk_len(&self, index: u64) -> u64 {
        if index + 1 < self.total_chunks {
            self.chunk_size
        } else {
            self.declared_size - self.chunk_size * (self.total_chunks - 1)
        }
    }

    /// Plan marker content: chunks are only reusable under the same id and chunk size
    pub fn plan_marker(&self) -> String {
        format!("{} {}", self.id, self.chunk_size)
    }

    pub fn descriptor(&self, uploaded_chunks: Vec<u64>) -> SessionDescriptor {
        SessionDescriptor {
            session_id: self.id.clone(),
            chunk_size: self.chunk_size,
            total_chunks: self.total_chunks,
            category: self.category,
            uploaded_chunks,
        }
    }
}

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, no chunk received yet
    Initiated,
    /// Receiving chunks
    Uploading,
    /// Assembly in progress
    Finalizing,
    /// File assembled and working set removed
    Complete,
}

/// Progress report for a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionProgress {
    pub session_id: String,
    pub filename: String,
    pub declared_size: u64,
    pub status: SessionStatus,
    pub total_chunks: u64,
    pub uploaded_chunks: Vec<u64>,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Invalid file type: unrecognized extension for {0}")]
    InvalidFileType(String),

    #[error("File too large for {category} category: {size} bytes (max: {max})")]
    FileTooLarge {
        category: FileCategory,
        size: u64,
        max: u64,
    },

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session mismatch: {0}")]
    SessionMismatch(String),

    #[error("Session busy: {0} is being finalized")]
    SessionBusy(String),

    #[error("Session already complete: {0}")]
    SessionComplete(String),

    #[error("Chunk index out of bounds: {index} (total: {total})")]
    ChunkIndexOutOfBounds { index: u64, total: u64 },

    #[error("Chunk {index} too large: {size} bytes (max: {max})")]
    ChunkTooLarge { index: u64, size: u64, max: u64 },

    #[error("Missing chunk: {index}")]
    MissingChunk { index: u64 },

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::InvalidFileType(_) => StatusCode::BAD_REQUEST,
            Self::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidFilename(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::SessionMismatch(_) => StatusCode::BAD_REQUEST,
            Self::SessionBusy(_) => StatusCode::CONFLICT,
            Self::SessionComplete(_) => StatusCode::CONFLICT,
            Self::ChunkIndexOutOfBounds { .. } => StatusCode::BAD_REQUEST,
            Self::ChunkTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::MissingChunk { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFileType(_) => "INVALID_TYPE",
            Self::FileTooLarge { .. } => "TOO_LARGE",
            Self::InvalidFilename(_) => "INVALID_FILENAME",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::SessionMismatch(_) => "SESSION_MISMATCH",
            Self::SessionBusy(_) => "SESSION_BUSY",
            Self::SessionComplete(_) => "SESSION_COMPLETE",
            Self::ChunkIndexOutOfBounds { .. } => "CHUNK_INDEX_OUT_OF_BOUNDS",
            Self::ChunkTooLarge { .. } => "CHUNK_TOO_LARGE",
            Self::MissingChunk { .. } => "MISSING_CHUNK",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Io(_) => "STORAGE_ERROR",
        }
    }

    /// Whether the client can fix the condition and retry
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Result alias for upload operations
pub type UploadResult<T> = Result<T, UploadError>;
