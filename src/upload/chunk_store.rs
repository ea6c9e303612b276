//! Chunk Store
//!
//! Filesystem storage for uploaded chunks before assembly. Chunks for a
//! target live in its working set:
//!
//! ```text
//! <destination>/.chunks/<filename>/chunk_NNNNNNNN
//! ```
//!
//! The directory tree is the only record of which chunks exist. Callers check
//! indices explicitly; nothing here depends on directory listing order. A
//! `.plan` file next to the chunks names the upload plan they were cut for.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::types::{UploadError, UploadResult, CHUNKS_DIR, CHUNK_FILE_PREFIX, PLAN_MARKER};

// ============================================================================
// Working Sets
// ============================================================================

/// A chunk working set found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingSet {
    /// Destination directory owning the `.chunks` tree
    pub destination: PathBuf,

    /// Target filename, `/` separated
    pub filename: String,

    /// Number of files in the working set
    pub file_count: usize,

    /// Most recent write to any file in the set
    pub last_modified: DateTime<Utc>,
}

// ============================================================================
// Chunk Store
// ============================================================================

/// Filesystem chunk store keyed by (destination, filename, index)
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkStore;

impl ChunkStore {
    pub fn new() -> Self {
        Self
    }

    /// Directory holding the chunks of one target
    pub fn working_set_dir(&self, destination: &Path, filename: &str) -> PathBuf {
        destination.join(CHUNKS_DIR).join(filename)
    }

    /// Path of a single chunk
    pub fn chunk_path(&self, destination: &Path, filename: &str, index: u64) -> PathBuf {
        self.working_set_dir(destination, filename)
            .join(chunk_file_name(index))
    }

    /// Store a chunk, replacing any chunk already stored at `index`
    ///
    /// The bytes go to a temporary file that is renamed into place, so a
    /// chunk name never refers to a partially written chunk.
    pub async fn save_chunk(
        &self,
        destination: &Path,
        filename: &str,
        index: u64,
        data: &[u8],
    ) -> UploadResult<u64> {
        let dir = self.working_set_dir(destination, filename);
        fs::create_dir_all(&dir).await?;

        let path = dir.join(chunk_file_name(index));
        let tmp = dir.join(format!(
            ".{}.{}.tmp",
            chunk_file_name(index),
            Uuid::new_v4().simple()
        ));

        let written = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            tracing::error!(
                path = %path.display(),
                chunk_index = index,
                error = %e,
                "Failed to store chunk"
            );
            return Err(e.into());
        }

        tracing::debug!(
            destination = %destination.display(),
            filename = %filename,
            chunk_index = index,
            size = data.len(),
            "Stored chunk"
        );

        Ok(data.len() as u64)
    }

    /// Check whether a chunk is present
    pub async fn has_chunk(&self, destination: &Path, filename: &str, index: u64) -> bool {
        fs::metadata(self.chunk_path(destination, filename, index))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    /// Size of a stored chunk, if present
    pub async fn chunk_len(&self, destination: &Path, filename: &str, index: u64) -> Option<u64> {
        fs::metadata(self.chunk_path(destination, filename, index))
            .await
            .ok()
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
    }

    /// Read a whole chunk into memory
    pub async fn read_chunk(
        &self,
        destination: &Path,
        filename: &str,
        index: u64,
    ) -> UploadResult<Vec<u8>> {
        fs::read(self.chunk_path(destination, filename, index))
            .await
            .map_err(|e| missing_or_io(e, index))
    }

    /// Open a chunk for streaming reads
    pub async fn open_chunk(
        &self,
        destination: &Path,
        filename: &str,
        index: u64,
    ) -> UploadResult<fs::File> {
        fs::File::open(self.chunk_path(destination, filename, index))
            .await
            .map_err(|e| missing_or_io(e, index))
    }

    /// Indices in `0..total` that are present, checked one by one
    pub async fn uploaded_indices(&self, destination: &Path, filename: &str, total: u64) -> Vec<u64> {
        let mut present = Vec::new();
        for index in 0..total {
            if self.has_chunk(destination, filename, index).await {
                present.push(index);
            }
        }
        present
    }

    /// Plan recorded for a working set, if any
    pub async fn read_plan(
        &self,
        destination: &Path,
        filename: &str,
    ) -> UploadResult<Option<String>> {
        let path = self.working_set_dir(destination, filename).join(PLAN_MARKER);
        match fs::read_to_string(&path).await {
            Ok(plan) => Ok(Some(plan.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Record the plan a working set belongs to
    pub async fn write_plan(
        &self,
        destination: &Path,
        filename: &str,
        plan: &str,
    ) -> UploadResult<()> {
        let dir = self.working_set_dir(destination, filename);
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join(PLAN_MARKER), plan.as_bytes()).await?;
        Ok(())
    }

    /// Create a temporary file inside the working set of `filename`
    ///
    /// Used for assembly and direct uploads so the final file only appears
    /// through a rename on the same filesystem.
    pub async fn create_temp(
        &self,
        destination: &Path,
        filename: &str,
        purpose: &str,
    ) -> UploadResult<(PathBuf, fs::File)> {
        let dir = self.working_set_dir(destination, filename);
        fs::create_dir_all(&dir).await?;

        let path = dir.join(format!(".{}-{}.tmp", purpose, Uuid::new_v4().simple()));
        let file = fs::File::create(&path).await?;
        Ok((path, file))
    }

    /// Remove a temporary file and any working set directories left empty
    pub async fn release_temp(&self, destination: &Path, filename: &str, temp: &Path) {
        if let Err(e) = fs::remove_file(temp).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %temp.display(), error = %e, "Failed to remove temporary file");
            }
        }
        self.prune_empty_dirs(destination, filename).await;
    }

    /// Remove the working set of a target
    ///
    /// Idempotent. Only files are removed; subdirectories belonging to other
    /// targets (nested filenames) are left in place.
    pub async fn clear(&self, destination: &Path, filename: &str) -> UploadResult<usize> {
        let dir = self.working_set_dir(destination, filename);

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.prune_empty_dirs(destination, filename).await;

        tracing::debug!(
            destination = %destination.display(),
            filename = %filename,
            removed = removed,
            "Cleared chunk working set"
        );

        Ok(removed)
    }

    /// Remove empty directories from the working set up to `.chunks`
    async fn prune_empty_dirs(&self, destination: &Path, filename: &str) {
        let chunks_root = destination.join(CHUNKS_DIR);
        let dir = self.working_set_dir(destination, filename);

        let mut current = Some(dir.as_path());
        while let Some(path) = current {
            if !path.starts_with(&chunks_root) || fs::remove_dir(path).await.is_err() {
                break;
            }
            if path == chunks_root {
                break;
            }
            current = path.parent();
        }
    }

    /// Every working set of the given destinations
    ///
    /// Only each destination's `.chunks` tree is read; each directory in it
    /// that directly contains files is a working set.
    pub async fn list_working_sets(
        &self,
        destinations: &[PathBuf],
    ) -> UploadResult<Vec<WorkingSet>> {
        let mut sets = Vec::new();
        for destination in destinations {
            collect_working_sets(destination, &destination.join(CHUNKS_DIR), &mut sets).await?;
        }

        sets.sort_by(|a, b| {
            a.destination
                .cmp(&b.destination)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(sets)
    }

    /// Working sets whose last write is older than `age`
    pub async fn stale_working_sets(
        &self,
        destinations: &[PathBuf],
        age: chrono::Duration,
    ) -> UploadResult<Vec<WorkingSet>> {
        let cutoff = Utc::now() - age;
        let sets = self.list_working_sets(destinations).await?;
        Ok(sets
            .into_iter()
            .filter(|set| set.last_modified < cutoff)
            .collect())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// On-disk name of a chunk; zero padding keeps lexical and numeric order equal
pub fn chunk_file_name(index: u64) -> String {
    format!("{}{:08}", CHUNK_FILE_PREFIX, index)
}

fn missing_or_io(e: std::io::Error, index: u64) -> UploadError {
    if e.kind() == std::io::ErrorKind::NotFound {
        UploadError::MissingChunk { index }
    } else {
        UploadError::Io(e)
    }
}

async fn collect_working_sets(
    destination: &Path,
    chunks_root: &Path,
    sets: &mut Vec<WorkingSet>,
) -> UploadResult<()> {
    let mut pending = vec![chunks_root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        let mut file_count = 0;
        let mut newest: Option<SystemTime> = None;

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                file_count += 1;
                let modified = entry.metadata().await?.modified()?;
                newest = Some(newest.map_or(modified, |n| n.max(modified)));
            }
        }

        let Some(newest) = newest else { continue };
        let Ok(relative) = dir.strip_prefix(chunks_root) else { continue };
        let filename: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if filename.is_empty() {
            continue;
        }

        sets.push(WorkingSet {
            destination: destination.to_path_buf(),
            filename: filename.join("/"),
            file_count,
            last_modified: DateTime::<Utc>::from(newest),
        });
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
