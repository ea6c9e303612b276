//! Assembler
//!
//! Concatenates a working set's chunks in index order into the final file.
//! The output is written to a temporary file inside the working set and only
//! renamed onto the final path once every chunk has been copied and synced.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::chunk_store::ChunkStore;
use super::types::{UploadError, UploadResult};

/// Reassembles chunks from a [`ChunkStore`]
#[derive(Debug, Clone, Copy)]
pub struct Assembler<'a> {
    store: &'a ChunkStore,
}

impl<'a> Assembler<'a> {
    pub fn new(store: &'a ChunkStore) -> Self {
        Self { store }
    }

    /// Smallest index in `0..total_chunks` with no stored chunk
    pub async fn first_missing(
        &self,
        destination: &Path,
        filename: &str,
        total_chunks: u64,
    ) -> Option<u64> {
        for index in 0..total_chunks {
            if !self.store.has_chunk(destination, filename, index).await {
                return Some(index);
            }
        }
        None
    }

    /// Copy chunks `0..total_chunks` into `sink` in ascending order
    ///
    /// Fails with `MissingChunk` before writing anything if a chunk is absent.
    pub async fn write_chunks<W>(
        &self,
        destination: &Path,
        filename: &str,
        total_chunks: u64,
        sink: &mut W,
    ) -> UploadResult<u64>
    where
        W: AsyncWrite + Unpin,
    {
        if let Some(index) = self.first_missing(destination, filename, total_chunks).await {
            return Err(UploadError::MissingChunk { index });
        }

        let mut written = 0u64;
        for index in 0..total_chunks {
            let mut chunk = self.store.open_chunk(destination, filename, index).await?;
            written += tokio::io::copy(&mut chunk, sink).await?;
        }
        sink.flush().await?;

        Ok(written)
    }

    /// Assemble the working set into `<destination>/<filename>`
    ///
    /// On success the working set is cleared and the size of the written
    /// file is returned. On failure the temporary file is removed and the
    /// chunks are left untouched.
    pub async fn assemble(
        &self,
        destination: &Path,
        filename: &str,
        total_chunks: u64,
    ) -> UploadResult<(PathBuf, u64)> {
        if let Some(index) = self.first_missing(destination, filename, total_chunks).await {
            return Err(UploadError::MissingChunk { index });
        }

        let final_path = destination.join(filename);
        let (temp_path, mut temp_file) =
            self.store.create_temp(destination, filename, "assembly").await?;

        let result = async {
            let written = self
                .write_chunks(destination, filename, total_chunks, &mut temp_file)
                .await?;
            temp_file.sync_all().await?;
            drop(temp_file);

            if let Some(parent) = final_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::rename(&temp_path, &final_path).await?;
            Ok::<u64, UploadError>(written)
        }
        .await;

        let written = match result {
            Ok(written) => written,
            Err(e) => {
                self.store.release_temp(destination, filename, &temp_path).await;
                tracing::error!(
                    destination = %destination.display(),
                    filename = %filename,
                    error = %e,
                    "Assembly failed"
                );
                return Err(e);
            }
        };

        self.store.clear(destination, filename).await?;

        let size = fs::metadata(&final_path).await?.len();
        tracing::info!(
            path = %final_path.display(),
            total_chunks = total_chunks,
            size = size,
            "Assembled file"
        );
        debug_assert_eq!(size, written);

        Ok((final_path, size))
    }
}
