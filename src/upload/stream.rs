//! Stream Reader
//!
//! Lazy block-wise reads of a finished file for downloads.

use std::path::Path;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use super::types::{UploadError, UploadResult};

/// Boxed stream of file blocks
pub type ByteStream = Pin<Box<dyn Stream<Item = UploadResult<Bytes>> + Send>>;

/// An opened file ready to be streamed
pub struct FileStream {
    /// Size of the file when it was opened
    pub size: u64,

    /// The blocks of the file
    pub stream: ByteStream,
}

/// Open `path` as a stream of blocks of `block_size` bytes
///
/// Every block except the last is exactly `block_size` bytes long. Fails with
/// `NotFound` if the path does not exist or is not a regular file.
pub async fn open_stream(path: &Path, block_size: usize) -> UploadResult<FileStream> {
    let not_found = || UploadError::NotFound(path.display().to_string());

    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_file() {
        return Err(not_found());
    }

    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(e.into()),
    };

    let block_size = block_size.max(1);
    let stream = futures::stream::try_unfold(Some(file), move |file| async move {
        let Some(mut file) = file else {
            return Ok::<_, UploadError>(None);
        };

        let block = read_block(&mut file, block_size).await?;
        if block.is_empty() {
            return Ok(None);
        }

        // A short block means end of file was reached
        let next = if block.len() == block_size { Some(file) } else { None };
        Ok(Some((block, next)))
    });

    Ok(FileStream {
        size: metadata.len(),
        stream: Box::pin(stream),
    })
}

/// Fill a block, looping over short reads until EOF
async fn read_block(file: &mut File, block_size: usize) -> UploadResult<Bytes> {
    let mut buf = BytesMut::zeroed(block_size);
    let mut filled = 0;

    while filled < block_size {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    buf.truncate(filled);
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    async fn collect(path: &Path, block_size: usize) -> Vec<Bytes> {
        open_stream(path, block_size)
            .await
            .unwrap()
            .stream
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_blocks_are_full_except_last() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.bin");
        let data: Vec<u8> = (0..10u8).collect();
        std::fs::write(&path, &data).unwrap();

        let blocks = collect(&path, 4).await;
        let sizes: Vec<usize> = blocks.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(blocks.concat(), data);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_empty_tail() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.bin");
        std::fs::write(&path, [7u8; 8]).unwrap();

        let blocks = collect(&path, 4).await;
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b.len() == 4));
    }

    #[tokio::test]
    async fn test_empty_file_yields_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.txt");
        std::fs::write(&path, b"").unwrap();

        let opened = open_stream(&path, 4).await.unwrap();
        assert_eq!(opened.size, 0);
        assert!(collect(&path, 4).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_path_and_directory_are_not_found() {
        let temp_dir = TempDir::new().unwrap();

        let missing = open_stream(&temp_dir.path().join("nope.txt"), 4).await;
        assert!(matches!(missing, Err(UploadError::NotFound(_))));

        let directory = open_stream(temp_dir.path(), 4).await;
        assert!(matches!(directory, Err(UploadError::NotFound(_))));
    }
}
