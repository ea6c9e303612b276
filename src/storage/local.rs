//! Local filesystem storage for project directories

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use uuid::Uuid;

use super::paths::safe_relative_path;
use super::types::FileInfo;
use crate::upload::{FileCategory, CHUNKS_DIR};

/// Project directories below a single upload root
#[derive(Debug, Clone)]
pub struct ProjectStorage {
    root: PathBuf,
}

impl ProjectStorage {
    /// Open the upload root, creating it if needed
    pub async fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        tracing::info!(root = %root.display(), "Opened project storage");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage path for a new project, relative to the root
    pub fn new_storage_path() -> String {
        format!("projects/{}", Uuid::new_v4())
    }

    /// Directory of a project from its stored relative path
    pub fn project_dir(&self, storage_path: &str) -> Option<PathBuf> {
        safe_relative_path(storage_path).map(|relative| self.root.join(relative))
    }

    /// Create a project directory
    pub async fn create_project_dir(&self, storage_path: &str) -> std::io::Result<PathBuf> {
        let dir = self.project_dir(storage_path).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid storage path: {}", storage_path),
            )
        })?;
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Path of `path` relative to the root, `/` separated
    pub fn relative_to_root(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// All finished files below `dir`, sorted by path
    ///
    /// `.chunks` directories are never descended into. A missing directory
    /// lists as empty.
    pub async fn list_files(&self, dir: &Path) -> std::io::Result<Vec<FileInfo>> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();

                if file_type.is_dir() {
                    if entry.file_name() != CHUNKS_DIR {
                        pending.push(path);
                    }
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                let metadata = entry.metadata().await?;
                let name = entry.file_name().to_string_lossy().into_owned();
                let category = Path::new(&name)
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .and_then(FileCategory::from_extension)
                    .unwrap_or(FileCategory::Unknown);

                files.push(FileInfo {
                    category,
                    size: metadata.len(),
                    modified: DateTime::<Utc>::from(metadata.modified()?),
                    path: self.relative_to_root(&path),
                    name,
                });
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }
}
