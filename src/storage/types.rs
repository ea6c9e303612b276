//! Storage types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::upload::FileCategory;

/// Metadata about a finished project file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    /// File name without directories
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Path relative to the upload root, `/` separated
    pub path: String,
    pub category: FileCategory,
}
