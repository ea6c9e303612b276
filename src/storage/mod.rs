//! Storage module for project files on the local filesystem
//!
//! Each project owns a directory below the upload root. Finished files live
//! directly in it; chunk working sets live under its `.chunks` directory.

pub mod local;
pub mod paths;
mod types;

pub use local::ProjectStorage;
pub use paths::{normalize_filename, safe_relative_path};
pub use types::*;
