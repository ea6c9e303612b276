//! Chunked Upload Engine
//!
//! Reliable uploads of project files up to 10GB:
//! - Extension based classification with per-category size ceilings
//! - Fixed-size chunks stored independently, in any order
//! - Deterministic reassembly into the final file
//!
//! Protocol Flow:
//! 1. Client initiates with filename and size, receives the chunk plan
//! 2. Client uploads chunks (resuming with the indices already present)
//! 3. Client finalizes; chunks are concatenated in index order
//! 4. The finished file is served through block-wise streaming reads

pub mod assembler;
pub mod chunk_store;
pub mod classifier;
pub mod locks;
pub mod service;
pub mod session;
pub mod stream;
pub mod sweeper;
pub mod types;

pub use assembler::Assembler;
pub use chunk_store::{ChunkStore, WorkingSet};
pub use classifier::{Classification, FileCategory, FileClassifier, ValidationFailure};
pub use locks::KeyedLocks;
pub use service::{total_chunks, UploadService, UploadSettings};
pub use session::{derive_session_id, SessionManager};
pub use stream::{open_stream, ByteStream, FileStream};
pub use sweeper::{Destinations, SweepReport, Sweeper};
pub use types::*;
