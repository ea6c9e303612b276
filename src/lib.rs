//! Depot Server Library
//!
//! Self-hosted project file host with resumable uploads of files up to 10GB.
//! The server binary is in main.rs.
//!
//! # Modules
//!
//! - `upload`: Classification, chunk storage, sessions, assembly and streaming
//! - `storage`: Project directories below the upload root
//! - `db`: Users, projects and permissions
//! - `auth`: Bearer tokens and password hashes
//! - `routes`: HTTP and JSON-RPC surfaces

pub mod access;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;
