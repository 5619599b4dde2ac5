//! Backup Keeper Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error types, logging setup, and file checksums used by the
//! backup-keeper workspace members.
//!
//! - **Error Handling**: [`KeeperError`] and the [`Result`] alias
//! - **Logging**: environment-driven `tracing` subscriber setup
//! - **Checksums**: streaming SHA-256 of files on disk
//!
//! # Example
//!
//! ```no_run
//! use keeper_common::{checksum, Result};
//!
//! fn describe(path: &str) -> Result<()> {
//!     let digest = checksum::sha256_file(path)?;
//!     tracing::info!(%digest, "archive digest");
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{KeeperError, Result};
