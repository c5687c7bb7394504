//! # Rules File Lock
//!
//! Cooperative (advisory) locks on local filter-list files, with SHA-256 content hashes taken
//! under the lock so callers can tell whether a file changed while they were reading it.
//!
//! ```text
//! acquire_read / acquire_write
//!     │
//!     ├──> non-blocking try (shared | exclusive)
//!     │      └─> retry every poll interval until the timeout
//!     │
//!     ├──> optional content hash (under the lock)
//!     │
//!     └──> LockHandle ──> release (idempotent) ──> ReleaseReport
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use rules_filelock::LockManager;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> rules_filelock::Result<()> {
//!     let locks = LockManager::new();
//!     let handle = locks
//!         .acquire_read("filters/local.txt", true, Duration::from_secs(30))
//!         .await?;
//!
//!     // ... read the file ...
//!
//!     if let Some(report) = locks.release(&handle).await? {
//!         assert!(!report.was_modified);
//!     }
//!     Ok(())
//! }
//! ```

mod backend;
mod error;
mod hash;
mod manager;

pub use backend::{platform_backend, FileLock, Fs2Backend};
#[cfg(unix)]
pub use backend::FlockBackend;
pub use error::{LockError, Result};
pub use hash::{compute_file_hash, hex_encode_lower, short_hash, verify_integrity};
pub use manager::{LockHandle, LockManager, LockMode, ReleaseReport};
