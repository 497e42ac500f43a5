//! # dirdb storage
//!
//! Storage abstractions beneath the dirdb log and transaction kernel.
//!
//! Two seams are defined here:
//!
//! - [`StorageBackend`] - an opaque append-only byte store. Backends know
//!   nothing about record framing; the kernel owns all format
//!   interpretation.
//! - [`FileSet`] - a set of monotonically numbered append-only files, the
//!   shape of a rotating write-ahead log on disk.
//!
//! Both come in a file-based flavor for persistence and an in-memory flavor
//! for tests and crash simulation.
//!
//! ## Example
//!
//! ```rust
//! use dirdb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod fileset;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::{DirectoryFileSet, FileBackend};
pub use fileset::FileSet;
pub use memory::{InMemoryBackend, InMemoryFileSet};
