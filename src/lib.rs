//! # anyfs-engine
//!
//! Pluggable file engines, a process-wide handler registry, and crash-safe
//! atomic saves.
//!
//! Every path is served by a [`FileEngine`]. An [`EngineRegistry`] decides
//! which engine: custom [`EngineHandler`]s get the first chance, then an
//! optional fallback resolver, then the host filesystem through
//! [`NativeEngine`]. [`SaveFile`] builds on that to replace a file's content
//! all at once or not at all.
//!
//! ---
//!
//! ## Quick Start
//!
//! ```rust
//! use anyfs_engine::{OpenMode, SaveFile};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("config.toml");
//!
//! let mut file = SaveFile::new(&path);
//! file.open(OpenMode::WRITE_ONLY).unwrap();
//! file.write(b"answer = 42\n").unwrap();
//! file.commit().unwrap();
//!
//! assert_eq!(std::fs::read_to_string(&path).unwrap(), "answer = 42\n");
//! ```
//!
//! Serving a virtual tree from memory:
//!
//! ```rust
//! use anyfs_engine::{DirFilters, EngineRegistry, MemoryHandler};
//! use std::path::Path;
//!
//! let registry = EngineRegistry::new();
//! let resources = MemoryHandler::read_only(":/");
//! resources.insert(":/i18n/en.json", b"{}".to_vec());
//! resources.insert(":/i18n/de.json", b"{}".to_vec());
//! let _registration = registry.register(resources);
//!
//! let dir = registry.create(Path::new(":/i18n"));
//! assert_eq!(dir.entry_list(DirFilters::FILES, &[]), ["de.json", "en.json"]);
//! ```
//!
//! ---
//!
//! ## Core Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`FileEngine`] | File and directory operations for one storage medium |
//! | [`EngineIterator`] | Lazy, single-pass directory cursor |
//! | [`EngineHandler`] | Factory claiming paths for an engine |
//! | [`EngineRegistry`] | Priority-ordered handler list, resolves paths to engines |
//! | [`SaveFile`] | Atomic replace of one destination file |
//! | [`EngineError`] | Error type with context; [`FileError`] is its kind |
//! | [`ExtensionRequest`] / [`ExtensionResponse`] | Optional capabilities |
//!
//! ## Backends
//!
//! | Engine | Medium |
//! |--------|--------|
//! | [`NativeEngine`] | Host filesystem through `std::fs` |
//! | [`TemporaryEngine`] | Staging file beside a destination |
//! | [`MemoryEngine`] | In-memory store behind a [`MemoryHandler`] |
//!
//! ---
//!
//! ## Error Handling
//!
//! Recoverable failures return `Result<T, EngineError>`. Every error carries a
//! [`FileError`] kind and a message:
//!
//! ```rust
//! use anyfs_engine::{EngineError, FileError};
//! use std::path::PathBuf;
//!
//! let err = EngineError::IsADirectory { path: PathBuf::from("/etc") };
//! assert_eq!(err.kind(), FileError::Write);
//! assert_eq!(err.message(), "filename refers to a directory: /etc");
//! ```
//!
//! Misusing a [`SaveFile`] (opening it twice, calling `close`, committing it
//! unopened) is a programming error and panics instead.
//!
//! Engine resolution never fails: a handler that declines a path just passes
//! it on.
//!
//! ---
//!
//! ## Thread Safety
//!
//! The registry is the only shared structure. Lookups take a shared lock and
//! run concurrently; registration takes the exclusive lock. Engines and save
//! sessions are single-owner: they are `Send` but not `Sync`, and every
//! state-changing method takes `&mut self`.
//!
//! ---
//!
//! ## Logging
//!
//! The crate emits [`tracing`](https://docs.rs/tracing) events (registration,
//! staging, commit and discard, degraded fallbacks) and never installs a
//! subscriber.
//!
//! ---
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `serde` | Enable serialization for [`EntryInfo`], [`FileFlags`], [`OpenMode`], [`Permissions`], etc. |

// Private modules
mod error;
mod extension;
mod memory;
mod native;
mod registry;
mod save_file;
mod traits;
mod types;

// Public re-exports - error types
pub use error::{EngineError, FileError};

// Public re-exports - core types
pub use types::{
    DirFilters, EntryInfo, FileFlags, FileName, FileOwner, FileTime, FileType, OpenMode,
    Permissions,
};

// Public re-exports - extension protocol
pub use extension::{
    Extension, ExtensionRequest, ExtensionResponse, MapOptions, MappedRegion, MemoryMapFlags,
};

// Public re-exports - traits
pub use traits::{EngineHandler, EngineIterator, FileEngine, IteratorState};

// Public re-exports - registry
pub use registry::{EngineRegistry, HandlerRegistration, RegistryRef, RegistryState};

// Public re-exports - backends
pub use memory::{MemoryEngine, MemoryHandler, MemoryIterator, MAX_MEMORY_FILE_SIZE};
pub use native::{NativeEngine, NativeIterator, TemporaryEngine};

// Public re-exports - atomic save
pub use save_file::{
    requires_direct_write, SaveFile, DEFAULT_MAX_SYMLINK_DEPTH, WRITE_BUFFER_SIZE,
};
