//! # Engine Traits
//!
//! The seams a storage medium plugs into.
//!
//! | Trait | Role | Implemented by |
//! |-------|------|----------------|
//! | [`FileEngine`] | File and directory operations on one bound path | [`NativeEngine`](crate::NativeEngine), [`MemoryEngine`](crate::MemoryEngine), [`TemporaryEngine`](crate::TemporaryEngine) |
//! | [`EngineIterator`] | Lazy cursor over one directory | [`NativeIterator`](crate::NativeIterator), [`MemoryIterator`](crate::MemoryIterator) |
//! | [`EngineHandler`] | Claims paths and produces engines for them | [`MemoryHandler`](crate::MemoryHandler) |
//!
//! All three are object safe and are used as `Box<dyn _>` / `Arc<dyn _>`.

mod engine_handler;
mod engine_iterator;
mod file_engine;

pub use engine_handler::EngineHandler;
pub use engine_iterator::{EngineIterator, IteratorState};
pub use file_engine::FileEngine;
