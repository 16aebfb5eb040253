//! # Handler Registry
//!
//! Priority-ordered resolution of paths to engines.
//!
//! ## Resolution order
//!
//! ```text
//! create(path)
//!   ├─ custom handlers, newest registration first   (skipped without locking
//!   │                                                 when none are registered)
//!   ├─ fallback resolver (e.g. embedded resources)
//!   └─ NativeEngine
//! ```
//!
//! ## Lifecycle
//!
//! A registry is `Active` until [`EngineRegistry::shutdown`] (or drop) moves
//! it to `ShuttingDown`. That transition is one-way: the handler list is
//! emptied and later unregistrations are silent no-ops.
//!
//! ## Locking
//!
//! Lookups take a recursive shared lock, so a handler may itself resolve
//! paths through the same registry. Registration and unregistration take the
//! exclusive lock. Handlers must not register or drop registrations from
//! inside [`EngineHandler::create`].

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};

use parking_lot::RwLock;

use crate::native::{NativeEngine, TemporaryEngine};
use crate::{EngineHandler, EntryInfo, FileEngine, FileFlags};

static GLOBAL: LazyLock<EngineRegistry> = LazyLock::new(EngineRegistry::new);

/// Lifecycle state of an [`EngineRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    /// Accepting registrations and lookups.
    Active,
    /// Torn down; the handler list is gone.
    ShuttingDown,
}

struct HandlerEntry {
    id: u64,
    handler: Arc<dyn EngineHandler>,
}

#[derive(Default)]
struct HandlerList {
    // Newest first.
    entries: Vec<HandlerEntry>,
    shut_down: bool,
}

struct Shared {
    handlers: RwLock<HandlerList>,
    // Fast path: lets lookups skip the lock when no handler is registered.
    in_use: AtomicBool,
    fallback: RwLock<Option<Arc<dyn EngineHandler>>>,
    next_id: AtomicU64,
}

impl Shared {
    fn create_custom(&self, path: &Path) -> Option<Box<dyn FileEngine>> {
        if !self.in_use.load(Ordering::Acquire) {
            return None;
        }
        let list = self.handlers.read_recursive();
        list.entries.iter().find_map(|entry| {
            let engine = entry.handler.create(path)?;
            tracing::trace!(handler_id = entry.id, path = %path.display(), "handler claimed path");
            Some(engine)
        })
    }

    fn create(&self, path: &Path) -> Box<dyn FileEngine> {
        if let Some(engine) = self.create_custom(path) {
            return engine;
        }
        let fallback = self.fallback.read_recursive().clone();
        if let Some(engine) = fallback.and_then(|resolver| resolver.create(path)) {
            return engine;
        }
        Box::new(NativeEngine::new(path))
    }

    fn entry_info(&self, path: &Path) -> EntryInfo {
        entry_info_from(path, &*self.create(path))
    }

    fn unregister(&self, id: u64) {
        let mut list = self.handlers.write();
        if list.shut_down {
            return;
        }
        list.entries.retain(|entry| entry.id != id);
        if list.entries.is_empty() {
            self.in_use.store(false, Ordering::Release);
        }
        tracing::debug!(
            handler_id = id,
            remaining = list.entries.len(),
            "unregistered file engine handler"
        );
    }
}

/// A process-wide (or scoped) list of [`EngineHandler`]s.
///
/// # Example
///
/// ```rust
/// use anyfs_engine::{EngineRegistry, MemoryHandler};
/// use std::path::Path;
///
/// let registry = EngineRegistry::new();
/// let resources = MemoryHandler::read_only(":/");
/// resources.insert(":/greeting.txt", b"hello".to_vec());
///
/// let registration = registry.register(resources);
/// let engine = registry.create(Path::new(":/greeting.txt"));
/// assert_eq!(engine.size(), 5);
///
/// drop(registration);
/// assert_eq!(registry.handler_count(), 0);
/// ```
pub struct EngineRegistry {
    shared: Arc<Shared>,
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("state", &self.state())
            .field("handlers", &self.handler_count())
            .finish()
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineRegistry {
    /// Create an empty, active registry.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                handlers: RwLock::new(HandlerList::default()),
                in_use: AtomicBool::new(false),
                fallback: RwLock::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// The process-wide registry.
    ///
    /// Created on first use. Call [`shutdown`](Self::shutdown) before process
    /// exit to tear it down deterministically.
    pub fn global() -> &'static EngineRegistry {
        &GLOBAL
    }

    /// Register `handler` ahead of every handler registered before it.
    ///
    /// The handler stays registered until the returned guard is dropped.
    pub fn register(&self, handler: impl EngineHandler + 'static) -> HandlerRegistration {
        self.register_arc(Arc::new(handler))
    }

    /// Like [`register`](Self::register) for an already shared handler.
    pub fn register_arc(&self, handler: Arc<dyn EngineHandler>) -> HandlerRegistration {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let mut list = self.shared.handlers.write();
        if list.shut_down {
            tracing::warn!(handler_id = id, "handler registered after registry shutdown, ignoring");
            return HandlerRegistration {
                id,
                registry: Weak::new(),
            };
        }
        list.entries.insert(0, HandlerEntry { id, handler });
        self.shared.in_use.store(true, Ordering::Release);
        tracing::debug!(
            handler_id = id,
            handlers = list.entries.len(),
            "registered file engine handler"
        );
        HandlerRegistration {
            id,
            registry: Arc::downgrade(&self.shared),
        }
    }

    /// Install (or clear) the resolver consulted after custom handlers and
    /// before the native backend.
    pub fn set_fallback_resolver(&self, resolver: Option<Arc<dyn EngineHandler>>) {
        *self.shared.fallback.write() = resolver;
    }

    /// Tear the registry down.
    ///
    /// Drops every handler and moves to [`RegistryState::ShuttingDown`].
    /// Registrations dropped afterwards do nothing.
    pub fn shutdown(&self) {
        let mut list = self.shared.handlers.write();
        if list.shut_down {
            return;
        }
        list.shut_down = true;
        list.entries.clear();
        self.shared.in_use.store(false, Ordering::Release);
        tracing::debug!("file engine registry shut down");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RegistryState {
        if self.shared.handlers.read_recursive().shut_down {
            RegistryState::ShuttingDown
        } else {
            RegistryState::Active
        }
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.shared.handlers.read_recursive().entries.len()
    }

    /// Ask the custom handlers, newest first, for an engine.
    pub fn create_custom(&self, path: &Path) -> Option<Box<dyn FileEngine>> {
        self.shared.create_custom(path)
    }

    /// Resolve `path` to an engine.
    ///
    /// Never fails: when no handler claims the path the native backend is
    /// used.
    pub fn create(&self, path: &Path) -> Box<dyn FileEngine> {
        self.shared.create(path)
    }

    /// Resolve an unopened staging engine for an atomic save to `final_path`.
    ///
    /// Follows the same order as [`create`](Self::create), using
    /// [`EngineHandler::create_staging`], and falls back to a native
    /// [`TemporaryEngine`].
    pub fn create_staging(&self, final_path: &Path) -> Box<dyn FileEngine> {
        if self.shared.in_use.load(Ordering::Acquire) {
            let list = self.shared.handlers.read_recursive();
            if let Some(engine) = list
                .entries
                .iter()
                .find_map(|entry| entry.handler.create_staging(final_path))
            {
                return engine;
            }
        }
        let fallback = self.shared.fallback.read_recursive().clone();
        if let Some(engine) = fallback.and_then(|resolver| resolver.create_staging(final_path)) {
            return engine;
        }
        Box::new(TemporaryEngine::new(final_path))
    }

    /// Look `path` up through its engine.
    pub fn entry_info(&self, path: &Path) -> EntryInfo {
        self.shared.entry_info(path)
    }

    /// A non-owning handle that resolves through this registry.
    ///
    /// Custom iterators hand it to
    /// [`IteratorState::with_registry`](crate::IteratorState::with_registry)
    /// so entry info comes from the same handlers that listed the directory.
    pub fn downgrade(&self) -> RegistryRef {
        RegistryRef {
            shared: Arc::downgrade(&self.shared),
        }
    }
}

impl Drop for EngineRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn entry_info_from(path: &Path, engine: &dyn FileEngine) -> EntryInfo {
    EntryInfo {
        name: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: path.to_path_buf(),
        flags: engine.file_flags(FileFlags::ALL),
        size: engine.size(),
    }
}

/// Weak handle to an [`EngineRegistry`], made by
/// [`EngineRegistry::downgrade`].
///
/// Once the registry is gone, lookups go straight to the native backend.
#[derive(Clone)]
pub struct RegistryRef {
    shared: Weak<Shared>,
}

impl RegistryRef {
    /// Look `path` up through the registry, or natively if it is gone.
    pub fn entry_info(&self, path: &Path) -> EntryInfo {
        match self.shared.upgrade() {
            Some(shared) => shared.entry_info(path),
            None => entry_info_from(path, &NativeEngine::new(path)),
        }
    }

    /// Returns `true` while the registry still exists.
    pub fn is_alive(&self) -> bool {
        self.shared.strong_count() > 0
    }
}

impl fmt::Debug for RegistryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryRef")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Keeps a handler registered; dropping it unregisters the handler.
///
/// The guard may outlive its registry. Once the registry is shut down or
/// gone, dropping the guard does nothing.
#[must_use = "dropping the registration unregisters the handler immediately"]
pub struct HandlerRegistration {
    id: u64,
    registry: Weak<Shared>,
}

impl HandlerRegistration {
    /// Identity of this registration within its registry.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for HandlerRegistration {
    fn drop(&mut self) {
        if let Some(shared) = self.registry.upgrade() {
            shared.unregister(self.id);
        }
    }
}
