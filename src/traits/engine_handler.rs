//! Factories that claim paths and produce engines for them.

use std::path::Path;

use crate::FileEngine;

/// A factory that turns paths it recognizes into engines.
///
/// Handlers are registered with an [`EngineRegistry`](crate::EngineRegistry);
/// the most recently registered handler is asked first. Returning `None`
/// passes the path on to the next candidate, it is never an error.
///
/// # Thread Safety
///
/// Handlers are shared by every thread that resolves paths, so they must be
/// `Send + Sync`. Lookups may run concurrently.
///
/// # Example
///
/// ```rust
/// use anyfs_engine::{EngineHandler, FileEngine};
/// use std::path::Path;
///
/// struct NullEngine;
/// impl FileEngine for NullEngine {}
///
/// /// Claims every path under `null:`.
/// struct NullHandler;
///
/// impl EngineHandler for NullHandler {
///     fn create(&self, path: &Path) -> Option<Box<dyn FileEngine>> {
///         path.to_str()?
///             .starts_with("null:")
///             .then(|| Box::new(NullEngine) as Box<dyn FileEngine>)
///     }
/// }
///
/// assert!(NullHandler.create(Path::new("null:/x")).is_some());
/// assert!(NullHandler.create(Path::new("/etc/hosts")).is_none());
/// ```
pub trait EngineHandler: Send + Sync {
    /// Produce an engine bound to `path`, or `None` if the path is not ours.
    fn create(&self, path: &Path) -> Option<Box<dyn FileEngine>>;

    /// Produce an unopened staging engine for an atomic save to `final_path`.
    ///
    /// The staging engine creates a uniquely named file beside `final_path`
    /// when opened, and later replaces `final_path` through
    /// [`rename_overwrite`](FileEngine::rename_overwrite). The default
    /// declines, leaving staging to the native backend.
    fn create_staging(&self, final_path: &Path) -> Option<Box<dyn FileEngine>> {
        let _ = final_path;
        None
    }
}
