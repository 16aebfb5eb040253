//! # Atomic Save Session
//!
//! [`SaveFile`] writes a whole file so that readers of the destination see
//! either the old content or the complete new content, never a mix.
//!
//! ## Lifecycle
//!
//! ```text
//! SaveFile::new(path)
//!   └─ open(mode)          creates a staging file beside the destination
//!        ├─ write(..)*     writes go to the staging file
//!        ├─ cancel()       optional, makes the next commit discard
//!        └─ commit(self)   rename-overwrite onto the destination, or discard
//! ```
//!
//! Dropping an open session discards the staging file.
//!
//! ## Direct writes
//!
//! Some destinations cannot be replaced by a rename (alternate data streams,
//! `content://` URIs), and a read-only directory forbids creating the staging
//! file. With [`set_direct_write_fallback(true)`](SaveFile::set_direct_write_fallback)
//! the session then writes the destination in place. That mode gives up both
//! atomicity and [`cancel`](SaveFile::cancel): a failure part way through
//! leaves a partially written destination.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::{EngineError, EngineRegistry, FileEngine, FileError, FileFlags, FileName, OpenMode, Permissions};

/// Size of the write buffer used unless the session is opened
/// [`UNBUFFERED`](OpenMode::UNBUFFERED).
pub const WRITE_BUFFER_SIZE: usize = 16 * 1024;

/// Default bound on symlink hops while resolving the destination.
pub const DEFAULT_MAX_SYMLINK_DEPTH: usize = 128;

/// Returns `true` if `path` names a destination that cannot be replaced by a
/// rename and has to be written in place.
///
/// That is the case for `content://` URIs and, on Windows, for NTFS
/// alternate data streams (`file.txt:stream`).
///
/// ```rust
/// use anyfs_engine::requires_direct_write;
/// use std::path::Path;
///
/// assert!(requires_direct_write(Path::new("content://media/doc/1")));
/// assert!(!requires_direct_write(Path::new("/tmp/file.txt")));
/// ```
pub fn requires_direct_write(path: &Path) -> bool {
    let text = path.to_string_lossy();
    if text.starts_with("content://") {
        return true;
    }
    cfg!(windows) && text.char_indices().any(|(i, c)| c == ':' && i > 1)
}

/// A crash-safe, all-or-nothing writer for one destination file.
///
/// # Example
///
/// ```rust
/// use anyfs_engine::{OpenMode, SaveFile};
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("settings.ini");
/// std::fs::write(&path, "old").unwrap();
///
/// let mut file = SaveFile::new(&path);
/// file.open(OpenMode::WRITE_ONLY).unwrap();
/// file.write(b"new").unwrap();
///
/// // Until commit the destination is untouched.
/// assert_eq!(std::fs::read_to_string(&path).unwrap(), "old");
/// file.commit().unwrap();
/// assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
/// ```
///
/// # Panics
///
/// Misuse is a programming error and panics: opening an open session,
/// calling [`close`](Self::close), committing a session that is not open, or
/// renaming an open session.
pub struct SaveFile<'r> {
    registry: &'r EngineRegistry,
    file_name: PathBuf,
    final_file_name: PathBuf,
    engine: Option<Box<dyn FileEngine>>,
    mode: OpenMode,
    buffer: Vec<u8>,
    write_error: Option<EngineError>,
    error: Option<EngineError>,
    use_temporary: bool,
    direct_write_fallback: bool,
    max_symlink_depth: usize,
}

impl SaveFile<'static> {
    /// A session for `path` resolved through the global registry.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_registry(path, EngineRegistry::global())
    }
}

impl<'r> SaveFile<'r> {
    /// A session for `path` resolved through `registry`.
    pub fn with_registry(path: impl AsRef<Path>, registry: &'r EngineRegistry) -> Self {
        let file_name = path.as_ref().to_path_buf();
        Self {
            registry,
            final_file_name: file_name.clone(),
            file_name,
            engine: None,
            mode: OpenMode::empty(),
            buffer: Vec::new(),
            write_error: None,
            error: None,
            use_temporary: false,
            direct_write_fallback: false,
            max_symlink_depth: DEFAULT_MAX_SYMLINK_DEPTH,
        }
    }

    /// The destination as given.
    pub fn file_name(&self) -> &Path {
        &self.file_name
    }

    /// Point the session at another destination.
    ///
    /// # Panics
    ///
    /// Panics while the session is open.
    pub fn set_file_name(&mut self, path: impl AsRef<Path>) {
        assert!(
            !self.is_open(),
            "SaveFile::set_file_name: {} is open",
            self.file_name.display()
        );
        self.file_name = path.as_ref().to_path_buf();
        self.final_file_name = self.file_name.clone();
    }

    /// The destination after symlink resolution, valid once opened.
    pub fn final_file_name(&self) -> &Path {
        &self.final_file_name
    }

    /// Returns `true` between a successful `open` and `commit`.
    pub fn is_open(&self) -> bool {
        self.engine.is_some()
    }

    /// The mode the session was opened with.
    pub fn open_mode(&self) -> OpenMode {
        self.mode
    }

    /// The last error the session reported.
    pub fn error(&self) -> Option<&EngineError> {
        self.error.as_ref()
    }

    /// Returns `true` if writes go to a staging file.
    pub fn uses_temporary_file(&self) -> bool {
        self.use_temporary
    }

    /// Allow writing the destination in place when no staging file can be
    /// used. Off by default.
    pub fn set_direct_write_fallback(&mut self, enabled: bool) {
        self.direct_write_fallback = enabled;
    }

    /// Whether the direct-write fallback is enabled.
    pub fn direct_write_fallback(&self) -> bool {
        self.direct_write_fallback
    }

    /// Bound the number of symlink hops followed to find the destination.
    pub fn set_max_symlink_depth(&mut self, depth: usize) {
        self.max_symlink_depth = depth;
    }

    /// The symlink hop bound.
    pub fn max_symlink_depth(&self) -> usize {
        self.max_symlink_depth
    }

    fn fail<T>(&mut self, error: EngineError) -> Result<T, EngineError> {
        self.error = Some(error.clone());
        Err(error)
    }

    fn poison<T>(&mut self, error: EngineError) -> Result<T, EngineError> {
        self.write_error = Some(error.clone());
        self.fail(error)
    }

    /// Open the session.
    ///
    /// `mode` must contain [`WRITE_ONLY`](OpenMode::WRITE_ONLY) and must not
    /// contain `READ_ONLY`, `APPEND`, `NEW_ONLY` or `EXISTING_ONLY`. `TEXT`,
    /// `TRUNCATE` and `UNBUFFERED` are accepted.
    ///
    /// # Errors
    ///
    /// - [`EngineError::UnsupportedOpenMode`] for a rejected mode
    /// - [`EngineError::NotWritable`] if the destination exists and may not
    ///   be written
    /// - [`EngineError::IsADirectory`] if the destination is a directory
    /// - [`EngineError::DirectWriteFallbackDisabled`] if the destination
    ///   needs an in-place write and the fallback is off
    /// - the engine's error if the staging or destination file cannot be
    ///   opened
    ///
    /// # Panics
    ///
    /// Panics if the session is already open.
    pub fn open(&mut self, mode: OpenMode) -> Result<(), EngineError> {
        assert!(
            !self.is_open(),
            "SaveFile::open: {} is already open",
            self.file_name.display()
        );
        self.error = None;
        self.write_error = None;
        self.buffer.clear();

        let unsupported =
            OpenMode::READ_ONLY | OpenMode::APPEND | OpenMode::NEW_ONLY | OpenMode::EXISTING_ONLY;
        if !mode.is_writable() || mode.intersects(unsupported) {
            return self.fail(EngineError::UnsupportedOpenMode { mode });
        }

        let existing = self.registry.create(&self.file_name);
        let flags = existing.file_flags(FileFlags::ALL);
        let exists = flags.contains(FileFlags::EXISTS);
        if exists && !flags.contains(FileFlags::WRITE_USER) {
            let path = self.file_name.clone();
            return self.fail(EngineError::NotWritable { path });
        }
        if flags.contains(FileFlags::DIRECTORY_TYPE) {
            let path = self.file_name.clone();
            return self.fail(EngineError::IsADirectory { path });
        }

        self.final_file_name = self.file_name.clone();
        if flags.contains(FileFlags::LINK_TYPE) {
            self.final_file_name = self.resolve_symlinks(existing, flags);
        }

        if requires_direct_write(&self.final_file_name) {
            if !self.direct_write_fallback {
                let path = self.file_name.clone();
                return self.fail(EngineError::DirectWriteFallbackDisabled { path });
            }
            return self.open_directly(mode);
        }

        let mut staging = self.registry.create_staging(&self.final_file_name);
        let create_permissions = if exists {
            Permissions::owner_only()
        } else {
            Permissions::default_file()
        };
        if let Err(e) = staging.open(mode | OpenMode::UNBUFFERED, Some(create_permissions)) {
            drop(staging);
            if self.direct_write_fallback && e.is_permission_denied() {
                tracing::warn!(
                    path = %self.final_file_name.display(),
                    "cannot create staging file, writing destination in place"
                );
                return self.open_directly(mode);
            }
            return self.fail(e.classify_unspecified(FileError::Open));
        }

        if exists {
            if let Err(e) = staging.set_permissions(flags.permissions()) {
                tracing::debug!(error = %e, "could not copy permissions onto staging file");
            }
        }
        self.engine = Some(staging);
        self.use_temporary = true;
        self.mode = mode;
        Ok(())
    }

    /// Follow the link chain starting at `engine`, bounded by
    /// `max_symlink_depth`. Falls back to the given name when the bound runs
    /// out.
    fn resolve_symlinks(&self, mut engine: Box<dyn FileEngine>, mut flags: FileFlags) -> PathBuf {
        let mut resolved = self.file_name.clone();
        let mut depth = self.max_symlink_depth;
        loop {
            depth = depth.saturating_sub(1);
            if depth == 0 || !flags.contains(FileFlags::LINK_TYPE) {
                break;
            }
            let Some(target) = engine.file_name(FileName::Link) else {
                break;
            };
            engine = self.registry.create(&target);
            flags = engine.file_flags(FileFlags::TYPES_MASK | FileFlags::EXISTS);
            resolved = target;
        }
        if depth == 0 {
            tracing::warn!(
                path = %self.file_name.display(),
                max_depth = self.max_symlink_depth,
                "symlink chain too deep, saving over the link itself"
            );
            return self.file_name.clone();
        }
        resolved
    }

    fn open_directly(&mut self, mode: OpenMode) -> Result<(), EngineError> {
        let mut engine = self.registry.create(&self.final_file_name);
        if let Err(e) = engine.open(mode | OpenMode::UNBUFFERED, None) {
            return self.fail(e.classify_unspecified(FileError::Open));
        }
        tracing::debug!(path = %self.final_file_name.display(), "writing destination directly");
        self.engine = Some(engine);
        self.use_temporary = false;
        self.mode = mode;
        Ok(())
    }

    /// Write `data`.
    ///
    /// Once any write has failed, or after [`cancel`](Self::cancel), every
    /// later write fails with the same error without reaching the engine.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, EngineError> {
        if self.engine.is_none() {
            return Err(EngineError::NotOpen);
        }
        if let Some(error) = &self.write_error {
            return Err(error.clone());
        }
        if self.mode.contains(OpenMode::UNBUFFERED) {
            return self.write_through(data);
        }
        if self.buffer.len() + data.len() > WRITE_BUFFER_SIZE {
            self.flush_buffer()?;
        }
        if data.len() >= WRITE_BUFFER_SIZE {
            return self.write_through(data);
        }
        self.buffer.extend_from_slice(data);
        Ok(data.len())
    }

    fn write_through(&mut self, data: &[u8]) -> Result<usize, EngineError> {
        let Some(engine) = self.engine.as_mut() else {
            return Err(EngineError::NotOpen);
        };
        match engine.write(data) {
            Ok(written) if written == data.len() => Ok(written),
            Ok(written) => self.poison(EngineError::WriteFailed {
                written,
                requested: data.len(),
            }),
            Err(e) => self.poison(e.classify_unspecified(FileError::Write)),
        }
    }

    fn flush_buffer(&mut self) -> Result<(), EngineError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.buffer);
        self.write_through(&pending).map(|_| ())
    }

    /// Push buffered data to the engine.
    pub fn flush(&mut self) -> Result<(), EngineError> {
        if let Some(error) = &self.write_error {
            return Err(error.clone());
        }
        self.flush_buffer()?;
        let Some(engine) = self.engine.as_mut() else {
            return Ok(());
        };
        if let Err(e) = engine.flush() {
            return self.poison(e.classify_unspecified(FileError::Write));
        }
        Ok(())
    }

    /// Make the next [`commit`](Self::commit) discard the staging file.
    ///
    /// Later writes fail. In direct-write mode there is nothing to discard
    /// and this does nothing: data already written stays written.
    pub fn cancel(&mut self) {
        if !self.is_open() {
            return;
        }
        if !self.use_temporary {
            tracing::debug!(
                path = %self.final_file_name.display(),
                "cancel has no effect while writing in place"
            );
            return;
        }
        self.buffer.clear();
        self.error = Some(EngineError::Canceled);
        self.write_error = Some(EngineError::Canceled);
    }

    /// Finish the save.
    ///
    /// With a staging file, replaces the destination atomically unless a
    /// write failed or the session was canceled; in that case the staging
    /// file is removed, the destination is left as it was, and the recorded
    /// error is returned.
    ///
    /// # Panics
    ///
    /// Panics if the session is not open.
    pub fn commit(mut self) -> Result<(), EngineError> {
        assert!(
            self.is_open(),
            "SaveFile::commit: {} is not open",
            self.file_name.display()
        );
        // A failed flush poisons the session, handled below.
        let _ = self.flush();
        let Some(mut engine) = self.engine.take() else {
            return Err(EngineError::NotOpen);
        };

        if let Err(e) = engine.sync_to_disk() {
            tracing::trace!(error = %e, "sync before commit failed");
        }
        if let Err(e) = engine.close() {
            if self.write_error.is_none() {
                self.write_error = Some(e.classify_unspecified(FileError::Write));
            }
        }

        if !self.use_temporary {
            return match self.write_error.take() {
                Some(e) => Err(e),
                None => Ok(()),
            };
        }

        if let Some(e) = self.write_error.take() {
            tracing::debug!(
                path = %self.final_file_name.display(),
                error = %e,
                "discarding staging file"
            );
            discard(engine.as_mut());
            return Err(e);
        }
        if let Err(e) = engine.rename_overwrite(&self.final_file_name) {
            discard(engine.as_mut());
            return Err(e);
        }
        tracing::debug!(path = %self.final_file_name.display(), "committed");
        Ok(())
    }

    /// Always panics: a save session ends with [`commit`](Self::commit) or by
    /// being dropped, never with `close`.
    pub fn close(&mut self) {
        panic!(
            "SaveFile::close called on {}; use commit() or cancel()",
            self.file_name.display()
        );
    }
}

fn discard(engine: &mut dyn FileEngine) {
    if let Err(e) = engine.remove() {
        tracing::warn!(error = %e, "could not remove staging file");
    }
}

impl Drop for SaveFile<'_> {
    fn drop(&mut self) {
        let Some(mut engine) = self.engine.take() else {
            return;
        };
        if self.use_temporary {
            tracing::debug!(
                path = %self.final_file_name.display(),
                "save session dropped without commit, discarding staging file"
            );
            discard(engine.as_mut());
        } else {
            let pending = std::mem::take(&mut self.buffer);
            if self.write_error.is_none() && !pending.is_empty() {
                match engine.write(&pending) {
                    Ok(n) if n == pending.len() => {}
                    Ok(n) => tracing::warn!(
                        path = %self.final_file_name.display(),
                        written = n,
                        expected = pending.len(),
                        "short write flushing dropped save session"
                    ),
                    Err(e) => tracing::warn!(
                        path = %self.final_file_name.display(),
                        error = %e,
                        "could not flush dropped save session"
                    ),
                }
            }
            if let Err(e) = engine.close() {
                tracing::warn!(
                    path = %self.final_file_name.display(),
                    error = %e,
                    "could not close dropped save session"
                );
            }
        }
    }
}

impl fmt::Debug for SaveFile<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveFile")
            .field("file_name", &self.file_name)
            .field("final_file_name", &self.final_file_name)
            .field("open", &self.is_open())
            .field("mode", &self.mode)
            .field("use_temporary", &self.use_temporary)
            .field("write_error", &self.write_error)
            .field("direct_write_fallback", &self.direct_write_fallback)
            .finish()
    }
}

impl io::Write for SaveFile<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        SaveFile::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        SaveFile::flush(self).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EngineHandler, MemoryHandler, TemporaryEngine};
    use std::fs;
    use std::io::Write as _;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn scratch() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Staging engine whose writes always fail.
    struct FailingWrites(TemporaryEngine);

    impl FileEngine for FailingWrites {
        fn open(&mut self, mode: OpenMode, perms: Option<Permissions>) -> Result<(), EngineError> {
            self.0.open(mode, perms)
        }
        fn write(&mut self, _: &[u8]) -> Result<usize, EngineError> {
            Err(EngineError::io(
                FileError::Write,
                "write",
                "staging",
                &io::Error::other("disk full"),
            ))
        }
        fn close(&mut self) -> Result<(), EngineError> {
            self.0.close()
        }
        fn remove(&mut self) -> Result<(), EngineError> {
            self.0.remove()
        }
        fn rename_overwrite(&mut self, new_name: &Path) -> Result<(), EngineError> {
            self.0.rename_overwrite(new_name)
        }
    }

    struct FailingStaging;

    impl EngineHandler for FailingStaging {
        fn create(&self, _: &Path) -> Option<Box<dyn FileEngine>> {
            None
        }
        fn create_staging(&self, final_path: &Path) -> Option<Box<dyn FileEngine>> {
            Some(Box::new(FailingWrites(TemporaryEngine::new(final_path))))
        }
    }

    /// Staging engine the process may not create.
    struct DeniedStaging;

    impl FileEngine for DeniedStaging {
        fn open(&mut self, _: OpenMode, _: Option<Permissions>) -> Result<(), EngineError> {
            Err(EngineError::io(
                FileError::Open,
                "open",
                "staging",
                &io::Error::from(io::ErrorKind::PermissionDenied),
            ))
        }
    }

    struct NoStagingAllowed;

    impl EngineHandler for NoStagingAllowed {
        fn create(&self, _: &Path) -> Option<Box<dyn FileEngine>> {
            None
        }
        fn create_staging(&self, _: &Path) -> Option<Box<dyn FileEngine>> {
            Some(Box::new(DeniedStaging))
        }
    }

    /// In-place medium whose writes and closes always fail.
    struct Unwritable;

    impl FileEngine for Unwritable {
        fn open(&mut self, _: OpenMode, _: Option<Permissions>) -> Result<(), EngineError> {
            Ok(())
        }
        fn write(&mut self, _: &[u8]) -> Result<usize, EngineError> {
            Err(EngineError::io(FileError::Write, "write", "broken", &io::Error::other("gone")))
        }
        fn close(&mut self) -> Result<(), EngineError> {
            Err(EngineError::io(FileError::Write, "close", "broken", &io::Error::other("gone")))
        }
    }

    struct BrokenMedium;

    impl EngineHandler for BrokenMedium {
        fn create(&self, path: &Path) -> Option<Box<dyn FileEngine>> {
            path.to_str()?
                .starts_with("content://broken/")
                .then(|| Box::new(Unwritable) as Box<dyn FileEngine>)
        }
    }

    /// Log sink shared between a test and its subscriber.
    #[derive(Clone, Default)]
    struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    #[test]
    fn creates_new_file() {
        let dir = scratch();
        let registry = EngineRegistry::new();
        let path = dir.path().join("new.txt");

        let mut file = SaveFile::with_registry(&path, &registry);
        file.open(OpenMode::WRITE_ONLY).unwrap();
        assert!(file.uses_temporary_file());
        assert!(!path.exists());
        file.write(b"content").unwrap();
        file.commit().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"content");
        assert_eq!(names(dir.path()), ["new.txt"]);
    }

    #[test]
    fn rejects_unsupported_modes() {
        let dir = scratch();
        let registry = EngineRegistry::new();
        let mut file = SaveFile::with_registry(dir.path().join("f"), &registry);
        for mode in [
            OpenMode::empty(),
            OpenMode::READ_ONLY,
            OpenMode::READ_WRITE,
            OpenMode::WRITE_ONLY | OpenMode::APPEND,
            OpenMode::WRITE_ONLY | OpenMode::NEW_ONLY,
            OpenMode::WRITE_ONLY | OpenMode::EXISTING_ONLY,
        ] {
            let err = file.open(mode).unwrap_err();
            assert!(matches!(err, EngineError::UnsupportedOpenMode { .. }));
            assert!(!file.is_open());
        }
        assert!(names(dir.path()).is_empty());
    }

    #[test]
    fn text_and_truncate_are_accepted() {
        let dir = scratch();
        let registry = EngineRegistry::new();
        let mut file = SaveFile::with_registry(dir.path().join("f"), &registry);
        file.open(OpenMode::WRITE_ONLY | OpenMode::TEXT | OpenMode::TRUNCATE)
            .unwrap();
        file.commit().unwrap();
    }

    #[test]
    fn directory_target_is_rejected() {
        let dir = scratch();
        let registry = EngineRegistry::new();
        let mut file = SaveFile::with_registry(dir.path(), &registry);
        let err = file.open(OpenMode::WRITE_ONLY).unwrap_err();
        assert!(matches!(err, EngineError::IsADirectory { .. }));
        assert_eq!(err.kind(), FileError::Write);
        assert_eq!(file.error(), Some(&err));
    }

    #[test]
    #[should_panic(expected = "already open")]
    fn double_open_panics() {
        let dir = scratch();
        let registry = EngineRegistry::new();
        let mut file = SaveFile::with_registry(dir.path().join("f"), &registry);
        file.open(OpenMode::WRITE_ONLY).unwrap();
        let _ = file.open(OpenMode::WRITE_ONLY);
    }

    #[test]
    #[should_panic(expected = "close called")]
    fn close_panics() {
        let dir = scratch();
        let registry = EngineRegistry::new();
        let mut file = SaveFile::with_registry(dir.path().join("f"), &registry);
        file.open(OpenMode::WRITE_ONLY).unwrap();
        file.close();
    }

    #[test]
    #[should_panic(expected = "not open")]
    fn commit_unopened_panics() {
        let registry = EngineRegistry::new();
        let file = SaveFile::with_registry("/unused", &registry);
        let _ = file.commit();
    }

    #[test]
    fn write_before_open_fails() {
        let registry = EngineRegistry::new();
        let mut file = SaveFile::with_registry("/unused", &registry);
        assert!(matches!(file.write(b"x"), Err(EngineError::NotOpen)));
    }

    #[test]
    fn buffered_writes_span_many_chunks() {
        let dir = scratch();
        let registry = EngineRegistry::new();
        let path = dir.path().join("big");
        let chunk = [b'x'; 1000];

        let mut file = SaveFile::with_registry(&path, &registry);
        file.open(OpenMode::WRITE_ONLY).unwrap();
        for _ in 0..50 {
            file.write(&chunk).unwrap();
        }
        file.write(&[b'y'; WRITE_BUFFER_SIZE + 1]).unwrap();
        file.commit().unwrap();

        let data = fs::read(&path).unwrap();
        assert_eq!(data.len(), 50_000 + WRITE_BUFFER_SIZE + 1);
        assert!(data[..50_000].iter().all(|&b| b == b'x'));
        assert!(data[50_000..].iter().all(|&b| b == b'y'));
    }

    #[test]
    fn io_write_adapter() {
        let dir = scratch();
        let registry = EngineRegistry::new();
        let path = dir.path().join("f");
        let mut file = SaveFile::with_registry(&path, &registry);
        file.open(OpenMode::WRITE_ONLY).unwrap();
        write!(file, "{}-{}", 1, 2).unwrap();
        file.commit().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1-2");
    }

    #[test]
    fn failed_write_poisons_and_discards() {
        let dir = scratch();
        let registry = EngineRegistry::new();
        let _failing = registry.register(FailingStaging);
        let path = dir.path().join("target");
        fs::write(&path, b"A").unwrap();

        let mut file = SaveFile::with_registry(&path, &registry);
        file.open(OpenMode::WRITE_ONLY | OpenMode::UNBUFFERED).unwrap();
        assert!(file.write(b"B").is_err());
        let again = file.write(b"C").unwrap_err();
        assert_eq!(again.kind(), FileError::Write);

        assert!(file.commit().is_err());
        assert_eq!(fs::read(&path).unwrap(), b"A");
        assert_eq!(names(dir.path()), ["target"]);
    }

    #[test]
    fn failure_during_commit_flush_discards() {
        let dir = scratch();
        let registry = EngineRegistry::new();
        let _failing = registry.register(FailingStaging);
        let path = dir.path().join("target");
        fs::write(&path, b"A").unwrap();

        let mut file = SaveFile::with_registry(&path, &registry);
        file.open(OpenMode::WRITE_ONLY).unwrap();
        file.write(b"B").unwrap();
        assert!(file.commit().is_err());
        assert_eq!(fs::read(&path).unwrap(), b"A");
        assert_eq!(names(dir.path()), ["target"]);
    }

    #[test]
    fn cancel_discards() {
        let dir = scratch();
        let registry = EngineRegistry::new();
        let path = dir.path().join("target");
        fs::write(&path, b"before").unwrap();

        let mut file = SaveFile::with_registry(&path, &registry);
        file.open(OpenMode::WRITE_ONLY).unwrap();
        file.write(b"X").unwrap();
        file.cancel();
        assert!(matches!(file.write(b"Y"), Err(EngineError::Canceled)));
        assert!(matches!(file.commit(), Err(EngineError::Canceled)));

        assert_eq!(fs::read(&path).unwrap(), b"before");
        assert_eq!(names(dir.path()), ["target"]);
    }

    #[test]
    fn drop_without_commit_discards() {
        let dir = scratch();
        let registry = EngineRegistry::new();
        let path = dir.path().join("target");
        fs::write(&path, b"keep").unwrap();
        {
            let mut file = SaveFile::with_registry(&path, &registry);
            file.open(OpenMode::WRITE_ONLY).unwrap();
            file.write(b"lost").unwrap();
        }
        assert_eq!(fs::read(&path).unwrap(), b"keep");
        assert_eq!(names(dir.path()), ["target"]);
    }

    #[test]
    fn reopen_after_failed_open_resets_errors() {
        let dir = scratch();
        let registry = EngineRegistry::new();
        let mut file = SaveFile::with_registry(dir.path().join("f"), &registry);
        assert!(file.open(OpenMode::READ_ONLY).is_err());
        assert!(file.error().is_some());
        file.open(OpenMode::WRITE_ONLY).unwrap();
        assert!(file.error().is_none());
        file.commit().unwrap();
    }

    #[test]
    fn direct_write_needs_opt_in() {
        let registry = EngineRegistry::new();
        let content = MemoryHandler::new("content://");
        let _reg = registry.register(content.clone());
        content.insert("content://docs/1", b"old".to_vec());

        let mut file = SaveFile::with_registry("content://docs/1", &registry);
        let err = file.open(OpenMode::WRITE_ONLY).unwrap_err();
        assert!(matches!(err, EngineError::DirectWriteFallbackDisabled { .. }));
        assert_eq!(err.kind(), FileError::Open);
        assert_eq!(content.get("content://docs/1").unwrap(), b"old");
    }

    #[test]
    fn direct_write_ignores_cancel() {
        let registry = EngineRegistry::new();
        let content = MemoryHandler::new("content://");
        let _reg = registry.register(content.clone());
        content.insert("content://docs/1", b"old".to_vec());

        let mut file = SaveFile::with_registry("content://docs/1", &registry);
        file.set_direct_write_fallback(true);
        file.open(OpenMode::WRITE_ONLY).unwrap();
        assert!(!file.uses_temporary_file());
        file.write(b"new").unwrap();
        file.cancel();
        file.commit().unwrap();

        assert_eq!(content.get("content://docs/1").unwrap(), b"new");
        assert_eq!(content.paths(), ["content://docs/1"]);
    }

    #[test]
    fn denied_staging_surfaces_without_fallback() {
        let dir = scratch();
        let registry = EngineRegistry::new();
        let _reg = registry.register(NoStagingAllowed);
        let path = dir.path().join("x");
        fs::write(&path, b"A").unwrap();

        let mut file = SaveFile::with_registry(&path, &registry);
        let err = file.open(OpenMode::WRITE_ONLY).unwrap_err();
        assert!(err.is_permission_denied());
        assert_eq!(err.kind(), FileError::Open);
        assert!(!file.is_open());
        assert_eq!(fs::read(&path).unwrap(), b"A");
        assert_eq!(names(dir.path()), ["x"]);
    }

    #[test]
    fn denied_staging_writes_in_place_with_fallback() {
        let dir = scratch();
        let registry = EngineRegistry::new();
        let _reg = registry.register(NoStagingAllowed);
        let path = dir.path().join("x");
        fs::write(&path, b"A").unwrap();

        let mut file = SaveFile::with_registry(&path, &registry);
        file.set_direct_write_fallback(true);
        file.open(OpenMode::WRITE_ONLY).unwrap();
        assert!(!file.uses_temporary_file());
        file.write(b"B").unwrap();
        file.commit().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"B");
        assert_eq!(names(dir.path()), ["x"]);
    }

    #[test]
    fn dropped_direct_session_logs_failures() {
        let registry = EngineRegistry::new();
        let _reg = registry.register(BrokenMedium);
        let logs = Captured::default();
        let sink = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let mut file = SaveFile::with_registry("content://broken/doc", &registry);
            file.set_direct_write_fallback(true);
            file.open(OpenMode::WRITE_ONLY).unwrap();
            assert!(!file.uses_temporary_file());
            file.write(b"lost").unwrap();
            drop(file);
        });

        let text = logs.text();
        assert!(text.contains("could not flush dropped save session"), "{text}");
        assert!(text.contains("could not close dropped save session"), "{text}");
    }

    #[test]
    fn staging_goes_through_handlers() {
        let registry = EngineRegistry::new();
        let mem = MemoryHandler::new("mem:/");
        let _reg = registry.register(mem.clone());
        mem.insert("mem:/doc", b"A".to_vec());

        let mut file = SaveFile::with_registry("mem:/doc", &registry);
        file.open(OpenMode::WRITE_ONLY).unwrap();
        file.write(b"BB").unwrap();
        assert_eq!(mem.get("mem:/doc").unwrap(), b"A");
        file.commit().unwrap();

        assert_eq!(mem.get("mem:/doc").unwrap(), b"BB");
        assert_eq!(mem.paths(), ["mem:/doc"]);
    }

    #[test]
    fn read_only_destination_is_not_writable() {
        let registry = EngineRegistry::new();
        let resources = MemoryHandler::read_only(":/");
        let _reg = registry.register(resources.clone());
        resources.insert(":/a", b"x".to_vec());

        let mut file = SaveFile::with_registry(":/a", &registry);
        let err = file.open(OpenMode::WRITE_ONLY).unwrap_err();
        assert!(matches!(err, EngineError::NotWritable { .. }));
        assert_eq!(err.kind(), FileError::Permissions);
    }

    #[cfg(unix)]
    #[test]
    fn writes_through_symlink_to_target() {
        let dir = scratch();
        let registry = EngineRegistry::new();
        let target = dir.path().join("real");
        let link = dir.path().join("link");
        fs::write(&target, b"A").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let mut file = SaveFile::with_registry(&link, &registry);
        file.open(OpenMode::WRITE_ONLY).unwrap();
        assert_eq!(file.final_file_name(), target);
        file.write(b"B").unwrap();
        file.commit().unwrap();

        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(&target).unwrap(), b"B");
    }

    #[cfg(unix)]
    #[test]
    fn exhausted_depth_saves_over_link() {
        let dir = scratch();
        let registry = EngineRegistry::new();
        let target = dir.path().join("real");
        let link = dir.path().join("link");
        fs::write(&target, b"A").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let mut file = SaveFile::with_registry(&link, &registry);
        file.set_max_symlink_depth(1);
        file.open(OpenMode::WRITE_ONLY).unwrap();
        assert_eq!(file.final_file_name(), link);
        file.write(b"B").unwrap();
        file.commit().unwrap();

        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_file());
        assert_eq!(fs::read(&target).unwrap(), b"A");
    }

    #[test]
    fn direct_write_detection() {
        assert!(requires_direct_write(Path::new("content://a/b")));
        assert!(!requires_direct_write(Path::new("relative/file")));
        assert_eq!(requires_direct_write(Path::new("C:\\dir\\file:stream")), cfg!(windows));
        assert!(!requires_direct_write(Path::new("C:\\dir\\file")));
    }
}
