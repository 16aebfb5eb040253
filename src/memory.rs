//! # Memory Backend
//!
//! An in-memory store that claims every path under a prefix.
//!
//! Typical uses:
//!
//! | Prefix | Role |
//! |--------|------|
//! | `":/"` | Embedded resources, usually read-only and installed as the fallback resolver |
//! | `"content://"` | A medium that can only be written in place |
//! | anything | A scratch backend for tests |
//!
//! Directories are implicit: a path is a directory when some stored file
//! lives below it. The prefix itself is always a directory.
//!
//! Open engines work on a private buffer and publish it to the store on
//! `flush`, `close` and `rename_overwrite`.
//!
//! The store has no permission model. Writable stores report owner and user
//! read/write, and `set_permissions` is unsupported.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::extension::{Extension, ExtensionRequest, ExtensionResponse, MappedRegion};
use crate::{
    DirFilters, EngineError, EngineHandler, EngineIterator, EntryInfo, FileEngine, FileError,
    FileFlags, FileName, IteratorState, OpenMode, Permissions,
};

#[derive(Debug)]
struct Store {
    prefix: String,
    read_only: bool,
    files: Mutex<BTreeMap<String, Arc<[u8]>>>,
    next_staging: AtomicU64,
}

impl Store {
    fn claims(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }

    fn is_dir(&self, path: &str) -> bool {
        let dir = path.trim_end_matches('/');
        if path == self.prefix || dir == self.prefix.trim_end_matches('/') {
            return true;
        }
        let below = format!("{dir}/");
        self.files
            .lock()
            .range(below.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&below))
    }

    fn flags(&self, path: &str) -> FileFlags {
        let mut flags = if self.files.lock().contains_key(path) {
            FileFlags::EXISTS | FileFlags::FILE_TYPE
        } else if self.is_dir(path) {
            FileFlags::EXISTS
                | FileFlags::DIRECTORY_TYPE
                | FileFlags::EXE_OWNER
                | FileFlags::EXE_GROUP
                | FileFlags::EXE_OTHER
                | FileFlags::EXE_USER
        } else {
            return FileFlags::empty();
        };
        flags |= FileFlags::READ_OWNER
            | FileFlags::READ_GROUP
            | FileFlags::READ_OTHER
            | FileFlags::READ_USER;
        if !self.read_only {
            flags |= FileFlags::WRITE_OWNER | FileFlags::WRITE_USER;
        }
        if name_of(path).starts_with('.') {
            flags |= FileFlags::HIDDEN;
        }
        flags
    }

    fn entry(&self, path: &str) -> EntryInfo {
        EntryInfo {
            name: name_of(path).to_string(),
            path: PathBuf::from(path),
            flags: self.flags(path),
            size: self
                .files
                .lock()
                .get(path)
                .map_or(0, |data| data.len() as u64),
        }
    }

    /// Direct children of `dir`, files and implicit directories alike.
    fn children(&self, dir: &str) -> Vec<String> {
        let below = if dir.ends_with('/') {
            dir.to_string()
        } else {
            format!("{dir}/")
        };
        let mut names: Vec<String> = self
            .files
            .lock()
            .keys()
            .filter_map(|key| key.strip_prefix(&below))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        names.dedup();
        names
    }
}

fn name_of(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
}

/// Largest file the store holds. Seeks, writes and resizes past it fail.
pub const MAX_MEMORY_FILE_SIZE: u64 = 1 << 30;

fn io_error(kind: FileError, operation: &'static str, path: &str, io_kind: io::ErrorKind) -> EngineError {
    EngineError::io(kind, operation, path, &io::Error::from(io_kind))
}

/// Handler serving an in-memory store under a path prefix.
///
/// Cloning the handler shares the store.
///
/// # Example
///
/// ```rust
/// use anyfs_engine::{FileEngine, EngineHandler, MemoryHandler, OpenMode};
/// use std::path::Path;
///
/// let resources = MemoryHandler::read_only(":/");
/// resources.insert(":/icons/app.svg", b"<svg/>".to_vec());
///
/// let mut engine = resources.create(Path::new(":/icons/app.svg")).unwrap();
/// engine.open(OpenMode::READ_ONLY, None).unwrap();
/// let mut buf = [0u8; 16];
/// assert_eq!(engine.read(&mut buf).unwrap(), 6);
///
/// // Read-only stores refuse writers.
/// assert!(engine.open(OpenMode::WRITE_ONLY, None).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct MemoryHandler {
    store: Arc<Store>,
}

impl MemoryHandler {
    /// A writable store claiming paths that start with `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_access(prefix.into(), false)
    }

    /// A read-only store claiming paths that start with `prefix`.
    ///
    /// Content is seeded with [`insert`](Self::insert).
    pub fn read_only(prefix: impl Into<String>) -> Self {
        Self::with_access(prefix.into(), true)
    }

    fn with_access(prefix: String, read_only: bool) -> Self {
        Self {
            store: Arc::new(Store {
                prefix,
                read_only,
                files: Mutex::new(BTreeMap::new()),
                next_staging: AtomicU64::new(0),
            }),
        }
    }

    /// The claimed prefix.
    pub fn prefix(&self) -> &str {
        &self.store.prefix
    }

    /// Store `data` at `path`, replacing what was there.
    pub fn insert(&self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        let data: Vec<u8> = data.into();
        self.store.files.lock().insert(path.into(), Arc::from(data));
    }

    /// Content stored at `path`.
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.store.files.lock().get(path).map(|data| data.to_vec())
    }

    /// Every stored file path, in order.
    pub fn paths(&self) -> Vec<String> {
        self.store.files.lock().keys().cloned().collect()
    }
}

impl EngineHandler for MemoryHandler {
    fn create(&self, path: &Path) -> Option<Box<dyn FileEngine>> {
        let path = path.to_str()?;
        if !self.store.claims(path) {
            return None;
        }
        Some(Box::new(MemoryEngine::new(self.store.clone(), path)))
    }

    fn create_staging(&self, final_path: &Path) -> Option<Box<dyn FileEngine>> {
        let path = final_path.to_str()?;
        if !self.store.claims(path) || self.store.read_only {
            return None;
        }
        let n = self.store.next_staging.fetch_add(1, Ordering::Relaxed);
        let staging = format!("{path}.staging{n}");
        Some(Box::new(MemoryEngine::new(self.store.clone(), &staging)))
    }
}

/// Engine over one path of a [`MemoryHandler`] store.
#[derive(Debug)]
pub struct MemoryEngine {
    store: Arc<Store>,
    path: String,
    buffer: Option<Vec<u8>>,
    mode: OpenMode,
    pos: usize,
    dirty: bool,
    maps: Vec<MappedRegion>,
    last_error: Option<EngineError>,
}

impl MemoryEngine {
    fn new(store: Arc<Store>, path: &str) -> Self {
        Self {
            store,
            path: path.to_string(),
            buffer: None,
            mode: OpenMode::empty(),
            pos: 0,
            dirty: false,
            maps: Vec::new(),
            last_error: None,
        }
    }

    fn fail<T>(&mut self, error: EngineError) -> Result<T, EngineError> {
        self.last_error = Some(error.clone());
        Err(error)
    }

    fn refuse_if_read_only(&mut self, kind: FileError, operation: &'static str) -> Result<(), EngineError> {
        if self.store.read_only {
            let error = io_error(kind, operation, &self.path, io::ErrorKind::PermissionDenied);
            return self.fail(error);
        }
        Ok(())
    }

    fn publish(&mut self) {
        if let Some(buffer) = &self.buffer {
            if self.dirty {
                self.store
                    .files
                    .lock()
                    .insert(self.path.clone(), Arc::from(buffer.as_slice()));
                self.dirty = false;
            }
        }
    }

    fn snapshot(&mut self) -> Option<Arc<[u8]>> {
        self.publish();
        self.store.files.lock().get(&self.path).cloned()
    }
}

impl FileEngine for MemoryEngine {
    fn set_file_name(&mut self, path: &Path) {
        self.publish();
        self.buffer = None;
        self.maps.clear();
        self.path = path.to_string_lossy().into_owned();
    }

    fn file_name(&self, which: FileName) -> Option<PathBuf> {
        match which {
            FileName::Default
            | FileName::Absolute
            | FileName::Canonical => Some(PathBuf::from(&self.path)),
            FileName::Base => Some(PathBuf::from(name_of(&self.path))),
            FileName::Path | FileName::AbsolutePath | FileName::CanonicalPath => {
                let trimmed = self.path.trim_end_matches('/');
                let cut = trimmed.rfind('/').map_or(0, |i| i + 1);
                Some(PathBuf::from(&trimmed[..cut]))
            }
            FileName::Link | FileName::Bundle => None,
        }
    }

    fn open(&mut self, mode: OpenMode, _: Option<Permissions>) -> Result<(), EngineError> {
        let writes = mode.is_writable() || mode.contains(OpenMode::APPEND);
        if writes {
            self.refuse_if_read_only(FileError::Open, "open")?;
        }
        if self.store.is_dir(&self.path) {
            let error = io_error(FileError::Open, "open", &self.path, io::ErrorKind::IsADirectory);
            return self.fail(error);
        }
        let existing = self.store.files.lock().get(&self.path).cloned();
        let data = match existing {
            Some(_) if mode.contains(OpenMode::NEW_ONLY) => {
                let error = io_error(FileError::Open, "open", &self.path, io::ErrorKind::AlreadyExists);
                return self.fail(error);
            }
            Some(data) if !mode.truncates() => data.to_vec(),
            Some(_) => Vec::new(),
            None if writes && !mode.contains(OpenMode::EXISTING_ONLY) => Vec::new(),
            None => {
                let error = io_error(FileError::Open, "open", &self.path, io::ErrorKind::NotFound);
                return self.fail(error);
            }
        };

        self.pos = if mode.contains(OpenMode::APPEND) { data.len() } else { 0 };
        self.buffer = Some(data);
        self.mode = mode;
        self.dirty = writes;
        self.publish();
        Ok(())
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.publish();
        self.buffer = None;
        self.maps.clear();
        Ok(())
    }

    fn flush(&mut self) -> Result<(), EngineError> {
        self.publish();
        Ok(())
    }

    fn sync_to_disk(&mut self) -> Result<(), EngineError> {
        self.publish();
        Ok(())
    }

    fn size(&self) -> u64 {
        match &self.buffer {
            Some(buffer) => buffer.len() as u64,
            None => self
                .store
                .files
                .lock()
                .get(&self.path)
                .map_or(0, |data| data.len() as u64),
        }
    }

    fn pos(&self) -> u64 {
        self.pos as u64
    }

    fn seek(&mut self, pos: u64) -> Result<(), EngineError> {
        if self.buffer.is_none() {
            return self.fail(EngineError::NotOpen);
        }
        match usize::try_from(pos) {
            Ok(pos) if pos as u64 <= MAX_MEMORY_FILE_SIZE => {
                self.pos = pos;
                Ok(())
            }
            _ => {
                let error = io_error(FileError::Position, "seek", &self.path, io::ErrorKind::InvalidInput);
                self.fail(error)
            }
        }
    }

    fn remove(&mut self) -> Result<(), EngineError> {
        self.refuse_if_read_only(FileError::Remove, "remove")?;
        self.buffer = None;
        self.dirty = false;
        if self.store.files.lock().remove(&self.path).is_none() {
            let error = io_error(FileError::Remove, "remove", &self.path, io::ErrorKind::NotFound);
            return self.fail(error);
        }
        Ok(())
    }

    fn copy(&mut self, new_name: &Path) -> Result<(), EngineError> {
        self.refuse_if_read_only(FileError::Copy, "copy")?;
        let target = new_name.to_string_lossy().into_owned();
        let Some(data) = self.snapshot().filter(|_| self.store.claims(&target)) else {
            let error = io_error(FileError::Copy, "copy", &target, io::ErrorKind::NotFound);
            return self.fail(error);
        };
        self.store.files.lock().insert(target, data);
        Ok(())
    }

    fn rename(&mut self, new_name: &Path) -> Result<(), EngineError> {
        let target = new_name.to_string_lossy();
        if self.store.files.lock().contains_key(&*target) {
            let error = io_error(FileError::Rename, "rename", &target, io::ErrorKind::AlreadyExists);
            return self.fail(error);
        }
        self.rename_overwrite(new_name)
    }

    fn rename_overwrite(&mut self, new_name: &Path) -> Result<(), EngineError> {
        self.refuse_if_read_only(FileError::Rename, "rename")?;
        let target = new_name.to_string_lossy().into_owned();
        if !self.store.claims(&target) {
            let error = io_error(FileError::Rename, "rename", &target, io::ErrorKind::CrossesDevices);
            return self.fail(error);
        }
        self.publish();
        let mut files = self.store.files.lock();
        let Some(data) = files.remove(&self.path) else {
            drop(files);
            let error = io_error(FileError::Rename, "rename", &self.path, io::ErrorKind::NotFound);
            return self.fail(error);
        };
        files.insert(target.clone(), data);
        drop(files);
        self.path = target;
        Ok(())
    }

    fn set_size(&mut self, size: u64) -> Result<(), EngineError> {
        self.refuse_if_read_only(FileError::Resize, "set_size")?;
        let Some(size) = usize::try_from(size)
            .ok()
            .filter(|&size| size as u64 <= MAX_MEMORY_FILE_SIZE)
        else {
            let error = io_error(FileError::Resize, "set_size", &self.path, io::ErrorKind::InvalidInput);
            return self.fail(error);
        };
        match self.buffer.as_mut() {
            Some(buffer) => {
                buffer.resize(size, 0);
                self.dirty = true;
                self.publish();
            }
            None => {
                let mut files = self.store.files.lock();
                let Some(data) = files.get(&self.path) else {
                    drop(files);
                    let error = io_error(FileError::Resize, "set_size", &self.path, io::ErrorKind::NotFound);
                    return self.fail(error);
                };
                let mut resized = data.to_vec();
                resized.resize(size, 0);
                files.insert(self.path.clone(), Arc::from(resized));
            }
        }
        Ok(())
    }

    fn case_sensitive(&self) -> bool {
        true
    }

    fn begin_entry_list(
        &self,
        filters: DirFilters,
        name_filters: &[String],
    ) -> Option<Box<dyn EngineIterator>> {
        if !self.store.is_dir(&self.path) {
            return None;
        }
        Some(Box::new(MemoryIterator::new(
            self.store.clone(),
            &self.path,
            filters,
            name_filters,
        )))
    }

    fn file_flags(&self, _mask: FileFlags) -> FileFlags {
        self.store.flags(&self.path)
    }

    fn set_permissions(&mut self, _permissions: Permissions) -> Result<(), EngineError> {
        self.refuse_if_read_only(FileError::Permissions, "set_permissions")?;
        self.fail(EngineError::NotSupported {
            operation: "set_permissions",
        })
    }

    fn id(&self) -> Vec<u8> {
        self.path.as_bytes().to_vec()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EngineError> {
        let Some(data) = self.buffer.as_ref() else {
            return self.fail(EngineError::NotOpen);
        };
        if !self.mode.is_readable() {
            let error = io_error(FileError::Read, "read", &self.path, io::ErrorKind::PermissionDenied);
            return self.fail(error);
        }
        let available = data.get(self.pos..).unwrap_or_default();
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, EngineError> {
        let writable = self.mode.is_writable() || self.mode.contains(OpenMode::APPEND);
        let Some(buffer) = self.buffer.as_mut() else {
            return self.fail(EngineError::NotOpen);
        };
        if !writable {
            let error = io_error(FileError::Write, "write", &self.path, io::ErrorKind::PermissionDenied);
            return self.fail(error);
        }
        if self.mode.contains(OpenMode::APPEND) {
            self.pos = buffer.len();
        }
        let end = match self.pos.checked_add(data.len()) {
            Some(end) if end as u64 <= MAX_MEMORY_FILE_SIZE => end,
            _ => {
                let error = io_error(FileError::Write, "write", &self.path, io::ErrorKind::InvalidInput);
                return self.fail(error);
            }
        };
        if buffer.len() < end {
            buffer.resize(end, 0);
        }
        buffer[self.pos..end].copy_from_slice(data);
        self.pos = end;
        self.dirty = true;
        Ok(data.len())
    }

    fn read_line(&mut self, buf: &mut [u8]) -> Result<usize, EngineError> {
        let Some(data) = self.buffer.as_ref() else {
            return self.fail(EngineError::NotOpen);
        };
        let available = data.get(self.pos..).unwrap_or_default();
        if available.is_empty() && !buf.is_empty() {
            return Err(EngineError::EndOfData);
        }
        let line_len = available
            .iter()
            .position(|&b| b == b'\n')
            .map_or(available.len(), |i| i + 1);
        let n = line_len.min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }

    fn error(&self) -> Option<&EngineError> {
        self.last_error.as_ref()
    }

    fn supports_extension(&self, extension: Extension) -> bool {
        matches!(
            extension,
            Extension::AtEnd | Extension::FastReadLine | Extension::Map | Extension::UnMap
        )
    }

    fn extension(&mut self, request: &ExtensionRequest<'_>) -> Option<ExtensionResponse> {
        match request {
            ExtensionRequest::AtEnd => {
                let len = self.buffer.as_ref()?.len();
                Some(ExtensionResponse::AtEnd(self.pos >= len))
            }
            ExtensionRequest::FastReadLine => Some(ExtensionResponse::Done),
            ExtensionRequest::Map(options) => {
                self.buffer.as_ref()?;
                let data = self.snapshot()?;
                let start = usize::try_from(options.offset).ok()?;
                let end = start.checked_add(usize::try_from(options.size).ok()?)?;
                let region = MappedRegion::new(data, start..end)?;
                self.maps.push(region.clone());
                Some(ExtensionResponse::Map(region))
            }
            ExtensionRequest::UnMap(region) => {
                let index = self.maps.iter().position(|m| m.same_region(region))?;
                self.maps.swap_remove(index);
                Some(ExtensionResponse::Done)
            }
        }
    }
}

/// Cursor over the direct children of a memory directory.
#[derive(Debug)]
pub struct MemoryIterator {
    state: IteratorState,
    store: Arc<Store>,
    names: std::vec::IntoIter<String>,
    current: Option<String>,
}

impl MemoryIterator {
    fn new(store: Arc<Store>, dir: &str, filters: DirFilters, name_filters: &[String]) -> Self {
        let names = store.children(dir).into_iter();
        Self {
            state: IteratorState::new(dir, filters, name_filters),
            store,
            names,
            current: None,
        }
    }
}

impl EngineIterator for MemoryIterator {
    fn state(&self) -> &IteratorState {
        &self.state
    }

    fn advance(&mut self) -> bool {
        for name in self.names.by_ref() {
            let path = self.state.join(&name);
            let info = self.store.entry(&path.to_string_lossy());
            if self.state.accepts(&info) {
                self.state.prime(info);
                self.current = Some(name);
                return true;
            }
        }
        self.current = None;
        false
    }

    fn current_file_name(&self) -> Option<String> {
        self.current.clone()
    }
}
