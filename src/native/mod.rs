//! # Native Backend
//!
//! Engines backed by the host filesystem through `std::fs`.
//!
//! | Type | Role |
//! |------|------|
//! | [`NativeEngine`] | Default engine for every path no handler claims |
//! | [`NativeIterator`] | Lazy `read_dir` cursor with filtering |
//! | [`TemporaryEngine`] | Staging file for atomic saves |
//!
//! `std::fs::read_dir` never yields `.` and `..`, so native listings never
//! contain them regardless of [`DirFilters::NO_DOT_AND_DOT_DOT`].

mod temporary;

pub use temporary::TemporaryEngine;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::extension::{Extension, ExtensionRequest, ExtensionResponse};
use crate::{
    DirFilters, EngineError, EngineIterator, EntryInfo, FileEngine, FileError, FileFlags,
    FileName, FileOwner, FileTime, IteratorState, OpenMode, Permissions,
};

/// Engine for a path on the host filesystem.
///
/// Keeps the last failure, available through [`FileEngine::error`].
#[derive(Debug)]
pub struct NativeEngine {
    path: PathBuf,
    file: Option<File>,
    last_error: Option<EngineError>,
}

impl NativeEngine {
    /// Bind a new engine to `path`. Nothing is touched until `open`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
            last_error: None,
        }
    }

    /// The bound path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` while a file handle is open.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn fail<T>(&mut self, error: EngineError) -> Result<T, EngineError> {
        self.last_error = Some(error.clone());
        Err(error)
    }

    fn open_file(&mut self) -> Result<&mut File, EngineError> {
        match self.file.as_mut() {
            Some(file) => Ok(file),
            None => {
                self.last_error = Some(EngineError::NotOpen);
                Err(EngineError::NotOpen)
            }
        }
    }

    fn metadata(&self) -> io::Result<fs::Metadata> {
        match &self.file {
            Some(file) => file.metadata(),
            None => fs::metadata(&self.path),
        }
    }
}

/// Write as much of `data` as the sink accepts, retrying on interrupts.
///
/// Fails only when nothing at all was written.
pub(crate) fn write_counted(sink: &mut impl Write, data: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < data.len() {
        match sink.write(&data[written..]) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if written == 0 => return Err(e),
            Err(_) => break,
        }
    }
    Ok(written)
}

/// Flags for a path on the host filesystem.
pub(crate) fn native_flags(path: &Path, mask: FileFlags) -> FileFlags {
    let mut flags = FileFlags::empty();
    let Ok(link_meta) = fs::symlink_metadata(path) else {
        return flags;
    };
    let meta = if link_meta.file_type().is_symlink() {
        flags |= FileFlags::LINK_TYPE;
        match fs::metadata(path) {
            Ok(meta) => meta,
            // Dangling link.
            Err(_) => return flags,
        }
    } else {
        link_meta
    };

    flags |= FileFlags::EXISTS | FileFlags::LOCAL_DISK;
    if meta.is_dir() {
        flags |= FileFlags::DIRECTORY_TYPE;
    } else if meta.is_file() {
        flags |= FileFlags::FILE_TYPE;
    }
    if path
        .file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
    {
        flags |= FileFlags::HIDDEN;
    }
    if path.parent().is_none() && path.has_root() {
        flags |= FileFlags::ROOT;
    }
    if mask.intersects(FileFlags::PERMS_MASK) {
        flags |= permission_flags(path, &meta);
    }
    flags
}

#[cfg(unix)]
fn permission_flags(path: &Path, meta: &fs::Metadata) -> FileFlags {
    use rustix::fs::Access;
    use std::os::unix::fs::PermissionsExt;

    let mut flags = FileFlags::from_bits_truncate(meta.permissions().mode() & 0o777);
    let probes = [
        (Access::READ_OK, FileFlags::READ_USER),
        (Access::WRITE_OK, FileFlags::WRITE_USER),
        (Access::EXEC_OK, FileFlags::EXE_USER),
    ];
    for (access, flag) in probes {
        if rustix::fs::access(path, access).is_ok() {
            flags |= flag;
        }
    }
    flags
}

#[cfg(not(unix))]
fn permission_flags(_path: &Path, meta: &fs::Metadata) -> FileFlags {
    let mut flags = FileFlags::READ_OWNER
        | FileFlags::READ_GROUP
        | FileFlags::READ_OTHER
        | FileFlags::READ_USER;
    if !meta.permissions().readonly() {
        flags |= FileFlags::WRITE_OWNER
            | FileFlags::WRITE_GROUP
            | FileFlags::WRITE_OTHER
            | FileFlags::WRITE_USER;
    }
    flags
}

fn parent_or_dot(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

impl FileEngine for NativeEngine {
    fn set_file_name(&mut self, path: &Path) {
        self.file = None;
        self.path = path.to_path_buf();
    }

    fn file_name(&self, which: FileName) -> Option<PathBuf> {
        match which {
            FileName::Default => Some(self.path.clone()),
            FileName::Base => self.path.file_name().map(PathBuf::from),
            FileName::Path => Some(parent_or_dot(&self.path)),
            FileName::Absolute => std::path::absolute(&self.path).ok(),
            FileName::AbsolutePath => {
                std::path::absolute(&self.path).ok().map(|p| parent_or_dot(&p))
            }
            FileName::Canonical => fs::canonicalize(&self.path).ok(),
            FileName::CanonicalPath => fs::canonicalize(&self.path).ok().map(|p| parent_or_dot(&p)),
            FileName::Link => {
                let target = fs::read_link(&self.path).ok()?;
                if target.is_relative() {
                    Some(parent_or_dot(&self.path).join(target))
                } else {
                    Some(target)
                }
            }
            FileName::Bundle => None,
        }
    }

    fn open(&mut self, mode: OpenMode, permissions: Option<Permissions>) -> Result<(), EngineError> {
        let mut options = OpenOptions::new();
        let writes = mode.is_writable() || mode.contains(OpenMode::APPEND);
        options
            .read(mode.is_readable())
            .write(writes && !mode.contains(OpenMode::APPEND))
            .append(mode.contains(OpenMode::APPEND))
            .truncate(writes && mode.truncates() && !mode.contains(OpenMode::APPEND));
        if mode.contains(OpenMode::NEW_ONLY) {
            options.create_new(true);
        } else if writes && !mode.contains(OpenMode::EXISTING_ONLY) {
            options.create(true);
        }
        #[cfg(unix)]
        if let Some(permissions) = permissions {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(permissions.mode());
        }
        #[cfg(not(unix))]
        let _ = permissions;

        match options.open(&self.path) {
            Ok(file) => {
                tracing::trace!(path = %self.path.display(), ?mode, "opened native file");
                self.file = Some(file);
                Ok(())
            }
            Err(e) => self.fail(EngineError::io(FileError::Open, "open", &self.path, &e)),
        }
    }

    fn close(&mut self) -> Result<(), EngineError> {
        let result = self.flush();
        self.file = None;
        if result.is_err() {
            return result;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), EngineError> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        if let Err(e) = file.flush() {
            return self.fail(EngineError::io(FileError::Write, "flush", &self.path, &e));
        }
        Ok(())
    }

    fn sync_to_disk(&mut self) -> Result<(), EngineError> {
        let file = self.open_file()?;
        if let Err(e) = file.sync_all() {
            return self.fail(EngineError::io(FileError::Write, "sync", &self.path, &e));
        }
        Ok(())
    }

    fn size(&self) -> u64 {
        self.metadata().map(|meta| meta.len()).unwrap_or(0)
    }

    fn pos(&self) -> u64 {
        let Some(mut file) = self.file.as_ref() else {
            return 0;
        };
        file.stream_position().unwrap_or(0)
    }

    fn seek(&mut self, pos: u64) -> Result<(), EngineError> {
        let file = self.open_file()?;
        if let Err(e) = file.seek(SeekFrom::Start(pos)) {
            return self.fail(EngineError::io(FileError::Position, "seek", &self.path, &e));
        }
        Ok(())
    }

    fn remove(&mut self) -> Result<(), EngineError> {
        if let Err(e) = fs::remove_file(&self.path) {
            return self.fail(EngineError::io(FileError::Remove, "remove", &self.path, &e));
        }
        Ok(())
    }

    fn copy(&mut self, new_name: &Path) -> Result<(), EngineError> {
        if let Err(e) = fs::copy(&self.path, new_name) {
            return self.fail(EngineError::io(FileError::Copy, "copy", new_name, &e));
        }
        Ok(())
    }

    fn rename(&mut self, new_name: &Path) -> Result<(), EngineError> {
        if fs::symlink_metadata(new_name).is_ok() {
            let e = io::Error::from(io::ErrorKind::AlreadyExists);
            return self.fail(EngineError::io(FileError::Rename, "rename", new_name, &e));
        }
        self.rename_overwrite(new_name)
    }

    fn rename_overwrite(&mut self, new_name: &Path) -> Result<(), EngineError> {
        if let Err(e) = fs::rename(&self.path, new_name) {
            return self.fail(EngineError::io(FileError::Rename, "rename", new_name, &e));
        }
        self.path = new_name.to_path_buf();
        Ok(())
    }

    fn link(&mut self, new_name: &Path) -> Result<(), EngineError> {
        #[cfg(unix)]
        {
            if let Err(e) = std::os::unix::fs::symlink(&self.path, new_name) {
                return self.fail(EngineError::io(FileError::Rename, "link", new_name, &e));
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            let _ = new_name;
            self.fail(EngineError::NotSupported { operation: "link" })
        }
    }

    fn mkdir(
        &self,
        dir: &Path,
        create_parents: bool,
        permissions: Option<Permissions>,
    ) -> Result<(), EngineError> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(create_parents);
        #[cfg(unix)]
        if let Some(permissions) = permissions {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(permissions.mode());
        }
        #[cfg(not(unix))]
        let _ = permissions;
        builder
            .create(dir)
            .map_err(|e| EngineError::io(FileError::Unspecified, "mkdir", dir, &e))
    }

    fn rmdir(&self, dir: &Path, remove_parents: bool) -> Result<(), EngineError> {
        fs::remove_dir(dir).map_err(|e| EngineError::io(FileError::Remove, "rmdir", dir, &e))?;
        if remove_parents {
            let mut current = dir.parent();
            while let Some(parent) = current.filter(|p| !p.as_os_str().is_empty()) {
                if fs::remove_dir(parent).is_err() {
                    break;
                }
                current = parent.parent();
            }
        }
        Ok(())
    }

    fn set_size(&mut self, size: u64) -> Result<(), EngineError> {
        let result = match &self.file {
            Some(file) => file.set_len(size),
            None => OpenOptions::new()
                .write(true)
                .open(&self.path)
                .and_then(|file| file.set_len(size)),
        };
        if let Err(e) = result {
            return self.fail(EngineError::io(FileError::Resize, "set_size", &self.path, &e));
        }
        Ok(())
    }

    fn case_sensitive(&self) -> bool {
        !cfg!(any(windows, target_os = "macos"))
    }

    fn is_relative_path(&self) -> bool {
        self.path.is_relative()
    }

    fn begin_entry_list(
        &self,
        filters: DirFilters,
        name_filters: &[String],
    ) -> Option<Box<dyn EngineIterator>> {
        Some(Box::new(NativeIterator::new(&self.path, filters, name_filters)))
    }

    fn file_flags(&self, mask: FileFlags) -> FileFlags {
        native_flags(&self.path, mask)
    }

    fn set_permissions(&mut self, permissions: Permissions) -> Result<(), EngineError> {
        #[cfg(unix)]
        let perms = {
            use std::os::unix::fs::PermissionsExt;
            fs::Permissions::from_mode(permissions.mode())
        };
        #[cfg(not(unix))]
        let perms = {
            let mut perms = match fs::metadata(&self.path) {
                Ok(meta) => meta.permissions(),
                Err(e) => {
                    return self.fail(EngineError::io(
                        FileError::Permissions,
                        "set_permissions",
                        &self.path,
                        &e,
                    ));
                }
            };
            perms.set_readonly(permissions.readonly());
            perms
        };
        if let Err(e) = fs::set_permissions(&self.path, perms) {
            return self.fail(EngineError::io(
                FileError::Permissions,
                "set_permissions",
                &self.path,
                &e,
            ));
        }
        Ok(())
    }

    fn id(&self) -> Vec<u8> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let Ok(meta) = self.metadata() else {
                return Vec::new();
            };
            let mut id = meta.dev().to_le_bytes().to_vec();
            id.extend_from_slice(&meta.ino().to_le_bytes());
            id
        }
        #[cfg(not(unix))]
        {
            Vec::new()
        }
    }

    fn owner_id(&self, owner: FileOwner) -> Option<u32> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let meta = self.metadata().ok()?;
            Some(match owner {
                FileOwner::User => meta.uid(),
                FileOwner::Group => meta.gid(),
            })
        }
        #[cfg(not(unix))]
        {
            let _ = owner;
            None
        }
    }

    fn file_time(&self, which: FileTime) -> Option<SystemTime> {
        let meta = self.metadata().ok()?;
        match which {
            FileTime::Access => meta.accessed().ok(),
            FileTime::Birth => meta.created().ok(),
            FileTime::Modification => meta.modified().ok(),
            FileTime::MetadataChange => {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::MetadataExt;
                    let secs = u64::try_from(meta.ctime()).ok()?;
                    let nanos = u32::try_from(meta.ctime_nsec()).ok()?;
                    Some(SystemTime::UNIX_EPOCH + std::time::Duration::new(secs, nanos))
                }
                #[cfg(not(unix))]
                {
                    None
                }
            }
        }
    }

    fn set_file_time(&mut self, time: SystemTime, which: FileTime) -> Result<(), EngineError> {
        let times = match which {
            FileTime::Access => fs::FileTimes::new().set_accessed(time),
            FileTime::Modification => fs::FileTimes::new().set_modified(time),
            FileTime::Birth | FileTime::MetadataChange => {
                return self.fail(EngineError::NotSupported {
                    operation: "set_file_time",
                });
            }
        };
        let result = match &self.file {
            Some(file) => file.set_times(times),
            None => File::open(&self.path).and_then(|file| file.set_times(times)),
        };
        if let Err(e) = result {
            return self.fail(EngineError::io(
                FileError::Unspecified,
                "set_file_time",
                &self.path,
                &e,
            ));
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EngineError> {
        let file = self.open_file()?;
        match file.read(buf) {
            Ok(n) => Ok(n),
            Err(e) => self.fail(EngineError::io(FileError::Read, "read", &self.path, &e)),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, EngineError> {
        let file = self.open_file()?;
        match write_counted(file, data) {
            Ok(n) => Ok(n),
            Err(e) => self.fail(EngineError::io(FileError::Write, "write", &self.path, &e)),
        }
    }

    fn error(&self) -> Option<&EngineError> {
        self.last_error.as_ref()
    }

    fn supports_extension(&self, extension: Extension) -> bool {
        extension == Extension::AtEnd
    }

    fn extension(&mut self, request: &ExtensionRequest<'_>) -> Option<ExtensionResponse> {
        match request {
            ExtensionRequest::AtEnd if self.file.is_some() => {
                Some(ExtensionResponse::AtEnd(self.pos() >= self.size()))
            }
            _ => None,
        }
    }
}

/// Lazy cursor over a host directory.
///
/// The directory is opened on the first [`advance`](EngineIterator::advance);
/// an unreadable directory simply yields nothing.
#[derive(Debug)]
pub struct NativeIterator {
    state: IteratorState,
    dir: PathBuf,
    entries: Option<fs::ReadDir>,
    started: bool,
    current: Option<String>,
}

impl NativeIterator {
    /// Cursor over `dir`.
    pub fn new(dir: impl AsRef<Path>, filters: DirFilters, name_filters: &[String]) -> Self {
        let dir = dir.as_ref().to_path_buf();
        Self {
            state: IteratorState::new(&dir, filters, name_filters),
            dir,
            entries: None,
            started: false,
            current: None,
        }
    }
}

impl EngineIterator for NativeIterator {
    fn state(&self) -> &IteratorState {
        &self.state
    }

    fn advance(&mut self) -> bool {
        if !self.started {
            self.started = true;
            match fs::read_dir(&self.dir) {
                Ok(entries) => self.entries = Some(entries),
                Err(e) => {
                    tracing::debug!(dir = %self.dir.display(), error = %e, "cannot list directory");
                }
            }
        }
        let Some(entries) = self.entries.as_mut() else {
            self.current = None;
            return false;
        };
        for entry in entries.by_ref() {
            let Ok(entry) = entry else { continue };
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = self.state.join(&name);
            let flags = native_flags(&path, FileFlags::ALL);
            let size = if flags.contains(FileFlags::FILE_TYPE) {
                fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0)
            } else {
                0
            };
            let info = EntryInfo {
                name: name.clone(),
                path,
                flags,
                size,
            };
            if self.state.accepts(&info) {
                self.state.prime(info);
                self.current = Some(name);
                return true;
            }
        }
        self.entries = None;
        self.current = None;
        false
    }

    fn current_file_name(&self) -> Option<String> {
        self.current.clone()
    }
}
