//! The capability interface every backend implements.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::extension::{
    Extension, ExtensionRequest, ExtensionResponse, MapOptions, MappedRegion, MemoryMapFlags,
};
use crate::traits::EngineIterator;
use crate::{DirFilters, EngineError, FileFlags, FileName, FileOwner, FileTime, OpenMode, Permissions};

fn unsupported<T>(operation: &'static str) -> Result<T, EngineError> {
    Err(EngineError::NotSupported { operation })
}

/// File and directory operations for one storage medium.
///
/// An engine is bound to exactly one path at a time (see
/// [`set_file_name`](Self::set_file_name)) and is stateful across
/// `open` → operate → `close`. Every method has a default that reports the
/// operation as unsupported (or returns an empty value), so a minimal engine
/// only implements what its medium can do.
///
/// # Ownership
///
/// Engines are single-owner objects: methods that change state take
/// `&mut self` and no internal locking is expected. Engines are `Send` so
/// they can be handed to another thread, but not shared between threads.
///
/// # Errors
///
/// Failing operations return an [`EngineError`], whose
/// [`kind`](EngineError::kind) and message form the structured error pair.
/// Engines that also keep the last failure around report it through
/// [`error`](Self::error).
///
/// # Example
///
/// ```rust
/// use anyfs_engine::{EngineError, FileEngine, OpenMode, Permissions};
///
/// /// An engine that swallows everything written to it.
/// #[derive(Default)]
/// struct Sink {
///     open: bool,
///     written: u64,
/// }
///
/// impl FileEngine for Sink {
///     fn open(&mut self, mode: OpenMode, _: Option<Permissions>) -> Result<(), EngineError> {
///         self.open = mode.is_writable();
///         Ok(())
///     }
///
///     fn write(&mut self, data: &[u8]) -> Result<usize, EngineError> {
///         self.written += data.len() as u64;
///         Ok(data.len())
///     }
///
///     fn size(&self) -> u64 {
///         self.written
///     }
/// }
///
/// let mut sink = Sink::default();
/// sink.open(OpenMode::WRITE_ONLY, None).unwrap();
/// assert_eq!(sink.write(b"abc").unwrap(), 3);
/// assert!(sink.seek(0).is_err()); // not implemented, so unsupported
/// ```
pub trait FileEngine: Send {
    /// Rebind the engine to another path.
    fn set_file_name(&mut self, path: &Path) {
        let _ = path;
    }

    /// Report one of the engine's names.
    fn file_name(&self, which: FileName) -> Option<PathBuf> {
        let _ = which;
        None
    }

    /// Open the bound path.
    ///
    /// `permissions` applies only when the open creates the file. A failed
    /// open must leave no side effects behind.
    fn open(&mut self, mode: OpenMode, permissions: Option<Permissions>) -> Result<(), EngineError> {
        let _ = (mode, permissions);
        unsupported("open")
    }

    /// Close the engine, flushing what it buffers.
    fn close(&mut self) -> Result<(), EngineError> {
        unsupported("close")
    }

    /// Push buffered data to the operating system.
    fn flush(&mut self) -> Result<(), EngineError> {
        unsupported("flush")
    }

    /// Push data all the way to the storage device.
    fn sync_to_disk(&mut self) -> Result<(), EngineError> {
        unsupported("sync_to_disk")
    }

    /// Size of the bound file in bytes.
    fn size(&self) -> u64 {
        0
    }

    /// Current read/write position.
    fn pos(&self) -> u64 {
        0
    }

    /// Move the read/write position. Only valid for non-sequential engines.
    fn seek(&mut self, pos: u64) -> Result<(), EngineError> {
        let _ = pos;
        unsupported("seek")
    }

    /// Returns `true` for streams that cannot seek.
    fn is_sequential(&self) -> bool {
        false
    }

    /// Remove the bound file.
    fn remove(&mut self) -> Result<(), EngineError> {
        unsupported("remove")
    }

    /// Copy the bound file to `new_name`.
    fn copy(&mut self, new_name: &Path) -> Result<(), EngineError> {
        let _ = new_name;
        unsupported("copy")
    }

    /// Rename the bound file; fails if `new_name` exists.
    fn rename(&mut self, new_name: &Path) -> Result<(), EngineError> {
        let _ = new_name;
        unsupported("rename")
    }

    /// Atomically replace `new_name` with the bound file.
    fn rename_overwrite(&mut self, new_name: &Path) -> Result<(), EngineError> {
        let _ = new_name;
        unsupported("rename_overwrite")
    }

    /// Create a link named `new_name` pointing at the bound file.
    fn link(&mut self, new_name: &Path) -> Result<(), EngineError> {
        let _ = new_name;
        unsupported("link")
    }

    /// Create `dir`, and its missing parents when `create_parents` is set.
    fn mkdir(
        &self,
        dir: &Path,
        create_parents: bool,
        permissions: Option<Permissions>,
    ) -> Result<(), EngineError> {
        let _ = (dir, create_parents, permissions);
        unsupported("mkdir")
    }

    /// Remove `dir`, and then its parents while they are empty when
    /// `remove_parents` is set.
    fn rmdir(&self, dir: &Path, remove_parents: bool) -> Result<(), EngineError> {
        let _ = (dir, remove_parents);
        unsupported("rmdir")
    }

    /// Truncate or zero-extend the bound file.
    fn set_size(&mut self, size: u64) -> Result<(), EngineError> {
        let _ = size;
        unsupported("set_size")
    }

    /// Returns `true` if names are case sensitive on this medium.
    fn case_sensitive(&self) -> bool {
        false
    }

    /// Returns `true` if the bound path is relative.
    fn is_relative_path(&self) -> bool {
        false
    }

    /// Names of the entries of the bound directory.
    ///
    /// Empty, never an error, when the bound path is not a readable directory.
    fn entry_list(&self, filters: DirFilters, name_filters: &[String]) -> Vec<String> {
        let Some(mut entries) = self.begin_entry_list(filters, name_filters) else {
            return Vec::new();
        };
        let mut names = Vec::new();
        while entries.advance() {
            if let Some(name) = entries.current_file_name() {
                names.push(name);
            }
        }
        names
    }

    /// Start a lazy listing of the bound directory.
    fn begin_entry_list(
        &self,
        filters: DirFilters,
        name_filters: &[String],
    ) -> Option<Box<dyn EngineIterator>> {
        let _ = (filters, name_filters);
        None
    }

    /// Flags of the bound path.
    ///
    /// `mask` is a hint: engines may skip probes for bits outside it, or
    /// ignore it and report everything.
    fn file_flags(&self, mask: FileFlags) -> FileFlags {
        let _ = mask;
        FileFlags::empty()
    }

    /// Change the permissions of the bound file.
    fn set_permissions(&mut self, permissions: Permissions) -> Result<(), EngineError> {
        let _ = permissions;
        unsupported("set_permissions")
    }

    /// Opaque identity of the bound file; equal ids mean the same file.
    fn id(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Numeric id of the owning user or group.
    fn owner_id(&self, owner: FileOwner) -> Option<u32> {
        let _ = owner;
        None
    }

    /// Name of the owning user or group.
    fn owner(&self, owner: FileOwner) -> Option<String> {
        let _ = owner;
        None
    }

    /// One of the bound file's timestamps.
    fn file_time(&self, which: FileTime) -> Option<SystemTime> {
        let _ = which;
        None
    }

    /// Change one of the bound file's timestamps.
    fn set_file_time(&mut self, time: SystemTime, which: FileTime) -> Result<(), EngineError> {
        let _ = (time, which);
        unsupported("set_file_time")
    }

    /// Copy the bound file's content into `target` using a backend-specific
    /// shortcut.
    fn clone_to(&mut self, target: &mut dyn FileEngine) -> Result<(), EngineError> {
        let _ = target;
        unsupported("clone_to")
    }

    /// Read up to `buf.len()` bytes.
    ///
    /// `Ok(0)` means no data right now; for sequential engines that is not
    /// necessarily the end of the stream, see [`at_end`](Self::at_end).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EngineError> {
        let _ = buf;
        unsupported("read")
    }

    /// Write `data`, returning how many bytes were accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize, EngineError> {
        let _ = data;
        unsupported("write")
    }

    /// Read one line, newline included, up to `buf.len()` bytes.
    ///
    /// The default reads one byte at a time. It fails only when not a single
    /// byte could be read. Engines with a faster path override this and
    /// advertise [`Extension::FastReadLine`].
    fn read_line(&mut self, buf: &mut [u8]) -> Result<usize, EngineError> {
        let mut read_so_far = 0;
        while read_so_far < buf.len() {
            let mut byte = [0u8; 1];
            match self.read(&mut byte) {
                Ok(0) => {
                    return if read_so_far > 0 {
                        Ok(read_so_far)
                    } else {
                        Err(EngineError::EndOfData)
                    };
                }
                Ok(_) => {}
                Err(e) => return if read_so_far > 0 { Ok(read_so_far) } else { Err(e) },
            }
            buf[read_so_far] = byte[0];
            read_so_far += 1;
            if byte[0] == b'\n' {
                break;
            }
        }
        Ok(read_so_far)
    }

    /// The last error this engine recorded, if it keeps one.
    fn error(&self) -> Option<&EngineError> {
        None
    }

    /// Returns `true` if [`extension`](Self::extension) handles `extension`.
    fn supports_extension(&self, extension: Extension) -> bool {
        let _ = extension;
        false
    }

    /// Handle an extension request; `None` when unsupported.
    fn extension(&mut self, request: &ExtensionRequest<'_>) -> Option<ExtensionResponse> {
        let _ = request;
        None
    }

    /// Run `request` and store the answer in `response`.
    ///
    /// Returns `false`, leaving `response` untouched, when the engine does
    /// not handle the request.
    fn extension_into(
        &mut self,
        request: &ExtensionRequest<'_>,
        response: &mut ExtensionResponse,
    ) -> bool {
        match self.extension(request) {
            Some(answer) => {
                *response = answer;
                true
            }
            None => false,
        }
    }

    /// Returns `true` if the read position is at the end of the data.
    ///
    /// Backed by [`Extension::AtEnd`]; engines without it report `false`.
    fn at_end(&mut self) -> bool {
        matches!(
            self.extension(&ExtensionRequest::AtEnd),
            Some(ExtensionResponse::AtEnd(true))
        )
    }

    /// Map `size` bytes starting at `offset`. Backed by [`Extension::Map`].
    fn map(&mut self, offset: u64, size: u64, flags: MemoryMapFlags) -> Option<MappedRegion> {
        let options = MapOptions {
            offset,
            size,
            flags,
        };
        match self.extension(&ExtensionRequest::Map(options)) {
            Some(ExtensionResponse::Map(region)) => Some(region),
            _ => None,
        }
    }

    /// Release a region obtained from [`map`](Self::map).
    fn unmap(&mut self, region: &MappedRegion) -> bool {
        self.extension(&ExtensionRequest::UnMap(region)).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Engine that implements nothing.
    struct Bare;

    impl FileEngine for Bare {}

    /// Engine serving a fixed buffer one byte per read.
    struct Drip {
        data: Vec<u8>,
        pos: usize,
    }

    impl Drip {
        fn new(data: &[u8]) -> Self {
            Self {
                data: data.to_vec(),
                pos: 0,
            }
        }
    }

    impl FileEngine for Drip {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, EngineError> {
            if self.pos >= self.data.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.data[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn file_engine_is_object_safe() {
        fn _check(_: &dyn FileEngine) {}
        let boxed: Box<dyn FileEngine> = Box::new(Bare);
        _check(boxed.as_ref());
    }

    #[test]
    fn defaults_report_unsupported() {
        let mut bare = Bare;
        assert!(matches!(
            bare.open(OpenMode::READ_ONLY, None),
            Err(EngineError::NotSupported { operation: "open" })
        ));
        assert!(bare.seek(10).is_err());
        assert!(bare.remove().is_err());
        assert!(bare.rename_overwrite(Path::new("/x")).is_err());
        assert!(bare.mkdir(Path::new("/d"), true, None).is_err());
        assert!(bare.rmdir(Path::new("/d"), false).is_err());
        assert!(bare.set_size(0).is_err());
        assert_eq!(bare.size(), 0);
        assert!(bare.file_flags(FileFlags::ALL).is_empty());
        assert!(bare.id().is_empty());
        assert!(bare.file_name(FileName::Default).is_none());
        assert!(bare.error().is_none());
    }

    #[test]
    fn entry_list_is_empty_without_iterator() {
        assert!(Bare.entry_list(DirFilters::default(), &[]).is_empty());
    }

    #[test]
    fn read_line_stops_at_newline() {
        let mut drip = Drip::new(b"one\ntwo\n");
        let mut buf = [0u8; 16];
        let n = drip.read_line(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"one\n");
        let n = drip.read_line(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"two\n");
        assert!(matches!(drip.read_line(&mut buf), Err(EngineError::EndOfData)));
    }

    #[test]
    fn read_line_respects_max_len() {
        let mut drip = Drip::new(b"abcdef\n");
        let mut buf = [0u8; 3];
        assert_eq!(drip.read_line(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn read_line_returns_partial_line_at_end() {
        let mut drip = Drip::new(b"tail");
        let mut buf = [0u8; 16];
        let n = drip.read_line(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"tail");
    }

    #[test]
    fn read_line_propagates_error_when_nothing_read() {
        let mut bare = Bare;
        let mut buf = [0u8; 4];
        assert!(matches!(
            bare.read_line(&mut buf),
            Err(EngineError::NotSupported { operation: "read" })
        ));
    }

    #[test]
    fn unsupported_extension_leaves_response_untouched() {
        let mut bare = Bare;
        assert!(!bare.supports_extension(Extension::Map));

        let mut response = ExtensionResponse::AtEnd(true);
        let options = MapOptions {
            offset: 0,
            size: 4,
            flags: MemoryMapFlags::empty(),
        };
        assert!(!bare.extension_into(&ExtensionRequest::Map(options), &mut response));
        assert!(matches!(response, ExtensionResponse::AtEnd(true)));
    }

    #[test]
    fn extension_helpers_default_to_nothing() {
        let mut bare = Bare;
        assert!(!bare.at_end());
        assert!(bare.map(0, 1, MemoryMapFlags::empty()).is_none());
    }
}
