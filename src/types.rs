//! Core types shared by engines, iterators and save sessions.

use std::path::PathBuf;

bitflags::bitflags! {
    /// Mode a file engine is opened with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct OpenMode: u32 {
        /// Open for reading.
        const READ_ONLY = 0x0001;
        /// Open for writing.
        const WRITE_ONLY = 0x0002;
        /// Open for reading and writing.
        const READ_WRITE = Self::READ_ONLY.bits() | Self::WRITE_ONLY.bits();
        /// Writes go to the end of the file.
        const APPEND = 0x0004;
        /// Truncate the file on open.
        const TRUNCATE = 0x0008;
        /// Text mode (line ending translation is the caller's business).
        const TEXT = 0x0010;
        /// Bypass any caller-side write buffer.
        const UNBUFFERED = 0x0020;
        /// Fail if the file already exists.
        const NEW_ONLY = 0x0040;
        /// Fail if the file does not exist.
        const EXISTING_ONLY = 0x0080;
    }
}

impl OpenMode {
    /// Returns `true` if the mode carries a write intent.
    #[inline]
    pub const fn is_writable(&self) -> bool {
        self.contains(Self::WRITE_ONLY)
    }

    /// Returns `true` if the mode carries a read intent.
    #[inline]
    pub const fn is_readable(&self) -> bool {
        self.contains(Self::READ_ONLY)
    }

    /// Returns `true` if opening for write should drop existing content.
    ///
    /// Write-only opens truncate unless they append, read, or are
    /// restricted to existing files.
    pub fn truncates(&self) -> bool {
        if self.contains(Self::TRUNCATE) {
            return true;
        }
        self.is_writable()
            && !self.intersects(Self::READ_ONLY | Self::APPEND | Self::EXISTING_ONLY)
    }
}

/// Unix-style permissions stored as a mode bitmask.
///
/// The save layer never interprets these bits, it only forwards them between
/// engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Permissions(u32);

impl Permissions {
    /// Create permissions from a Unix mode (e.g., 0o755).
    #[inline]
    pub const fn from_mode(mode: u32) -> Self {
        Self(mode & 0o7777)
    }

    /// Get the raw mode value.
    #[inline]
    pub const fn mode(&self) -> u32 {
        self.0
    }

    /// Returns `true` if these permissions deny writing.
    #[inline]
    pub const fn readonly(&self) -> bool {
        (self.0 & 0o222) == 0
    }

    /// Owner read/write only (0o600), used for staging files.
    #[inline]
    pub const fn owner_only() -> Self {
        Self(0o600)
    }

    /// Default permissions for a new file (0o666 before the umask).
    #[inline]
    pub const fn default_file() -> Self {
        Self(0o666)
    }

    /// Default permissions for a new directory (0o777 before the umask).
    #[inline]
    pub const fn default_dir() -> Self {
        Self(0o777)
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::default_file()
    }
}

bitflags::bitflags! {
    /// Permission, type and attribute bits reported by
    /// [`FileEngine::file_flags`](crate::FileEngine::file_flags).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct FileFlags: u32 {
        /// Other may execute.
        const EXE_OTHER = 0o001;
        /// Other may write.
        const WRITE_OTHER = 0o002;
        /// Other may read.
        const READ_OTHER = 0o004;
        /// Group may execute.
        const EXE_GROUP = 0o010;
        /// Group may write.
        const WRITE_GROUP = 0o020;
        /// Group may read.
        const READ_GROUP = 0o040;
        /// Owner may execute.
        const EXE_OWNER = 0o100;
        /// Owner may write.
        const WRITE_OWNER = 0o200;
        /// Owner may read.
        const READ_OWNER = 0o400;
        /// The current user may execute.
        const EXE_USER = 0x1000;
        /// The current user may write.
        const WRITE_USER = 0x2000;
        /// The current user may read.
        const READ_USER = 0x4000;
        /// All permission bits.
        const PERMS_MASK = 0xFFFF;

        /// The path is a symbolic link.
        const LINK_TYPE = 0x1_0000;
        /// The path is a regular file.
        const FILE_TYPE = 0x2_0000;
        /// The path is a directory.
        const DIRECTORY_TYPE = 0x4_0000;
        /// The path is a bundle.
        const BUNDLE_TYPE = 0x8_0000;
        /// All type bits.
        const TYPES_MASK = 0xF_0000;

        /// The entry is hidden.
        const HIDDEN = 0x10_0000;
        /// The entry lives on a local disk.
        const LOCAL_DISK = 0x20_0000;
        /// The entry exists.
        const EXISTS = 0x40_0000;
        /// The entry is a filesystem root.
        const ROOT = 0x80_0000;
        /// Ask the engine to drop cached metadata before answering.
        const REFRESH = 0x100_0000;
        /// All attribute bits.
        const FLAGS_MASK = 0xFF0_0000;
    }
}

impl FileFlags {
    /// Everything an engine can report.
    pub const ALL: Self = Self::PERMS_MASK
        .union(Self::TYPES_MASK)
        .union(Self::FLAGS_MASK);

    /// The owner/group/other bits as [`Permissions`].
    #[inline]
    pub const fn permissions(&self) -> Permissions {
        Permissions::from_mode(self.bits() & 0o777)
    }

    /// The owner/group/other bits of `permissions` as flags.
    #[inline]
    pub const fn from_permissions(permissions: Permissions) -> Self {
        Self::from_bits_truncate(permissions.mode() & 0o777)
    }
}

bitflags::bitflags! {
    /// Entry filters for directory listings.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct DirFilters: u32 {
        /// List directories.
        const DIRS = 0x001;
        /// List files.
        const FILES = 0x002;
        /// List drives.
        const DRIVES = 0x004;
        /// Skip symbolic links.
        const NO_SYMLINKS = 0x008;
        /// Keep only entries the current user may read.
        const READABLE = 0x010;
        /// Keep only entries the current user may write.
        const WRITABLE = 0x020;
        /// Keep only entries the current user may execute.
        const EXECUTABLE = 0x040;
        /// Keep only modified entries.
        const MODIFIED = 0x080;
        /// Include hidden entries.
        const HIDDEN = 0x100;
        /// Include system entries.
        const SYSTEM = 0x200;
        /// List all directories regardless of name filters.
        const ALL_DIRS = 0x400;
        /// Match name filters case sensitively.
        const CASE_SENSITIVE = 0x800;
        /// Skip `.`.
        const NO_DOT = 0x2000;
        /// Skip `..`.
        const NO_DOT_DOT = 0x4000;

        /// Files, directories and drives.
        const ALL_ENTRIES = Self::DIRS.bits() | Self::FILES.bits() | Self::DRIVES.bits();
        /// Skip both `.` and `..`.
        const NO_DOT_AND_DOT_DOT = Self::NO_DOT.bits() | Self::NO_DOT_DOT.bits();
    }
}

impl Default for DirFilters {
    fn default() -> Self {
        Self::ALL_ENTRIES
    }
}

/// Which name of a file an engine should report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileName {
    /// The name the engine was bound to.
    Default,
    /// The last path component.
    Base,
    /// The directory part of the bound name.
    Path,
    /// The absolute name.
    Absolute,
    /// The directory part of the absolute name.
    AbsolutePath,
    /// The absolute name with symlinks resolved.
    Canonical,
    /// The directory part of the canonical name.
    CanonicalPath,
    /// The absolute target of a symbolic link.
    Link,
    /// The enclosing bundle.
    Bundle,
}

/// Whose identity [`FileEngine::owner_id`](crate::FileEngine::owner_id) reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileOwner {
    /// The owning user.
    User,
    /// The owning group.
    Group,
}

/// Which timestamp to read or set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileTime {
    /// Last access.
    Access,
    /// Creation.
    Birth,
    /// Last metadata change.
    MetadataChange,
    /// Last content modification.
    Modification,
}

/// Type of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

/// Metadata for one directory entry, as seen through its engine.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntryInfo {
    /// Name of the entry (last component only).
    pub name: String,
    /// Full path to the entry.
    pub path: PathBuf,
    /// Flags reported by the entry's engine.
    pub flags: FileFlags,
    /// Size in bytes.
    pub size: u64,
}

impl EntryInfo {
    /// Type of the entry, if it exists.
    ///
    /// Symbolic links report [`FileType::Symlink`] even when they point at
    /// a file or directory.
    pub fn file_type(&self) -> Option<FileType> {
        if self.flags.contains(FileFlags::LINK_TYPE) {
            Some(FileType::Symlink)
        } else if self.flags.contains(FileFlags::DIRECTORY_TYPE) {
            Some(FileType::Directory)
        } else if self.flags.contains(FileFlags::FILE_TYPE) {
            Some(FileType::File)
        } else {
            None
        }
    }

    /// Returns `true` if the entry exists.
    #[inline]
    pub fn exists(&self) -> bool {
        self.flags.contains(FileFlags::EXISTS)
    }

    /// Returns `true` if the entry is (or links to) a directory.
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.flags.contains(FileFlags::DIRECTORY_TYPE)
    }

    /// Returns `true` if the entry is (or links to) a regular file.
    #[inline]
    pub fn is_file(&self) -> bool {
        self.flags.contains(FileFlags::FILE_TYPE)
    }
}
