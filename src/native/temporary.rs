//! Staging files for atomic saves.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{native_flags, write_counted};
use crate::{EngineError, FileEngine, FileError, FileFlags, FileName, OpenMode, Permissions};

/// A uniquely named file created beside a destination, replaced onto it with
/// [`rename_overwrite`](FileEngine::rename_overwrite).
///
/// `open` creates `<name>.XXXXXX` in the destination's directory with the
/// requested permissions (owner-only by default). Until it is persisted the
/// file is deleted by [`remove`](FileEngine::remove) or when the engine is
/// dropped, so an abandoned save never leaves debris behind.
#[derive(Debug)]
pub struct TemporaryEngine {
    final_path: PathBuf,
    file: Option<NamedTempFile>,
    last_error: Option<EngineError>,
}

impl TemporaryEngine {
    /// Staging engine for `final_path`. Nothing is created until `open`.
    pub fn new(final_path: impl AsRef<Path>) -> Self {
        Self {
            final_path: final_path.as_ref().to_path_buf(),
            file: None,
            last_error: None,
        }
    }

    /// Path of the staging file, while it exists.
    pub fn staging_path(&self) -> Option<&Path> {
        self.file.as_ref().map(NamedTempFile::path)
    }

    fn fail<T>(&mut self, error: EngineError) -> Result<T, EngineError> {
        self.last_error = Some(error.clone());
        Err(error)
    }

    fn file_mut(&mut self) -> Result<&mut NamedTempFile, EngineError> {
        match self.file.as_mut() {
            Some(file) => Ok(file),
            None => {
                self.last_error = Some(EngineError::NotOpen);
                Err(EngineError::NotOpen)
            }
        }
    }

    fn staging_or_final(&self) -> PathBuf {
        self.staging_path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.final_path.clone())
    }
}

impl FileEngine for TemporaryEngine {
    fn set_file_name(&mut self, path: &Path) {
        self.file = None;
        self.final_path = path.to_path_buf();
    }

    fn file_name(&self, which: FileName) -> Option<PathBuf> {
        match which {
            FileName::Default | FileName::Absolute => self.staging_path().map(Path::to_path_buf),
            FileName::Base => self.staging_path()?.file_name().map(PathBuf::from),
            _ => None,
        }
    }

    fn open(&mut self, mode: OpenMode, permissions: Option<Permissions>) -> Result<(), EngineError> {
        if !mode.is_writable() {
            return self.fail(EngineError::UnsupportedOpenMode { mode });
        }
        let dir = match self.final_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let prefix = format!(
            "{}.",
            self.final_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        );

        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = permissions.unwrap_or_else(Permissions::owner_only).mode();
            builder.permissions(std::fs::Permissions::from_mode(mode));
        }
        #[cfg(not(unix))]
        let _ = permissions;

        match builder.tempfile_in(&dir) {
            Ok(file) => {
                tracing::debug!(
                    staging = %file.path().display(),
                    target = %self.final_path.display(),
                    "created staging file"
                );
                self.file = Some(file);
                Ok(())
            }
            Err(e) => self.fail(EngineError::io(FileError::Open, "open", &dir, &e)),
        }
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.flush()
    }

    fn flush(&mut self) -> Result<(), EngineError> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        if let Err(e) = file.flush() {
            let path = file.path().to_path_buf();
            return self.fail(EngineError::io(FileError::Write, "flush", path, &e));
        }
        Ok(())
    }

    fn sync_to_disk(&mut self) -> Result<(), EngineError> {
        let file = self.file_mut()?;
        if let Err(e) = file.as_file().sync_all() {
            let path = file.path().to_path_buf();
            return self.fail(EngineError::io(FileError::Write, "sync", path, &e));
        }
        Ok(())
    }

    fn size(&self) -> u64 {
        self.file
            .as_ref()
            .and_then(|file| file.as_file().metadata().ok())
            .map(|meta| meta.len())
            .unwrap_or(0)
    }

    fn pos(&self) -> u64 {
        let Some(file) = self.file.as_ref() else {
            return 0;
        };
        let mut handle = file.as_file();
        handle.stream_position().unwrap_or(0)
    }

    fn seek(&mut self, pos: u64) -> Result<(), EngineError> {
        let file = self.file_mut()?;
        if let Err(e) = file.seek(SeekFrom::Start(pos)) {
            let path = file.path().to_path_buf();
            return self.fail(EngineError::io(FileError::Position, "seek", path, &e));
        }
        Ok(())
    }

    fn remove(&mut self) -> Result<(), EngineError> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        let path = file.path().to_path_buf();
        if let Err(e) = file.close() {
            return self.fail(EngineError::io(FileError::Remove, "remove", path, &e));
        }
        tracing::debug!(staging = %path.display(), "removed staging file");
        Ok(())
    }

    fn rename_overwrite(&mut self, new_name: &Path) -> Result<(), EngineError> {
        let file = self.file_mut()?;
        file.flush().ok();
        let Some(file) = self.file.take() else {
            return Err(EngineError::NotOpen);
        };
        match file.persist(new_name) {
            Ok(_) => {
                tracing::debug!(target = %new_name.display(), "staging file persisted");
                self.final_path = new_name.to_path_buf();
                Ok(())
            }
            Err(persist) => {
                self.file = Some(persist.file);
                self.fail(EngineError::io(
                    FileError::Rename,
                    "rename",
                    new_name,
                    &persist.error,
                ))
            }
        }
    }

    fn file_flags(&self, mask: FileFlags) -> FileFlags {
        match self.staging_path() {
            Some(path) => native_flags(path, mask),
            None => FileFlags::empty(),
        }
    }

    fn set_permissions(&mut self, permissions: Permissions) -> Result<(), EngineError> {
        let path = self.staging_or_final();
        #[cfg(unix)]
        let result = {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(permissions.mode()))
        };
        #[cfg(not(unix))]
        let result = std::fs::metadata(&path).and_then(|meta| {
            let mut perms = meta.permissions();
            perms.set_readonly(permissions.readonly());
            std::fs::set_permissions(&path, perms)
        });
        if let Err(e) = result {
            return self.fail(EngineError::io(
                FileError::Permissions,
                "set_permissions",
                path,
                &e,
            ));
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EngineError> {
        let file = self.file_mut()?;
        match file.read(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                let path = file.path().to_path_buf();
                self.fail(EngineError::io(FileError::Read, "read", path, &e))
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, EngineError> {
        let file = self.file_mut()?;
        match write_counted(file, data) {
            Ok(n) => Ok(n),
            Err(e) => {
                let path = file.path().to_path_buf();
                self.fail(EngineError::io(FileError::Write, "write", path, &e))
            }
        }
    }

    fn error(&self) -> Option<&EngineError> {
        self.last_error.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn staging_file_sits_beside_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("doc.txt");
        let mut engine = TemporaryEngine::new(&target);
        engine.open(OpenMode::WRITE_ONLY, None).unwrap();

        let staging = engine.staging_path().unwrap().to_path_buf();
        assert_eq!(staging.parent(), Some(dir.path()));
        assert!(
            staging
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("doc.txt.")
        );
    }

    #[cfg(unix)]
    #[test]
    fn staging_file_is_owner_only_by_default() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let mut engine = TemporaryEngine::new(dir.path().join("f"));
        engine.open(OpenMode::WRITE_ONLY, None).unwrap();
        let mode = fs::metadata(engine.staging_path().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn persist_replaces_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("f");
        fs::write(&target, b"old").unwrap();

        let mut engine = TemporaryEngine::new(&target);
        engine.open(OpenMode::WRITE_ONLY, None).unwrap();
        engine.write(b"new").unwrap();
        engine.rename_overwrite(&target).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert_eq!(entries(dir.path()), ["f"]);
    }

    #[test]
    fn remove_and_drop_leave_no_debris() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("f");

        let mut engine = TemporaryEngine::new(&target);
        engine.open(OpenMode::WRITE_ONLY, None).unwrap();
        engine.remove().unwrap();
        assert!(entries(dir.path()).is_empty());

        let mut engine = TemporaryEngine::new(&target);
        engine.open(OpenMode::WRITE_ONLY, None).unwrap();
        drop(engine);
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn failed_persist_keeps_staging_for_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("f");
        let mut engine = TemporaryEngine::new(&target);
        engine.open(OpenMode::WRITE_ONLY, None).unwrap();

        let err = engine
            .rename_overwrite(&dir.path().join("missing/f"))
            .unwrap_err();
        assert_eq!(err.kind(), FileError::Rename);
        assert!(engine.staging_path().is_some());

        engine.remove().unwrap();
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn read_only_open_is_rejected() {
        let mut engine = TemporaryEngine::new("/tmp/x");
        assert!(matches!(
            engine.open(OpenMode::READ_ONLY, None),
            Err(EngineError::UnsupportedOpenMode { .. })
        ));
    }
}
