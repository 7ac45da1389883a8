use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::handle::FsHandle;
use crate::hook::OpenMode;
use crate::{PackageIoError, Result};

/// Synchronous access to real files through opaque handles.
///
/// Positioned transfers return the number of bytes moved by a single
/// OS call; callers decide whether a short count is acceptable.
pub trait FileSystem: Send + Sync {
    fn open(&self, name: &Path, mode: OpenMode) -> io::Result<FsHandle>;

    fn size(&self, handle: FsHandle) -> io::Result<u64>;

    fn read_at(
        &self,
        handle: FsHandle,
        position: u64,
        buffer: &mut [u8],
    ) -> io::Result<usize>;

    fn write_at(
        &self,
        handle: FsHandle,
        position: u64,
        data: &[u8],
    ) -> io::Result<usize>;

    fn close(&self, handle: FsHandle) -> io::Result<()>;
}

/// [`FileSystem`] over `std::fs`, resolving relative names against an
/// ordered list of base paths.
pub struct OsFileSystem {
    base_paths: RwLock<Vec<PathBuf>>,
    files: RwLock<HashMap<FsHandle, Arc<File>>>,
    next_handle: AtomicU64,
}

impl Default for OsFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl OsFileSystem {
    pub fn new() -> Self {
        Self {
            base_paths: RwLock::new(Vec::new()),
            files: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn with_base_paths<I, P>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let fs = Self::new();
        for path in paths {
            validate_base_path(path.as_ref())?;
            fs.base_paths
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push(path.as_ref().to_path_buf());
        }
        Ok(fs)
    }

    /// Replace all base paths with `path`.
    pub fn set_base_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        validate_base_path(path.as_ref())?;
        let mut base_paths = self
            .base_paths
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        base_paths.clear();
        base_paths.push(path.as_ref().to_path_buf());
        Ok(())
    }

    /// Add a base path searched before all others.
    pub fn add_base_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        validate_base_path(path.as_ref())?;
        self.base_paths
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(0, path.as_ref().to_path_buf());
        Ok(())
    }

    pub fn base_paths(&self) -> Vec<PathBuf> {
        self.base_paths
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of files currently open.
    pub fn open_files(&self) -> usize {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn resolve(&self, name: &Path, mode: OpenMode) -> PathBuf {
        if name.is_absolute() {
            return name.to_path_buf();
        }
        let base_paths = self
            .base_paths
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        if !mode.is_write() {
            if let Some(found) = base_paths
                .iter()
                .map(|base| base.join(name))
                .find(|candidate| candidate.is_file())
            {
                return found;
            }
        }

        match base_paths.first() {
            Some(base) => base.join(name),
            None => name.to_path_buf(),
        }
    }

    fn file(&self, handle: FsHandle) -> io::Result<Arc<File>> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
            .ok_or_else(|| unknown_handle(handle))
    }
}

impl FileSystem for OsFileSystem {
    fn open(&self, name: &Path, mode: OpenMode) -> io::Result<FsHandle> {
        let path = self.resolve(name, mode);
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::Write => options.write(true).create(true),
            OpenMode::WriteOverwrite => {
                options.write(true).create(true).truncate(true)
            }
            OpenMode::ReadWrite => options.read(true).write(true).create(true),
        };
        let file = options.open(&path)?;

        let handle =
            FsHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, Arc::new(file));

        log::debug!(
            "fs: opened {} as {:?} ({:?})",
            path.display(),
            handle,
            mode
        );
        Ok(handle)
    }

    fn size(&self, handle: FsHandle) -> io::Result<u64> {
        Ok(self.file(handle)?.metadata()?.len())
    }

    fn read_at(
        &self,
        handle: FsHandle,
        position: u64,
        buffer: &mut [u8],
    ) -> io::Result<usize> {
        let file = self.file(handle)?;
        positioned::read_at(&file, buffer, position)
    }

    fn write_at(
        &self,
        handle: FsHandle,
        position: u64,
        data: &[u8],
    ) -> io::Result<usize> {
        let file = self.file(handle)?;
        positioned::write_at(&file, data, position)
    }

    fn close(&self, handle: FsHandle) -> io::Result<()> {
        // A transfer still running on another thread keeps its own
        // reference; the OS handle is released when that one drops.
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
            .ok_or_else(|| unknown_handle(handle))?;
        log::debug!("fs: closed {:?}", handle);
        Ok(())
    }
}

fn validate_base_path(path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Err(PackageIoError::Io(io::Error::new(
            ErrorKind::NotFound,
            format!("base path {} is not a directory", path.display()),
        )));
    }
    Ok(())
}

fn unknown_handle(handle: FsHandle) -> io::Error {
    io::Error::new(
        ErrorKind::InvalidInput,
        format!("no open file for {:?}", handle),
    )
}

#[cfg(unix)]
mod positioned {
    use std::fs::File;
    use std::io;
    use std::os::unix::fs::FileExt;

    pub fn read_at(file: &File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
        file.read_at(buf, pos)
    }

    pub fn write_at(file: &File, buf: &[u8], pos: u64) -> io::Result<usize> {
        file.write_at(buf, pos)
    }
}

#[cfg(windows)]
mod positioned {
    use std::fs::File;
    use std::io;
    use std::os::windows::fs::FileExt;

    pub fn read_at(file: &File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
        file.seek_read(buf, pos)
    }

    pub fn write_at(file: &File, buf: &[u8], pos: u64) -> io::Result<usize> {
        file.seek_write(buf, pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempdir::TempDir;

    fn create_temp_dir() -> TempDir {
        TempDir::new("os_fs").expect("Failed to create temporary directory")
    }

    #[test]
    fn open_read_close() {
        let dir = create_temp_dir();
        let path = dir.path().join("bank.bnk");
        fs::write(&path, b"0123456789").unwrap();

        let fs = OsFileSystem::new();
        let handle = fs.open(&path, OpenMode::Read).unwrap();
        assert_eq!(fs.size(handle).unwrap(), 10);

        let mut buf = [0u8; 4];
        assert_eq!(fs.read_at(handle, 3, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"3456");

        fs.close(handle).unwrap();
        assert_eq!(fs.open_files(), 0);
        assert!(fs.close(handle).is_err());
        assert!(fs.read_at(handle, 0, &mut buf).is_err());
    }

    #[test]
    fn read_past_end_is_short() {
        let dir = create_temp_dir();
        let path = dir.path().join("short.wem");
        fs::write(&path, b"abc").unwrap();

        let fs = OsFileSystem::new();
        let handle = fs.open(&path, OpenMode::Read).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(fs.read_at(handle, 1, &mut buf).unwrap(), 2);
        fs.close(handle).unwrap();
    }

    #[test]
    fn write_then_read_back() {
        let dir = create_temp_dir();
        let fs = OsFileSystem::with_base_paths([dir.path()]).unwrap();

        let handle = fs
            .open(Path::new("out.bin"), OpenMode::ReadWrite)
            .unwrap();
        assert_eq!(fs.write_at(handle, 2, b"xyz").unwrap(), 3);
        assert_eq!(fs.size(handle).unwrap(), 5);
        fs.close(handle).unwrap();

        let contents = fs::read(dir.path().join("out.bin")).unwrap();
        assert_eq!(contents, b"\0\0xyz");
    }

    #[test]
    fn missing_file_fails() {
        let dir = create_temp_dir();
        let fs = OsFileSystem::with_base_paths([dir.path()]).unwrap();
        let err = fs
            .open(Path::new("missing.wem"), OpenMode::Read)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn newest_base_path_is_searched_first() {
        let old = create_temp_dir();
        let new = create_temp_dir();
        fs::write(old.path().join("shared.wem"), b"old").unwrap();
        fs::write(new.path().join("shared.wem"), b"new").unwrap();
        fs::write(old.path().join("only_old.wem"), b"only").unwrap();

        let fs = OsFileSystem::new();
        fs.set_base_path(old.path()).unwrap();
        fs.add_base_path(new.path()).unwrap();
        assert_eq!(
            fs.base_paths(),
            vec![new.path().to_path_buf(), old.path().to_path_buf()]
        );

        let mut buf = [0u8; 3];
        let shared = fs.open(Path::new("shared.wem"), OpenMode::Read).unwrap();
        fs.read_at(shared, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"new");

        let only_old = fs
            .open(Path::new("only_old.wem"), OpenMode::Read)
            .unwrap();
        assert_eq!(fs.size(only_old).unwrap(), 4);
    }

    #[test]
    fn base_path_must_be_a_directory() {
        let dir = create_temp_dir();
        let file = dir.path().join("plain");
        fs::write(&file, b"").unwrap();

        let fs = OsFileSystem::new();
        assert!(fs.set_base_path(dir.path().join("nope")).is_err());
        assert!(fs.add_base_path(&file).is_err());
        assert!(fs.base_paths().is_empty());
    }
}
