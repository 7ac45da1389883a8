use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use super::PackageStore;
use crate::{PackageIoError, Result};

/// Package store over a directory tree of blob files.
///
/// A file is indexed when its stem is a file ID, either decimal
/// (`1234.wem`) or `0x`-prefixed hexadecimal (`0x000004D2.wem`).
/// Hidden files and directories are skipped.
#[derive(Debug)]
pub struct FolderPackageStore {
    root: PathBuf,
    id2path: HashMap<u32, PathBuf>,
    /// IDs found more than once, with the number of files claiming them.
    collisions: HashMap<u32, usize>,
}

impl FolderPackageStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        log::info!("package-store: indexing blobs under {}", root.display());

        if !root.is_dir() {
            return Err(PackageIoError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a directory", root.display()),
            )));
        }

        let mut store = Self {
            root: root.to_path_buf(),
            id2path: HashMap::new(),
            collisions: HashMap::new(),
        };

        let all_files = WalkDir::new(root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

        for entry in all_files {
            let entry = entry.map_err(std::io::Error::from)?;
            if let Some((id, path)) = indexable(entry) {
                if store.id2path.contains_key(&id) {
                    log::warn!(
                        "package-store: {} ignored, {:#010x} already indexed",
                        path.display(),
                        id
                    );
                    *store.collisions.entry(id).or_insert(1) += 1;
                } else {
                    store.id2path.insert(id, path);
                }
            }
        }

        log::info!("package-store: {} blobs indexed", store.id2path.len());
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.id2path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id2path.is_empty()
    }

    pub fn path(&self, id: u32) -> Option<&Path> {
        self.id2path.get(&id).map(PathBuf::as_path)
    }

    pub fn collisions(&self) -> &HashMap<u32, usize> {
        &self.collisions
    }
}

impl PackageStore for FolderPackageStore {
    fn blob_size(&self, id: u32) -> Option<usize> {
        let path = self.id2path.get(&id)?;
        match fs::metadata(path) {
            Ok(meta) => usize::try_from(meta.len()).ok(),
            Err(err) => {
                log::warn!(
                    "package-store: cannot stat {}: {}",
                    path.display(),
                    err
                );
                None
            }
        }
    }

    fn read_blob(&self, id: u32, buffer: &mut [u8]) -> Result<()> {
        let path = self
            .id2path
            .get(&id)
            .ok_or(PackageIoError::NotFound(id))?;
        let mut file = File::open(path)?;

        let len = file.metadata()?.len();
        if len != buffer.len() as u64 {
            return Err(PackageIoError::PackageFetch {
                id,
                reason: format!(
                    "{} changed size: {} bytes, expected {}",
                    path.display(),
                    len,
                    buffer.len()
                ),
            });
        }

        file.read_exact(buffer)?;
        Ok(())
    }
}

fn parse_id(stem: &str) -> Option<u32> {
    match stem
        .strip_prefix("0x")
        .or_else(|| stem.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => stem.parse().ok(),
    }
}

fn indexable(entry: DirEntry) -> Option<(u32, PathBuf)> {
    if !entry.file_type().is_file() {
        return None;
    }

    let id = entry
        .path()
        .file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(parse_id)?;

    Some((id, entry.into_path()))
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}
