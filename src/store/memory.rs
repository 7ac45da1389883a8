use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::PackageStore;
use crate::{PackageIoError, Result};

/// Package store holding every blob in memory.
#[derive(Default)]
pub struct MemoryPackageStore {
    blobs: RwLock<HashMap<u32, Vec<u8>>>,
}

impl MemoryPackageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a blob, returning the previous one.
    pub fn insert(&self, id: u32, data: Vec<u8>) -> Option<Vec<u8>> {
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, data)
    }

    pub fn remove(&self, id: u32) -> Option<Vec<u8>> {
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub fn len(&self) -> usize {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<(u32, Vec<u8>)> for MemoryPackageStore {
    fn from_iter<T: IntoIterator<Item = (u32, Vec<u8>)>>(iter: T) -> Self {
        Self {
            blobs: RwLock::new(iter.into_iter().collect()),
        }
    }
}

impl PackageStore for MemoryPackageStore {
    fn blob_size(&self, id: u32) -> Option<usize> {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(Vec::len)
    }

    fn read_blob(&self, id: u32, buffer: &mut [u8]) -> Result<()> {
        let blobs = self
            .blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let blob = blobs.get(&id).ok_or(PackageIoError::NotFound(id))?;
        if blob.len() != buffer.len() {
            return Err(PackageIoError::PackageFetch {
                id,
                reason: format!(
                    "blob is {} bytes, buffer is {}",
                    blob.len(),
                    buffer.len()
                ),
            });
        }
        buffer.copy_from_slice(blob);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_and_read() {
        let store: MemoryPackageStore =
            [(1, vec![1, 2, 3]), (2, vec![])].into_iter().collect();
        assert_eq!(store.len(), 2);
        assert_eq!(store.blob_size(1), Some(3));
        assert_eq!(store.blob_size(2), Some(0));
        assert_eq!(store.blob_size(3), None);

        let mut buf = [0u8; 3];
        store.read_blob(1, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn size_mismatch_fails() {
        let store = MemoryPackageStore::new();
        store.insert(7, vec![0; 4]);
        let mut buf = [0u8; 2];
        assert!(matches!(
            store.read_blob(7, &mut buf),
            Err(PackageIoError::PackageFetch { id: 7, .. })
        ));
    }

    #[test]
    fn removed_blob_is_unknown() {
        let store = MemoryPackageStore::new();
        store.insert(7, vec![9]);
        assert_eq!(store.remove(7), Some(vec![9]));
        assert!(store.is_empty());
        assert_eq!(store.blob_size(7), None);
        assert!(matches!(
            store.read_blob(7, &mut [0u8; 1]),
            Err(PackageIoError::NotFound(7))
        ));
    }
}
