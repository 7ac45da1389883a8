mod folder;
mod memory;

use crate::Result;

pub use folder::FolderPackageStore;
pub use memory::MemoryPackageStore;

/// Source of package blobs addressed by a 32-bit file ID.
pub trait PackageStore: Send + Sync {
    /// Size of the blob in bytes, or `None` if the store does not know `id`.
    fn blob_size(&self, id: u32) -> Option<usize>;

    /// Fill `buffer` with the whole blob. `buffer.len()` is the size
    /// previously reported by [`PackageStore::blob_size`].
    fn read_blob(&self, id: u32, buffer: &mut [u8]) -> Result<()>;
}
