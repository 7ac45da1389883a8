use std::fmt;

use serde::{Deserialize, Serialize};

/// High bit of the raw handle form, set for package-backed handles.
pub const PACKAGE_HANDLE_BIT: u64 = 1 << 63;

/// Identity assigned by the streaming manager when a device is created.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

/// Opaque handle to a file opened through a [`crate::FileSystem`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FsHandle(pub u64);

/// Key of an in-memory package entry.
///
/// Assigned sequentially by the provider, never reused while the
/// provider is initialized. Distinct from the external file ID the
/// blob was fetched with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageFileId(pub u64);

/// Handle of an open logical file, tagged with the backing store that
/// owns it. The tag never changes for the lifetime of the handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FileHandle {
    Filesystem(FsHandle),
    Package(PackageFileId),
}

impl FileHandle {
    pub fn is_package(&self) -> bool {
        matches!(self, FileHandle::Package(_))
    }

    /// Compact form for interop with callers that store handles as plain
    /// integers. Returns `None` if the value would collide with the tag bit.
    pub fn to_raw(&self) -> Option<u64> {
        match *self {
            FileHandle::Filesystem(FsHandle(raw)) => {
                (raw & PACKAGE_HANDLE_BIT == 0).then_some(raw)
            }
            FileHandle::Package(PackageFileId(id)) => {
                let tagged = id | PACKAGE_HANDLE_BIT;
                (id & PACKAGE_HANDLE_BIT == 0).then_some(tagged)
            }
        }
    }

    pub fn from_raw(raw: u64) -> Self {
        if raw & PACKAGE_HANDLE_BIT != 0 {
            FileHandle::Package(PackageFileId(raw & !PACKAGE_HANDLE_BIT))
        } else {
            FileHandle::Filesystem(FsHandle(raw))
        }
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileHandle::Filesystem(FsHandle(raw)) => write!(f, "fs:{}", raw),
            FileHandle::Package(PackageFileId(id)) => write!(f, "pkg:{}", id),
        }
    }
}
