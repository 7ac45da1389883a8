//! Callback interfaces a streaming manager drives, and the records
//! exchanged through them.

use std::path::Path;

use crate::handle::{DeviceId, FileHandle};
use crate::Result;

/// Longest device name reported by [`BlockIoHook::device_desc`].
pub const DEVICE_NAME_MAX_LEN: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    WriteOverwrite,
    ReadWrite,
}

impl OpenMode {
    pub fn is_write(&self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

/// Hints passed along with an open request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileSystemFlags {
    pub company_id: u32,
    pub codec_id: u32,
    pub cache_id: u32,
    pub is_language_specific: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct IoHeuristics {
    /// Time left before the data is needed, in milliseconds.
    pub deadline: f32,
    pub priority: i8,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferInfo {
    pub file_position: u64,
    pub buffer_size: u32,
    pub requested_size: u32,
}

impl TransferInfo {
    pub fn new(file_position: u64, requested_size: u32) -> Self {
        Self {
            file_position,
            buffer_size: requested_size,
            requested_size,
        }
    }
}

/// Describes an open file. Owned by the caller between open and close.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileDescriptor {
    pub handle: FileHandle,
    pub size: u64,
    /// Required alignment of transfers, 0 when there is none.
    pub sector: u32,
    pub device_id: DeviceId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceDesc {
    /// `None` while the device is not registered.
    pub device_id: Option<DeviceId>,
    pub can_read: bool,
    pub can_write: bool,
    pub name: String,
}

/// Turns file references into open descriptors.
pub trait PathResolver: Send + Sync {
    /// Open a file by name.
    ///
    /// `sync_open` is the caller's request to open synchronously; the
    /// resolver sets it to `false` if the open was deferred.
    fn open_by_path(
        &self,
        name: &Path,
        mode: OpenMode,
        flags: Option<&FileSystemFlags>,
        sync_open: &mut bool,
    ) -> Result<FileDescriptor>;

    /// Open a file by its numeric ID.
    fn open_by_id(
        &self,
        id: u32,
        mode: OpenMode,
        flags: Option<&FileSystemFlags>,
        sync_open: &mut bool,
    ) -> Result<FileDescriptor>;
}

/// Blocking transfer interface of an I/O device.
pub trait BlockIoHook: Send + Sync {
    fn read(
        &self,
        desc: &FileDescriptor,
        heuristics: &IoHeuristics,
        buffer: &mut [u8],
        transfer: &TransferInfo,
    ) -> Result<()>;

    fn write(
        &self,
        desc: &FileDescriptor,
        heuristics: &IoHeuristics,
        data: &[u8],
        transfer: &TransferInfo,
    ) -> Result<()>;

    fn close(&self, desc: &FileDescriptor) -> Result<()>;

    /// Minimum transfer size the device accepts for this file.
    fn block_size(&self, desc: &FileDescriptor) -> u32;

    fn device_desc(&self) -> DeviceDesc;

    fn device_data(&self) -> u32 {
        0
    }
}
