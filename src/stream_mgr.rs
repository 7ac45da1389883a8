use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::handle::DeviceId;
use crate::hook::{
    BlockIoHook, DeviceDesc, FileDescriptor, FileSystemFlags, IoHeuristics,
    OpenMode, PathResolver, TransferInfo,
};
use crate::settings::{DeviceSettings, StreamMgrSettings};
use crate::{PackageIoError, Result};

/// Registry of I/O devices and of the path resolver used to open files.
pub trait StreamManager: Send + Sync {
    /// Register `hook` as a new device. `None` if the device was refused.
    fn create_device(
        &self,
        settings: &DeviceSettings,
        hook: Arc<dyn BlockIoHook>,
    ) -> Option<DeviceId>;

    fn destroy_device(&self, id: DeviceId);

    fn set_path_resolver(&self, resolver: Option<Arc<dyn PathResolver>>);

    fn path_resolver(&self) -> Option<Arc<dyn PathResolver>>;
}

/// In-process [`StreamManager`] that also routes file requests to the
/// device owning each descriptor.
pub struct StreamMgr {
    settings: StreamMgrSettings,
    devices: RwLock<HashMap<DeviceId, Arc<dyn BlockIoHook>>>,
    resolver: RwLock<Option<Arc<dyn PathResolver>>>,
    next_device: AtomicU32,
}

impl Default for StreamMgr {
    fn default() -> Self {
        Self::new(StreamMgrSettings::default())
    }
}

impl StreamMgr {
    pub fn new(settings: StreamMgrSettings) -> Self {
        log::debug!(
            "stream-mgr: created with room for {} devices",
            settings.max_devices
        );
        Self {
            settings,
            devices: RwLock::new(HashMap::new()),
            resolver: RwLock::new(None),
            next_device: AtomicU32::new(0),
        }
    }

    pub fn device_count(&self) -> usize {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn open_by_path<P: AsRef<Path>>(
        &self,
        name: P,
        mode: OpenMode,
        flags: Option<&FileSystemFlags>,
    ) -> Result<FileDescriptor> {
        let mut sync_open = true;
        let desc = self.resolver()?.open_by_path(
            name.as_ref(),
            mode,
            flags,
            &mut sync_open,
        )?;
        if !sync_open {
            log::warn!(
                "stream-mgr: {} was opened deferred",
                name.as_ref().display()
            );
        }
        Ok(desc)
    }

    pub fn open_by_id(
        &self,
        id: u32,
        mode: OpenMode,
        flags: Option<&FileSystemFlags>,
    ) -> Result<FileDescriptor> {
        let mut sync_open = true;
        let desc = self
            .resolver()?
            .open_by_id(id, mode, flags, &mut sync_open)?;
        if !sync_open {
            log::warn!("stream-mgr: file {:#010x} was opened deferred", id);
        }
        Ok(desc)
    }

    pub fn read(
        &self,
        desc: &FileDescriptor,
        heuristics: &IoHeuristics,
        buffer: &mut [u8],
        transfer: &TransferInfo,
    ) -> Result<()> {
        self.device(desc.device_id)?
            .read(desc, heuristics, buffer, transfer)
    }

    pub fn write(
        &self,
        desc: &FileDescriptor,
        heuristics: &IoHeuristics,
        data: &[u8],
        transfer: &TransferInfo,
    ) -> Result<()> {
        self.device(desc.device_id)?
            .write(desc, heuristics, data, transfer)
    }

    pub fn close(&self, desc: &FileDescriptor) -> Result<()> {
        self.device(desc.device_id)?.close(desc)
    }

    pub fn block_size(&self, desc: &FileDescriptor) -> Result<u32> {
        Ok(self.device(desc.device_id)?.block_size(desc))
    }

    pub fn device_desc(&self, id: DeviceId) -> Result<DeviceDesc> {
        Ok(self.device(id)?.device_desc())
    }

    fn resolver(&self) -> Result<Arc<dyn PathResolver>> {
        self.path_resolver().ok_or(PackageIoError::NoResolver)
    }

    fn device(&self, id: DeviceId) -> Result<Arc<dyn BlockIoHook>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(PackageIoError::UnknownDevice(id))
    }
}

impl StreamManager for StreamMgr {
    fn create_device(
        &self,
        settings: &DeviceSettings,
        hook: Arc<dyn BlockIoHook>,
    ) -> Option<DeviceId> {
        let mut devices = self
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if devices.len() >= self.settings.max_devices {
            log::error!(
                "stream-mgr: device limit of {} reached",
                self.settings.max_devices
            );
            return None;
        }

        let id = DeviceId(self.next_device.fetch_add(1, Ordering::Relaxed));
        devices.insert(id, hook);
        log::debug!(
            "stream-mgr: created {} ({:?} scheduler, {} bytes granularity)",
            id,
            settings.scheduler_type,
            settings.granularity
        );
        Some(id)
    }

    fn destroy_device(&self, id: DeviceId) {
        let removed = self
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match removed {
            Some(_) => log::debug!("stream-mgr: destroyed {}", id),
            None => log::warn!("stream-mgr: cannot destroy unknown {}", id),
        }
    }

    fn set_path_resolver(&self, resolver: Option<Arc<dyn PathResolver>>) {
        *self
            .resolver
            .write()
            .unwrap_or_else(PoisonError::into_inner) = resolver;
    }

    fn path_resolver(&self) -> Option<Arc<dyn PathResolver>> {
        self.resolver
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
