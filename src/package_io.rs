use std::collections::HashMap;
use std::mem;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::filesystem::FileSystem;
use crate::handle::{DeviceId, FileHandle, PackageFileId};
use crate::hook::{
    BlockIoHook, DeviceDesc, FileDescriptor, FileSystemFlags, IoHeuristics,
    OpenMode, PathResolver, TransferInfo, DEVICE_NAME_MAX_LEN,
};
use crate::settings::{DeviceSettings, SchedulerType};
use crate::store::PackageStore;
use crate::stream_mgr::StreamManager;
use crate::{PackageIoError, Result};

/// Name reported by [`PackageIo::device_desc`].
pub const DEVICE_NAME: &str = "PackageIo";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum DeviceState {
    Uninitialized,
    /// Registration with the streaming manager is in progress.
    Initializing,
    Initialized(DeviceId),
    Terminated,
}

/// Blobs loaded from the package store, keyed by package-file ID.
struct PackageTable {
    entries: HashMap<PackageFileId, Arc<[u8]>>,
    next_id: u64,
    /// Bumped on every init and term. An open only inserts into the
    /// generation it started in.
    generation: u64,
}

impl PackageTable {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 0,
            generation: 0,
        }
    }

    /// Start a new generation, handing back the entries of the old one.
    fn reset(&mut self) -> HashMap<PackageFileId, Arc<[u8]>> {
        self.next_id = 0;
        self.generation += 1;
        mem::take(&mut self.entries)
    }

    fn insert(
        &mut self,
        generation: u64,
        data: Arc<[u8]>,
    ) -> std::result::Result<PackageFileId, Arc<[u8]>> {
        if generation != self.generation {
            return Err(data);
        }
        let id = PackageFileId(self.next_id);
        self.next_id += 1;
        self.entries.insert(id, data);
        Ok(id)
    }

    fn get(&self, id: PackageFileId) -> Option<Arc<[u8]>> {
        self.entries.get(&id).cloned()
    }

    fn remove(&mut self, id: PackageFileId) -> Option<Arc<[u8]>> {
        self.entries.remove(&id)
    }
}

/// Blocking I/O device serving files from two backing stores: real files
/// opened by name and package blobs opened by numeric ID.
///
/// A package blob is fetched whole on open and kept in memory until its
/// descriptor is closed. Every open of the same ID loads a fresh copy
/// under a new package-file ID.
///
/// The provider registers itself with a [`StreamManager`] as an I/O
/// device and, when no other resolver is installed, as the path
/// resolver. It must be held in an [`Arc`] for that.
pub struct PackageIo {
    /// Label for logging
    label: String,
    manager: Arc<dyn StreamManager>,
    store: Arc<dyn PackageStore>,
    filesystem: Arc<dyn FileSystem>,
    state: Mutex<DeviceState>,
    packages: Mutex<PackageTable>,
}

impl PackageIo {
    pub fn new(
        label: String,
        manager: Arc<dyn StreamManager>,
        store: Arc<dyn PackageStore>,
        filesystem: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            label,
            manager,
            store,
            filesystem,
            state: Mutex::new(DeviceState::Uninitialized),
            packages: Mutex::new(PackageTable::new()),
        }
    }

    /// Register with the streaming manager as a blocking I/O device.
    ///
    /// Installs this provider as the path resolver if none is set yet.
    /// On failure nothing stays registered.
    pub fn init(self: &Arc<Self>, settings: &DeviceSettings) -> Result<()> {
        if settings.scheduler_type != SchedulerType::Blocking {
            log::error!(
                "package-io/{}: {:?} scheduler is not supported",
                self.label,
                settings.scheduler_type
            );
            return Err(PackageIoError::Configuration(format!(
                "{:?} scheduler requested, only blocking devices are supported",
                settings.scheduler_type
            )));
        }

        {
            let mut state = self.state();
            match *state {
                DeviceState::Initialized(id) => {
                    return Err(PackageIoError::AlreadyInitialized(id))
                }
                DeviceState::Initializing => {
                    return Err(PackageIoError::Configuration(
                        "initialization already in progress".to_owned(),
                    ))
                }
                DeviceState::Uninitialized | DeviceState::Terminated => {
                    *state = DeviceState::Initializing
                }
            }
        }

        // The manager may call back into the device while registering it,
        // so the state lock is not held here.
        let installed_resolver = self.manager.path_resolver().is_none();
        if installed_resolver {
            self.manager
                .set_path_resolver(Some(self.clone() as Arc<dyn PathResolver>));
        }

        let created = self
            .manager
            .create_device(settings, self.clone() as Arc<dyn BlockIoHook>);

        let mut state = self.state();
        match created {
            Some(id) => {
                self.packages().reset();
                *state = DeviceState::Initialized(id);
                log::debug!(
                    "package-io/{}: registered as {}{}",
                    self.label,
                    id,
                    if installed_resolver {
                        " and path resolver"
                    } else {
                        ""
                    }
                );
                Ok(())
            }
            None => {
                if installed_resolver && self.is_path_resolver() {
                    self.manager.set_path_resolver(None);
                }
                *state = DeviceState::Uninitialized;
                log::error!(
                    "package-io/{}: streaming manager refused the device",
                    self.label
                );
                Err(PackageIoError::DeviceCreation)
            }
        }
    }

    /// Unregister from the streaming manager and drop all package entries.
    ///
    /// Does nothing unless the provider is initialized.
    pub fn term(&self) {
        // The table is reset under the state lock so that an open racing
        // with termination cannot insert after it.
        let (id, leaked) = {
            let mut state = self.state();
            match *state {
                DeviceState::Initialized(id) => {
                    *state = DeviceState::Terminated;
                    (id, self.packages().reset())
                }
                _ => return,
            }
        };

        if self.is_path_resolver() {
            self.manager.set_path_resolver(None);
        }
        self.manager.destroy_device(id);

        if !leaked.is_empty() {
            log::warn!(
                "package-io/{}: {} package files still open at termination",
                self.label,
                leaked.len()
            );
        }
        log::debug!("package-io/{}: terminated {}", self.label, id);
    }

    /// Identity assigned by the streaming manager, `None` unless
    /// initialized.
    pub fn device_id(&self) -> Option<DeviceId> {
        match *self.state() {
            DeviceState::Initialized(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.device_id().is_some()
    }

    /// Number of package files currently held in memory.
    pub fn open_package_files(&self) -> usize {
        self.packages().entries.len()
    }

    fn initialized_device(&self) -> Result<DeviceId> {
        self.device_id().ok_or(PackageIoError::NotInitialized)
    }

    /// Device identity together with the package table generation it
    /// belongs to.
    fn session(&self) -> Result<(DeviceId, u64)> {
        let state = self.state();
        match *state {
            DeviceState::Initialized(id) => {
                Ok((id, self.packages().generation))
            }
            _ => Err(PackageIoError::NotInitialized),
        }
    }

    fn is_path_resolver(&self) -> bool {
        let this = self as *const Self as *const ();
        self.manager
            .path_resolver()
            .map_or(false, |resolver| Arc::as_ptr(&resolver) as *const () == this)
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn packages(&self) -> MutexGuard<'_, PackageTable> {
        self.packages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn fetch_blob(&self, id: u32) -> Result<Vec<u8>> {
        let size = self
            .store
            .blob_size(id)
            .ok_or(PackageIoError::NotFound(id))?;

        let mut buffer = vec![0u8; size];
        self.store
            .read_blob(id, &mut buffer)
            .map_err(|err| match err {
                PackageIoError::PackageFetch { .. } => err,
                other => PackageIoError::PackageFetch {
                    id,
                    reason: other.to_string(),
                },
            })?;
        Ok(buffer)
    }
}

impl PathResolver for PackageIo {
    fn open_by_path(
        &self,
        name: &Path,
        mode: OpenMode,
        flags: Option<&FileSystemFlags>,
        sync_open: &mut bool,
    ) -> Result<FileDescriptor> {
        let device_id = self.initialized_device()?;
        log::debug!(
            "package-io/{}: open {} ({:?}, cache id {:#010x})",
            self.label,
            name.display(),
            mode,
            flags.map_or(0, |f| f.cache_id)
        );

        let handle = self.filesystem.open(name, mode)?;
        let size = match self.filesystem.size(handle) {
            Ok(size) => size,
            Err(err) => {
                if let Err(close_err) = self.filesystem.close(handle) {
                    log::error!(
                        "package-io/{}: failed to close {:?}: {}",
                        self.label,
                        handle,
                        close_err
                    );
                }
                return Err(err.into());
            }
        };

        *sync_open = true;
        Ok(FileDescriptor {
            handle: FileHandle::Filesystem(handle),
            size,
            sector: 0,
            device_id,
        })
    }

    fn open_by_id(
        &self,
        id: u32,
        mode: OpenMode,
        _flags: Option<&FileSystemFlags>,
        sync_open: &mut bool,
    ) -> Result<FileDescriptor> {
        let (device_id, generation) = self.session()?;
        log::debug!(
            "package-io/{}: loading file {:#010x} from package store ({:?})",
            self.label,
            id,
            mode
        );

        let buffer = self.fetch_blob(id)?;
        let size = buffer.len() as u64;
        let inserted = self.packages().insert(generation, buffer.into());
        let Ok(package_id) = inserted else {
            log::warn!(
                "package-io/{}: file {:#010x} loaded after termination, dropped",
                self.label,
                id
            );
            return Err(PackageIoError::NotInitialized);
        };

        log::debug!(
            "package-io/{}: file {:#010x} loaded as {:?}, {} bytes",
            self.label,
            id,
            package_id,
            size
        );

        *sync_open = true;
        Ok(FileDescriptor {
            handle: FileHandle::Package(package_id),
            size,
            sector: 0,
            device_id,
        })
    }
}

impl BlockIoHook for PackageIo {
    fn read(
        &self,
        desc: &FileDescriptor,
        heuristics: &IoHeuristics,
        buffer: &mut [u8],
        transfer: &TransferInfo,
    ) -> Result<()> {
        self.initialized_device()?;
        let requested = transfer.requested_size as usize;
        let position = transfer.file_position;
        let available = buffer.len();
        let target = buffer.get_mut(..requested).ok_or(
            PackageIoError::BufferTooSmall {
                requested,
                available,
            },
        )?;

        log::trace!(
            "package-io/{}: read {} at {:#x}, {} bytes (deadline {}ms)",
            self.label,
            desc.handle,
            position,
            requested,
            heuristics.deadline
        );

        match desc.handle {
            FileHandle::Package(id) => {
                // Only the lookup happens under the lock; the entry stays
                // alive through our reference even if closed meanwhile.
                let blob = self
                    .packages()
                    .get(id)
                    .ok_or(PackageIoError::InvalidHandle(desc.handle))?;

                let source = usize::try_from(position)
                    .ok()
                    .and_then(|start| Some(start..start.checked_add(requested)?))
                    .and_then(|range| blob.get(range))
                    .ok_or(PackageIoError::OutOfBounds {
                        position,
                        requested,
                        size: blob.len(),
                    })?;

                target.copy_from_slice(source);
                Ok(())
            }
            FileHandle::Filesystem(handle) => {
                let transferred =
                    self.filesystem.read_at(handle, position, target)?;
                if transferred != requested {
                    return Err(PackageIoError::ShortTransfer {
                        requested,
                        transferred,
                    });
                }
                Ok(())
            }
        }
    }

    fn write(
        &self,
        desc: &FileDescriptor,
        heuristics: &IoHeuristics,
        data: &[u8],
        transfer: &TransferInfo,
    ) -> Result<()> {
        self.initialized_device()?;
        let requested = transfer.requested_size as usize;
        let position = transfer.file_position;
        let source = data.get(..requested).ok_or(
            PackageIoError::BufferTooSmall {
                requested,
                available: data.len(),
            },
        )?;

        log::trace!(
            "package-io/{}: write {} at {:#x}, {} bytes (deadline {}ms)",
            self.label,
            desc.handle,
            position,
            requested,
            heuristics.deadline
        );

        match desc.handle {
            FileHandle::Package(id) => {
                if self.packages().entries.contains_key(&id) {
                    Err(PackageIoError::ReadOnly(desc.handle))
                } else {
                    Err(PackageIoError::InvalidHandle(desc.handle))
                }
            }
            FileHandle::Filesystem(handle) => {
                let transferred =
                    self.filesystem.write_at(handle, position, source)?;
                if transferred != requested {
                    return Err(PackageIoError::ShortTransfer {
                        requested,
                        transferred,
                    });
                }
                Ok(())
            }
        }
    }

    fn close(&self, desc: &FileDescriptor) -> Result<()> {
        self.initialized_device()?;
        log::debug!("package-io/{}: close {}", self.label, desc.handle);

        match desc.handle {
            FileHandle::Package(id) => {
                // Bound so the blob is freed after the table lock is released.
                let removed = self.packages().remove(id);
                removed
                    .map(drop)
                    .ok_or(PackageIoError::InvalidHandle(desc.handle))
            }
            FileHandle::Filesystem(handle) => {
                Ok(self.filesystem.close(handle)?)
            }
        }
    }

    fn block_size(&self, _desc: &FileDescriptor) -> u32 {
        1
    }

    fn device_desc(&self) -> DeviceDesc {
        let mut name = DEVICE_NAME.to_owned();
        name.truncate(DEVICE_NAME_MAX_LEN);
        DeviceDesc {
            device_id: self.device_id(),
            can_read: true,
            // Package blobs are immutable, so the device as a whole is
            // advertised read-only.
            can_write: false,
            name,
        }
    }
}
