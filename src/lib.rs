//! # package-io
//!
//! A blocking block-I/O device for a streaming manager. Files opened by
//! name are served from the real filesystem; files opened by numeric ID
//! are loaded whole from a [`PackageStore`] and served from memory until
//! closed.

use std::sync::Arc;

mod errors;
pub mod filesystem;
pub mod handle;
pub mod hook;
pub mod package_io;
pub mod settings;
pub mod store;
pub mod stream_mgr;

pub use errors::{PackageIoError, Result};
pub use filesystem::{FileSystem, OsFileSystem};
pub use handle::{DeviceId, FileHandle, FsHandle, PackageFileId};
pub use hook::{
    BlockIoHook, DeviceDesc, FileDescriptor, FileSystemFlags, IoHeuristics,
    OpenMode, PathResolver, TransferInfo,
};
pub use package_io::{PackageIo, DEVICE_NAME};
pub use settings::{Config, DeviceSettings, SchedulerType, StreamMgrSettings};
pub use store::{FolderPackageStore, MemoryPackageStore, PackageStore};
pub use stream_mgr::{StreamManager, StreamMgr};

/// Create a [`PackageIo`] and register it with `manager`.
pub fn init_package_io(
    manager: Arc<dyn StreamManager>,
    store: Arc<dyn PackageStore>,
    filesystem: Arc<dyn FileSystem>,
    settings: &DeviceSettings,
) -> Result<Arc<PackageIo>> {
    let io = Arc::new(PackageIo::new(
        DEVICE_NAME.to_owned(),
        manager,
        store,
        filesystem,
    ));
    io.init(settings)?;
    Ok(io)
}

pub fn term_package_io(io: &PackageIo) {
    io.term();
}

/// Build the streaming manager, filesystem, package store and device
/// described by `config`.
///
/// Without a `package_root`, the package store is an empty
/// [`MemoryPackageStore`].
pub fn init_from_config(
    config: &Config,
) -> Result<(Arc<StreamMgr>, Arc<PackageIo>)> {
    let manager = Arc::new(StreamMgr::new(config.stream.clone()));
    let filesystem =
        Arc::new(OsFileSystem::with_base_paths(&config.base_paths)?);
    let store: Arc<dyn PackageStore> = match &config.package_root {
        Some(root) => Arc::new(FolderPackageStore::open(root)?),
        None => Arc::new(MemoryPackageStore::new()),
    };

    let io = init_package_io(manager.clone(), store, filesystem, &config.device)?;
    Ok((manager, io))
}
