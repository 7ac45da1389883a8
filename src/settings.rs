use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

const KILOBYTE: u32 = 1024;
const MEGABYTE: u32 = 1024 * KILOBYTE;

/// How a device schedules its transfers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerType {
    /// Every transfer completes on the calling thread.
    Blocking,
    /// Transfers are queued and completed later by the device.
    DeferredLinedUp,
}

/// Settings handed to a device when it is created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub io_memory_size: u32,
    pub io_memory_alignment: u32,
    /// Size of a single transfer request, in bytes.
    pub granularity: u32,
    pub scheduler_type: SchedulerType,
    /// Target buffering length of automatic streams, in milliseconds.
    pub target_auto_stm_buffer_length: f32,
    pub max_concurrent_io: u32,
    pub use_stream_cache: bool,
    pub max_cache_pinned_bytes: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            io_memory_size: 2 * MEGABYTE,
            io_memory_alignment: 16,
            granularity: 16 * KILOBYTE,
            scheduler_type: SchedulerType::Blocking,
            target_auto_stm_buffer_length: 380.0,
            max_concurrent_io: 8,
            use_stream_cache: false,
            max_cache_pinned_bytes: u32::MAX,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamMgrSettings {
    /// Maximum number of devices alive at the same time.
    pub max_devices: usize,
}

impl Default for StreamMgrSettings {
    fn default() -> Self {
        Self { max_devices: 16 }
    }
}

/// Top-level configuration, usually read from a JSON file.
///
/// ```json
/// {
///   "device": { "scheduler_type": "blocking", "granularity": 32768 },
///   "base_paths": ["/opt/game/audio"],
///   "package_root": "/opt/game/packages"
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stream: StreamMgrSettings,
    pub device: DeviceSettings,
    /// Directories searched for files opened by name, first match wins.
    pub base_paths: Vec<PathBuf>,
    /// Directory indexed by a [`crate::FolderPackageStore`].
    pub package_root: Option<PathBuf>,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        log::debug!("loading config from {}", path.as_ref().display());
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }
}
