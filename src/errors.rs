use thiserror::Error;

use crate::handle::{DeviceId, FileHandle};

pub type Result<T> = std::result::Result<T, PackageIoError>;

#[derive(Error, Debug)]
pub enum PackageIoError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Streaming manager refused to create a device")]
    DeviceCreation,
    #[error("File {0:#010x} not found in package store")]
    NotFound(u32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to fetch file {id:#010x} from package store: {reason}")]
    PackageFetch { id: u32, reason: String },
    #[error("Short transfer: {transferred} of {requested} bytes")]
    ShortTransfer { requested: usize, transferred: usize },
    #[error(
        "Range {position}+{requested} exceeds package file of {size} bytes"
    )]
    OutOfBounds {
        position: u64,
        requested: usize,
        size: usize,
    },
    #[error("Invalid handle: {0}")]
    InvalidHandle(FileHandle),
    #[error("Handle {0} is read-only")]
    ReadOnly(FileHandle),
    #[error("Buffer of {available} bytes cannot hold {requested} bytes")]
    BufferTooSmall { requested: usize, available: usize },
    #[error("Device is not initialized")]
    NotInitialized,
    #[error("Device is already initialized as {0}")]
    AlreadyInitialized(DeviceId),
    #[error("No path resolver is registered")]
    NoResolver,
    #[error("Unknown device {0}")]
    UnknownDevice(DeviceId),
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}
