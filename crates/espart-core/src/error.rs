//! Error types for espart-core

use std::io;
use thiserror::Error;

/// Failure reported by a storage backend when a window cannot be mapped
#[derive(Debug, Error)]
pub enum MapError {
    /// Requested range lies outside the device
    #[error("range {addr:#010x}+{len:#x} is outside the {size:#x}-byte device")]
    OutOfBounds {
        /// Requested start address
        addr: u32,
        /// Requested length
        len: u32,
        /// Total device size
        size: usize,
    },

    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Backend could not provide the window for another reason
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Partition table errors
#[derive(Debug, Error)]
pub enum Error {
    /// The storage backend failed to map the table sector
    #[error("failed to map {len:#x} bytes at {addr:#010x}: {source}")]
    Map {
        /// Start of the requested window
        addr: u32,
        /// Length of the requested window
        len: u32,
        /// Backend error
        #[source]
        source: MapError,
    },

    /// The backend returned a window shorter than one sector
    #[error("window at {addr:#010x} is {actual:#x} bytes, expected at least {expected:#x}")]
    WindowTooSmall {
        /// Start of the window
        addr: u32,
        /// Required length (one sector)
        expected: usize,
        /// Length actually returned
        actual: usize,
    },

    /// Table configuration is unusable
    #[error("invalid table configuration: {0}")]
    InvalidConfig(String),

    /// Failed to read a configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to parse a configuration file
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Result type alias using the crate error type
pub type Result<T> = std::result::Result<T, Error>;
