//! espart-core - Flash partition table discovery
//!
//! This crate reads the partition table stored in a device's flash and
//! answers lookups against it. The table is a run of fixed 32-byte records
//! located at a known flash address; it is loaded lazily on first lookup and
//! stays immutable afterwards.
//!
//! # Example
//!
//! ```ignore
//! use espart_core::{PartitionDirectory, PartitionType};
//!
//! let directory = PartitionDirectory::new(flash);
//!
//! let mut it = directory.find(PartitionType::any(PartitionType::DATA), None)?;
//! while let Some(cursor) = it {
//!     println!("{} at 0x{:08X}", cursor.label(), cursor.address());
//!     it = cursor.advance();
//! }
//!
//! if let Some(nvs) = directory.find_first(PartitionType::new(1, 2), Some("nvs"))? {
//!     println!("nvs: {} bytes", nvs.size);
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod directory;
pub mod error;
pub mod storage;
pub mod table;

pub use config::TableConfig;
pub use directory::{PartitionDirectory, PartitionFilter, PartitionIterator, Partitions};
pub use error::{Error, MapError, Result};
pub use storage::{FlashMap, FlashWindow};
pub use table::{Label, PartitionEntry, PartitionType};
