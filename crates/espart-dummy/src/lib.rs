//! espart-dummy - In-memory flash emulator for testing
//!
//! This crate provides a flash device that lives in memory and implements
//! [`FlashMap`], so a [`PartitionDirectory`](espart_core::PartitionDirectory)
//! can be pointed at it without real hardware. It can also be loaded from a
//! flash dump file to inspect the partition table of a saved image.
//!
//! Failures and slow mappings can be injected to exercise the directory's
//! error and contention paths.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use espart_core::{FlashMap, FlashWindow, MapError};
use thiserror::Error;

/// Dummy flash errors
#[derive(Debug, Error)]
pub enum DummyError {
    /// I/O error while reading an image
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Image does not fit in the emulated flash
    #[error("image of {len} bytes does not fit in {size}-byte flash")]
    ImageTooLarge {
        /// Image length
        len: usize,
        /// Flash size
        size: usize,
    },

    /// Access outside the emulated flash
    #[error("address {addr:#010x}+{len:#x} is out of bounds")]
    AddressOutOfBounds {
        /// Start address
        addr: u32,
        /// Access length
        len: usize,
    },
}

/// Result type for dummy flash operations
pub type Result<T> = std::result::Result<T, DummyError>;

/// Configuration for the dummy flash
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Flash size in bytes
    pub size: usize,
    /// Sector size for smallest erase
    pub sector_size: usize,
    /// Delay applied to every map call
    pub map_delay: Option<Duration>,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            size: 4 * 1024 * 1024,
            sector_size: 4096,
            map_delay: None,
        }
    }
}

/// Dummy flash device
///
/// Erased flash reads as 0xFF. Programming can only clear bits.
pub struct DummyFlash {
    config: DummyConfig,
    data: Vec<u8>,
    maps: AtomicUsize,
    pending_failures: AtomicUsize,
}

impl DummyFlash {
    /// Create a new erased flash with the given configuration
    pub fn new(config: DummyConfig) -> Self {
        let data = vec![0xFF; config.size];
        Self {
            config,
            data,
            maps: AtomicUsize::new(0),
            pending_failures: AtomicUsize::new(0),
        }
    }

    /// Create a new erased flash with the default configuration
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Create a flash whose leading bytes are `initial_data`
    pub fn with_data(config: DummyConfig, initial_data: &[u8]) -> Result<Self> {
        if initial_data.len() > config.size {
            return Err(DummyError::ImageTooLarge {
                len: initial_data.len(),
                size: config.size,
            });
        }
        let mut flash = Self::new(config);
        flash.data[..initial_data.len()].copy_from_slice(initial_data);
        Ok(flash)
    }

    /// Load a flash dump file
    ///
    /// The flash is sized to the image unless `config.size` is larger.
    pub fn from_file(mut config: DummyConfig, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let image = fs::read(path)?;
        log::debug!("Loaded {} bytes from {}", image.len(), path.display());
        config.size = config.size.max(image.len());
        Self::with_data(config, &image)
    }

    /// Get a reference to the flash data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get a mutable reference to the flash data
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Get the configuration
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Number of map calls made so far, including failed ones
    pub fn map_count(&self) -> usize {
        self.maps.load(Ordering::SeqCst)
    }

    /// Make the next `count` map calls fail
    pub fn fail_next_maps(&self, count: usize) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    fn range(&self, addr: u32, len: usize) -> Result<std::ops::Range<usize>> {
        let start = addr as usize;
        start
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .map(|end| start..end)
            .ok_or(DummyError::AddressOutOfBounds { addr, len })
    }

    /// Program bytes at `addr`; bits can only go from 1 to 0
    pub fn program(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let range = self.range(addr, data.len())?;
        for (byte, &value) in self.data[range].iter_mut().zip(data) {
            *byte &= value;
        }
        Ok(())
    }

    /// Erase the sector containing `addr`
    pub fn erase_sector(&mut self, addr: u32) -> Result<()> {
        let sector_size = self.config.sector_size;
        let aligned = (addr as usize & !(sector_size - 1)) as u32;
        let range = self.range(aligned, sector_size)?;
        self.data[range].fill(0xFF);
        Ok(())
    }

    fn take_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl FlashMap for DummyFlash {
    fn map(&self, addr: u32, len: u32) -> std::result::Result<FlashWindow<'_>, MapError> {
        self.maps.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.config.map_delay {
            thread::sleep(delay);
        }
        if self.take_failure() {
            log::debug!("Injected map failure at 0x{:08X}", addr);
            return Err(MapError::Unavailable("injected failure".into()));
        }
        let range = self
            .range(addr, len as usize)
            .map_err(|_| MapError::OutOfBounds {
                addr,
                len,
                size: self.data.len(),
            })?;
        Ok(FlashWindow::borrowed(addr, &self.data[range]))
    }
}
