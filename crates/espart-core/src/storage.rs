//! Storage access seam
//!
//! The partition table loader never reads flash directly. It asks a
//! [`FlashMap`] backend for a readable window over a physical address range
//! and releases the window by dropping it once parsing is done.

use std::borrow::Cow;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::MapError;

/// A readable byte window over a range of flash
///
/// Backends that can expose their contents directly hand out a borrowed
/// window; backends that have to copy (file dumps, remote devices) hand out
/// an owned one. The window is released when dropped.
#[derive(Debug)]
pub struct FlashWindow<'a> {
    addr: u32,
    data: Cow<'a, [u8]>,
}

impl<'a> FlashWindow<'a> {
    /// Create a window borrowing the backend's memory
    pub fn borrowed(addr: u32, data: &'a [u8]) -> Self {
        log::trace!("mapped {:#x} bytes at {:#010x}", data.len(), addr);
        Self {
            addr,
            data: Cow::Borrowed(data),
        }
    }

    /// Create a window that owns a copy of the data
    pub fn owned(addr: u32, data: Vec<u8>) -> Self {
        log::trace!("mapped {:#x} bytes at {:#010x} (copied)", data.len(), addr);
        Self {
            addr,
            data: Cow::Owned(data),
        }
    }

    /// Physical address of the first byte in the window
    pub fn addr(&self) -> u32 {
        self.addr
    }
}

impl Deref for FlashWindow<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl AsRef<[u8]> for FlashWindow<'_> {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for FlashWindow<'_> {
    fn drop(&mut self) {
        log::trace!("unmapped window at {:#010x}", self.addr);
    }
}

/// Backend able to expose a byte window over physical flash
pub trait FlashMap {
    /// Map `len` bytes starting at physical address `addr`
    ///
    /// The returned window must be exactly `len` bytes long on success.
    fn map(&self, addr: u32, len: u32) -> Result<FlashWindow<'_>, MapError>;
}

impl FlashMap for [u8] {
    fn map(&self, addr: u32, len: u32) -> Result<FlashWindow<'_>, MapError> {
        let start = addr as usize;
        let end = start
            .checked_add(len as usize)
            .filter(|&end| end <= self.len())
            .ok_or(MapError::OutOfBounds {
                addr,
                len,
                size: self.len(),
            })?;
        Ok(FlashWindow::borrowed(addr, &self[start..end]))
    }
}

impl FlashMap for Vec<u8> {
    fn map(&self, addr: u32, len: u32) -> Result<FlashWindow<'_>, MapError> {
        self.as_slice().map(addr, len)
    }
}

impl<T: FlashMap + ?Sized> FlashMap for &T {
    fn map(&self, addr: u32, len: u32) -> Result<FlashWindow<'_>, MapError> {
        (**self).map(addr, len)
    }
}

impl<T: FlashMap + ?Sized> FlashMap for Box<T> {
    fn map(&self, addr: u32, len: u32) -> Result<FlashWindow<'_>, MapError> {
        (**self).map(addr, len)
    }
}

impl<T: FlashMap + ?Sized> FlashMap for Arc<T> {
    fn map(&self, addr: u32, len: u32) -> Result<FlashWindow<'_>, MapError> {
        (**self).map(addr, len)
    }
}
