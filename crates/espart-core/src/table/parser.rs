//! Partition table parsing
//!
//! The table is a run of 32-byte little-endian records:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0x00    2     Magic (0x50AA)
//! 0x02    1     Type (major)
//! 0x03    1     Subtype (minor)
//! 0x04    4     Offset
//! 0x08    4     Size
//! 0x0C    16    Label, NUL-padded, not always terminated
//! 0x1C    4     Flags (reserved)
//! ```
//!
//! The first record with a different magic ends the table, as does the end
//! of the sector that holds it.

use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

use super::types::{Label, PartitionEntry, PartitionType, LABEL_LEN};
use crate::config::TableConfig;
use crate::error::{Error, Result};
use crate::storage::FlashMap;

/// Magic value at the start of every valid record
pub const PARTITION_MAGIC: u16 = 0x50AA;

/// Size of one table record
pub const RECORD_SIZE: usize = 32;

/// On-flash record layout
#[derive(FromBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
struct RawRecord {
    magic: U16,
    kind: u8,
    subtype: u8,
    offset: U32,
    size: U32,
    label: [u8; LABEL_LEN],
    flags: U32,
}

const _: () = assert!(core::mem::size_of::<RawRecord>() == RECORD_SIZE);

impl RawRecord {
    fn is_valid(&self) -> bool {
        self.magic.get() == PARTITION_MAGIC
    }

    fn to_entry(&self) -> PartitionEntry {
        PartitionEntry {
            address: self.offset.get(),
            size: self.size.get(),
            kind: PartitionType::new(self.kind, self.subtype),
            label: Label::from_field(&self.label),
            encrypted: false,
        }
    }
}

/// Parse the records found in `window` starting at `offset`
///
/// Stops at the first record with a bad magic or when fewer than
/// [`RECORD_SIZE`] bytes remain. An offset past the end yields no entries.
pub fn parse_table(window: &[u8], offset: usize) -> Vec<PartitionEntry> {
    let Some(records) = window.get(offset..) else {
        return Vec::new();
    };

    let mut entries = Vec::new();
    for (index, chunk) in records.chunks_exact(RECORD_SIZE).enumerate() {
        let Ok(record) = RawRecord::ref_from_bytes(chunk) else {
            break;
        };
        if !record.is_valid() {
            log::trace!(
                "record {} has magic 0x{:04X}, end of table",
                index,
                record.magic.get()
            );
            break;
        }

        let entry = record.to_entry();
        log::trace!(
            "record {}: {} flags=0x{:08X}",
            index,
            entry,
            record.flags.get()
        );
        entries.push(entry);
    }

    entries
}

/// Map the sector holding the table and parse it
///
/// The window is released before returning, whether or not parsing
/// succeeded.
pub fn load_table<S: FlashMap + ?Sized>(
    storage: &S,
    config: &TableConfig,
) -> Result<Vec<PartitionEntry>> {
    config.validate()?;

    let addr = config.sector_address();
    let len = config.sector_size;
    log::debug!(
        "Loading partition table at 0x{:08X} (sector 0x{:08X}, {} bytes)",
        config.table_address,
        addr,
        len
    );

    let window = storage
        .map(addr, len)
        .map_err(|source| Error::Map { addr, len, source })?;

    if window.len() < len as usize {
        return Err(Error::WindowTooSmall {
            addr,
            expected: len as usize,
            actual: window.len(),
        });
    }

    let entries = parse_table(&window[..len as usize], config.table_offset());
    drop(window);

    log::debug!("Found {} partitions", entries.len());
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MapError;
    use crate::storage::FlashWindow;

    fn record(kind: u8, subtype: u8, offset: u32, size: u32, label: &[u8]) -> [u8; RECORD_SIZE] {
        let mut data = [0u8; RECORD_SIZE];
        data[0..2].copy_from_slice(&PARTITION_MAGIC.to_le_bytes());
        data[2] = kind;
        data[3] = subtype;
        data[4..8].copy_from_slice(&offset.to_le_bytes());
        data[8..12].copy_from_slice(&size.to_le_bytes());
        data[12..12 + label.len()].copy_from_slice(label);
        data
    }

    fn make_sector(records: &[[u8; RECORD_SIZE]]) -> Vec<u8> {
        let mut data = vec![0xFF; 0x1000];
        for (i, rec) in records.iter().enumerate() {
            data[i * RECORD_SIZE..(i + 1) * RECORD_SIZE].copy_from_slice(rec);
        }
        data
    }

    #[test]
    fn test_parse_two_entries() {
        let data = make_sector(&[
            record(1, 2, 0x9000, 0x6000, b"nvs"),
            record(1, 0, 0xF000, 0x2000, b"otadata"),
        ]);
        let entries = parse_table(&data, 0);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].label, "nvs");
        assert_eq!(entries[0].address, 0x9000);
        assert_eq!(entries[0].size, 0x6000);
        assert_eq!(entries[0].kind, PartitionType::new(1, 2));
        assert!(!entries[0].encrypted);
        assert_eq!(entries[1].label, "otadata");
        assert_eq!(entries[1].kind.raw(), 0x0100);
    }

    #[test]
    fn test_parse_stops_at_bad_magic() {
        let mut bad = record(0, 0, 0x10000, 0x100000, b"factory");
        bad[0] = 0x00;
        let data = make_sector(&[
            record(1, 2, 0x9000, 0x6000, b"nvs"),
            record(1, 1, 0xF000, 0x1000, b"phy_init"),
            bad,
            record(0, 0x10, 0x110000, 0x100000, b"ota_0"),
        ]);
        let entries = parse_table(&data, 0);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].label, "phy_init");
    }

    #[test]
    fn test_parse_empty_table() {
        let data = vec![0xFF; 0x1000];
        assert!(parse_table(&data, 0).is_empty());
    }

    #[test]
    fn test_parse_full_label_is_bounded() {
        let data = make_sector(&[record(1, 0x81, 0x200000, 0x100000, b"abcdefghijklmnop")]);
        let entries = parse_table(&data, 0);
        assert_eq!(entries[0].label.len(), LABEL_LEN);
        assert_eq!(entries[0].label, "abcdefghijklmnop");
    }

    #[test]
    fn test_parse_ignores_flags() {
        let mut rec = record(0, 0, 0x10000, 0x100000, b"factory");
        rec[28..32].copy_from_slice(&1u32.to_le_bytes());
        let data = make_sector(&[rec]);
        let entries = parse_table(&data, 0);
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].encrypted);
    }

    #[test]
    fn test_parse_stops_at_sector_end() {
        let rec = record(1, 2, 0x9000, 0x6000, b"nvs");
        let data: Vec<u8> = rec.iter().copied().cycle().take(0x1000).collect();
        assert_eq!(parse_table(&data, 0).len(), 0x1000 / RECORD_SIZE);
        assert_eq!(parse_table(&data, 0xF00).len(), 0x100 / RECORD_SIZE);
    }

    #[test]
    fn test_parse_ignores_partial_trailing_record() {
        let rec = record(1, 2, 0x9000, 0x6000, b"nvs");
        let mut data = rec.to_vec();
        data.extend_from_slice(&rec[..16]);
        assert_eq!(parse_table(&data, 0).len(), 1);
    }

    #[test]
    fn test_parse_offset_past_end() {
        let data = make_sector(&[record(1, 2, 0x9000, 0x6000, b"nvs")]);
        assert!(parse_table(&data, 0x2000).is_empty());
    }

    #[test]
    fn test_load_table_from_flash() {
        let mut flash = vec![0xFF; 0x10000];
        flash[0x8000..0x9000].copy_from_slice(&make_sector(&[
            record(1, 2, 0x9000, 0x6000, b"nvs"),
            record(0, 0, 0x10000, 0x100000, b"factory"),
        ]));

        let entries = load_table(&flash, &TableConfig::default()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].label, "factory");
    }

    #[test]
    fn test_load_table_unaligned_address() {
        let mut flash = vec![0xFF; 0x10000];
        flash[0x8C00..0x8C20].copy_from_slice(&record(1, 2, 0x9000, 0x6000, b"nvs"));

        let entries = load_table(&flash, &TableConfig::at(0x8C00)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].label, "nvs");
    }

    #[test]
    fn test_load_table_map_failure() {
        let flash = vec![0xFF; 0x4000];
        let err = load_table(&flash, &TableConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::Map {
                addr: 0x8000,
                len: 0x1000,
                source: MapError::OutOfBounds { .. }
            }
        ));
    }

    struct ShortFlash;

    impl FlashMap for ShortFlash {
        fn map(&self, addr: u32, _len: u32) -> std::result::Result<FlashWindow<'_>, MapError> {
            Ok(FlashWindow::owned(addr, vec![0xFF; 64]))
        }
    }

    #[test]
    fn test_load_table_short_window() {
        let err = load_table(&ShortFlash, &TableConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::WindowTooSmall {
                expected: 0x1000,
                actual: 64,
                ..
            }
        ));
    }

    #[test]
    fn test_load_table_invalid_config() {
        let flash = vec![0xFF; 0x10000];
        let config = TableConfig {
            table_address: 0x8000,
            sector_size: 0x1001,
        };
        assert!(matches!(
            load_table(&flash, &config),
            Err(Error::InvalidConfig(_))
        ));
    }
}
