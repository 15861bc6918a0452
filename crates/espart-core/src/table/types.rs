//! Partition table types

use std::fmt;

/// Width of the label field in a table record
pub const LABEL_LEN: usize = 16;

/// Well-known minor types, grouped by major type
pub mod subtype {
    /// Minor types of application partitions
    pub mod app {
        /// Factory application image
        pub const FACTORY: u8 = 0x00;
        /// First OTA slot; slots 0-15 are consecutive
        pub const OTA_0: u8 = 0x10;
        /// Last OTA slot
        pub const OTA_15: u8 = 0x1F;
        /// Test application image
        pub const TEST: u8 = 0x20;

        /// Minor type of OTA slot `n`, if `n` is a valid slot
        pub const fn ota(n: u8) -> Option<u8> {
            if n <= OTA_15 - OTA_0 {
                Some(OTA_0 + n)
            } else {
                None
            }
        }
    }

    /// Minor types of data partitions
    pub mod data {
        /// OTA selection data
        pub const OTA: u8 = 0x00;
        /// PHY calibration data
        pub const PHY: u8 = 0x01;
        /// Non-volatile key/value storage
        pub const NVS: u8 = 0x02;
        /// Core dump area
        pub const COREDUMP: u8 = 0x03;
        /// NVS encryption keys
        pub const NVS_KEYS: u8 = 0x04;
        /// Emulated eFuse storage
        pub const EFUSE_EM: u8 = 0x05;
        /// ESPHTTPD filesystem
        pub const ESPHTTPD: u8 = 0x80;
        /// FAT filesystem
        pub const FAT: u8 = 0x81;
        /// SPIFFS filesystem
        pub const SPIFFS: u8 = 0x82;
    }
}

/// Two-level partition type
///
/// On the wire and in the packed form the major type is the high byte and
/// the minor type the low byte. A minor of [`PartitionType::ANY_MINOR`] turns
/// the type into a filter that accepts every minor of its major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionType {
    /// Major type (application, data, ...)
    pub major: u8,
    /// Minor type within the major
    pub minor: u8,
}

impl PartitionType {
    /// Application partition major type
    pub const APP: u8 = 0x00;
    /// Data partition major type
    pub const DATA: u8 = 0x01;
    /// Minor value matching any minor type
    pub const ANY_MINOR: u8 = 0xFF;

    /// Create a type from its major and minor parts
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Filter matching every minor type of `major`
    pub const fn any(major: u8) -> Self {
        Self::new(major, Self::ANY_MINOR)
    }

    /// Unpack a `(major << 8) | minor` value
    pub const fn from_raw(raw: u16) -> Self {
        Self::new((raw >> 8) as u8, raw as u8)
    }

    /// Pack into `(major << 8) | minor`
    pub const fn raw(self) -> u16 {
        ((self.major as u16) << 8) | self.minor as u16
    }

    /// Whether the minor part is the wildcard
    pub const fn is_any_minor(self) -> bool {
        self.minor == Self::ANY_MINOR
    }

    /// Check whether an entry of type `other` satisfies this type as a filter
    pub fn matches(self, other: PartitionType) -> bool {
        self.major == other.major && (self.is_any_minor() || self.minor == other.minor)
    }
}

impl From<u16> for PartitionType {
    fn from(raw: u16) -> Self {
        Self::from_raw(raw)
    }
}

impl From<PartitionType> for u16 {
    fn from(kind: PartitionType) -> Self {
        kind.raw()
    }
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any_minor() {
            write!(f, "{:#04x}/*", self.major)
        } else {
            write!(f, "{:#04x}/{:#04x}", self.major, self.minor)
        }
    }
}

/// Partition label, at most [`LABEL_LEN`] bytes
///
/// The record field is fixed-width and only NUL-terminated when shorter than
/// the field; the label holds the bytes before the first NUL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Label(heapless::Vec<u8, LABEL_LEN>);

impl Label {
    /// Create a label from a string, or `None` if it is longer than [`LABEL_LEN`]
    pub fn new(label: &str) -> Option<Self> {
        heapless::Vec::from_slice(label.as_bytes()).ok().map(Self)
    }

    /// Build a label from a raw record field
    pub fn from_field(field: &[u8; LABEL_LEN]) -> Self {
        let end = field.iter().position(|&b| b == 0).unwrap_or(LABEL_LEN);
        Self(field[..end].iter().copied().collect())
    }

    /// Raw label bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Label as a string, if it is valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the label is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq<str> for Label {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for Label {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// One partition described by the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    /// Start address in flash
    pub address: u32,
    /// Length in bytes
    pub size: u32,
    /// Major/minor type
    pub kind: PartitionType,
    /// Partition name
    pub label: Label,
    /// Whether the partition contents are encrypted
    ///
    /// Always `false`: the table does not carry this and nothing here knows
    /// the flash encryption state.
    pub encrypted: bool,
}

impl PartitionEntry {
    /// First address past the end of the partition
    pub fn end(&self) -> u64 {
        self.address as u64 + self.size as u64
    }

    /// Check if an address is within this partition
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.address && (addr as u64) < self.end()
    }
}

impl fmt::Display for PartitionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<16} {} 0x{:08X} 0x{:08X}",
            self.label, self.kind, self.address, self.size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_packing() {
        let kind = PartitionType::new(0x01, 0x02);
        assert_eq!(kind.raw(), 0x0102);
        assert_eq!(PartitionType::from_raw(0x0102), kind);
        assert_eq!(PartitionType::from(0x0102u16), kind);
        assert_eq!(u16::from(PartitionType::any(0x01)), 0x01FF);
    }

    #[test]
    fn test_type_matching() {
        let nvs = PartitionType::new(PartitionType::DATA, subtype::data::NVS);
        let phy = PartitionType::new(PartitionType::DATA, subtype::data::PHY);
        let factory = PartitionType::new(PartitionType::APP, subtype::app::FACTORY);

        assert!(PartitionType::any(PartitionType::DATA).matches(nvs));
        assert!(PartitionType::any(PartitionType::DATA).matches(phy));
        assert!(!PartitionType::any(PartitionType::DATA).matches(factory));
        assert!(nvs.matches(nvs));
        assert!(!nvs.matches(phy));
    }

    #[test]
    fn test_ota_subtypes() {
        assert_eq!(subtype::app::ota(0), Some(0x10));
        assert_eq!(subtype::app::ota(15), Some(0x1F));
        assert_eq!(subtype::app::ota(16), None);
    }

    #[test]
    fn test_type_display() {
        assert_eq!(PartitionType::new(1, 2).to_string(), "0x01/0x02");
        assert_eq!(PartitionType::any(0).to_string(), "0x00/*");
    }

    #[test]
    fn test_label_from_terminated_field() {
        let mut field = [0u8; LABEL_LEN];
        field[..3].copy_from_slice(b"nvs");
        field[5] = b'x';
        let label = Label::from_field(&field);
        assert_eq!(label, "nvs");
        assert_eq!(label.len(), 3);
    }

    #[test]
    fn test_label_from_full_field() {
        let field = *b"abcdefghijklmnop";
        let label = Label::from_field(&field);
        assert_eq!(label.len(), LABEL_LEN);
        assert_eq!(label.as_str(), Some("abcdefghijklmnop"));
    }

    #[test]
    fn test_label_new() {
        assert_eq!(Label::new("otadata").unwrap(), "otadata");
        assert!(Label::new("sixteen_chars_ok").is_some());
        assert!(Label::new("seventeen_chars_x").is_none());
        assert!(Label::new("").unwrap().is_empty());
    }

    #[test]
    fn test_label_non_utf8() {
        let mut field = [0u8; LABEL_LEN];
        field[0] = 0xC3;
        field[1] = b'a';
        let label = Label::from_field(&field);
        assert_eq!(label.as_str(), None);
        assert_eq!(label.as_bytes(), &[0xC3, b'a']);
        assert_eq!(label.to_string(), "\u{FFFD}a");
    }

    #[test]
    fn test_entry_bounds() {
        let entry = PartitionEntry {
            address: 0x9000,
            size: 0x6000,
            kind: PartitionType::new(1, 2),
            label: Label::new("nvs").unwrap(),
            encrypted: false,
        };
        assert_eq!(entry.end(), 0xF000);
        assert!(entry.contains(0x9000));
        assert!(entry.contains(0xEFFF));
        assert!(!entry.contains(0xF000));
        assert!(!entry.contains(0x8FFF));
    }
}
