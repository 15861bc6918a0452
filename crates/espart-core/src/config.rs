//! Partition table location
//!
//! The table lives at a fixed flash address, inside one erase sector. Both
//! values can be overridden from a TOML file:
//!
//! ```toml
//! [partition_table]
//! address = 0x8000
//! sector_size = "4 KiB"
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::table::RECORD_SIZE;

/// Default flash address of the partition table
pub const DEFAULT_TABLE_ADDRESS: u32 = 0x8000;

/// Default flash sector size
pub const DEFAULT_SECTOR_SIZE: u32 = 0x1000;

/// Where to find the partition table and how large its sector is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableConfig {
    /// Physical address of the first record
    pub table_address: u32,
    /// Size of the sector holding the table; must be a power of two
    pub sector_size: u32,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            table_address: DEFAULT_TABLE_ADDRESS,
            sector_size: DEFAULT_SECTOR_SIZE,
        }
    }
}

impl TableConfig {
    /// Create a config for a table at `table_address` with the default sector size
    pub fn at(table_address: u32) -> Self {
        Self {
            table_address,
            ..Self::default()
        }
    }

    /// Check that the sector size is usable
    pub fn validate(&self) -> Result<()> {
        if !self.sector_size.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "sector size {:#x} is not a power of two",
                self.sector_size
            )));
        }
        if (self.sector_size as usize) < RECORD_SIZE {
            return Err(Error::InvalidConfig(format!(
                "sector size {:#x} is smaller than one record",
                self.sector_size
            )));
        }
        Ok(())
    }

    /// Start of the sector containing the table
    pub fn sector_address(&self) -> u32 {
        self.table_address & !(self.sector_size - 1)
    }

    /// Offset of the table inside its sector
    pub fn table_offset(&self) -> usize {
        (self.table_address - self.sector_address()) as usize
    }

    /// Load a config from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse a config from a TOML string
    ///
    /// Missing keys fall back to the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfigFile = toml::from_str(content)?;
        let table = file.partition_table.unwrap_or_default();
        let defaults = Self::default();

        let config = Self {
            table_address: table.address.unwrap_or(defaults.table_address),
            sector_size: table.sector_size.unwrap_or(defaults.sector_size),
        };
        config.validate()?;
        Ok(config)
    }
}

/// TOML config file structure
#[derive(Debug, Deserialize)]
struct TomlConfigFile {
    partition_table: Option<TomlTableSection>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlTableSection {
    #[serde(default, deserialize_with = "deserialize_size")]
    address: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_size")]
    sector_size: Option<u32>,
}

/// Deserialize a u32 given as an integer, a hex string or a size with unit
fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrStr {
        Int(u32),
        Str(String),
    }

    match IntOrStr::deserialize(deserializer)? {
        IntOrStr::Int(n) => Ok(Some(n)),
        IntOrStr::Str(s) => parse_size(&s).map(Some).map_err(serde::de::Error::custom),
    }
}

/// Parse a size string like "4 KiB", "0x8000" or "4096"
fn parse_size(s: &str) -> std::result::Result<u32, String> {
    let s = s.trim();

    if let Ok(n) = s.parse::<u32>() {
        return Ok(n);
    }

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u32::from_str_radix(hex.trim(), 16)
            .map_err(|e| format!("invalid hex: {}", e));
    }

    let invalid = || format!("invalid size: {}", s);

    let s_lower = s.to_lowercase();
    let (num_str, multiplier) = if let Some(n) = s_lower.strip_suffix("mib") {
        (n.trim(), 1024 * 1024)
    } else if let Some(n) = s_lower.strip_suffix("kib") {
        (n.trim(), 1024)
    } else if let Some(n) = s_lower.strip_suffix('b') {
        (n.trim(), 1)
    } else {
        return Err(invalid());
    };

    let num: u32 = num_str.parse().map_err(|_| invalid())?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size out of range: {}", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TableConfig::default();
        assert_eq!(config.table_address, 0x8000);
        assert_eq!(config.sector_size, 0x1000);
        assert_eq!(config.sector_address(), 0x8000);
        assert_eq!(config.table_offset(), 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unaligned_table_address() {
        let config = TableConfig::at(0x8400);
        assert_eq!(config.sector_address(), 0x8000);
        assert_eq!(config.table_offset(), 0x400);
    }

    #[test]
    fn test_validate_rejects_bad_sector_size() {
        let config = TableConfig {
            table_address: 0x8000,
            sector_size: 3000,
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = TableConfig {
            table_address: 0x8000,
            sector_size: 16,
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096"), Ok(4096));
        assert_eq!(parse_size("0x8000"), Ok(0x8000));
        assert_eq!(parse_size("4 KiB"), Ok(4096));
        assert_eq!(parse_size("1MiB"), Ok(1024 * 1024));
        assert_eq!(parse_size("64 B"), Ok(64));
        assert!(parse_size("lots").is_err());
        assert!(parse_size("0xZZ").is_err());
        assert!(parse_size("8192 MiB").is_err());
    }

    #[test]
    fn test_from_toml_str() {
        let config = TableConfig::from_toml_str(
            r#"
            [partition_table]
            address = "0x9000"
            sector_size = "64 KiB"
            "#,
        )
        .unwrap();
        assert_eq!(config.table_address, 0x9000);
        assert_eq!(config.sector_size, 0x10000);
        assert_eq!(config.sector_address(), 0);
    }

    #[test]
    fn test_from_toml_str_defaults() {
        let config = TableConfig::from_toml_str("").unwrap();
        assert_eq!(config, TableConfig::default());

        let toml = "[partition_table]\naddress = 16384\n";
        let config = TableConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.table_address, 0x4000);
        assert_eq!(config.sector_size, DEFAULT_SECTOR_SIZE);
    }

    #[test]
    fn test_from_toml_str_invalid() {
        let toml = "[partition_table]\nsector_size = 1000\n";
        let err = TableConfig::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let toml = "[partition_table]\naddress = \"far\"\n";
        let err = TableConfig::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }
}
