//! Partition table support
//!
//! Types describing table entries and the parser that reads them out of a
//! flash window.

mod parser;
mod types;

pub use parser::{load_table, parse_table, PARTITION_MAGIC, RECORD_SIZE};
pub use types::*;
