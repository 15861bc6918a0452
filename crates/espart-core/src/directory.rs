//! Partition directory and lookup
//!
//! [`PartitionDirectory`] owns a storage backend and loads the partition
//! table from it the first time a lookup needs it. Loading is double-checked:
//! a lock-free check of the published table, then the directory lock, a
//! second check, and only then the loader. A failed load publishes nothing,
//! so the next lookup tries again.
//!
//! Lookups hand out a [`PartitionIterator`], a cursor that is always
//! positioned on a matching entry. Advancing past the last match consumes
//! the cursor:
//!
//! ```ignore
//! let mut it = directory.find(PartitionType::any(PartitionType::APP), None)?;
//! while let Some(cursor) = it {
//!     println!("{}", cursor.get());
//!     it = cursor.advance();
//! }
//! ```
//!
//! [`Partitions`] offers the same traversal as a standard [`Iterator`].

use std::fmt;
use std::iter;
use std::sync::{Mutex, MutexGuard, PoisonError};

use once_cell::sync::OnceCell;

use crate::config::TableConfig;
use crate::error::Result;
use crate::storage::FlashMap;
use crate::table::{load_table, Label, PartitionEntry, PartitionType};

/// Label constraint of a filter
#[derive(Debug, Clone, PartialEq, Eq)]
enum LabelMatch {
    Any,
    Exact(Label),
    /// Requested label is longer than any stored label can be
    Never,
}

/// Type and label constraints applied during lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFilter {
    kind: PartitionType,
    label: LabelMatch,
}

impl PartitionFilter {
    /// Create a filter for `kind`, optionally requiring an exact label
    ///
    /// A minor of [`PartitionType::ANY_MINOR`] accepts every minor type.
    pub fn new(kind: PartitionType, label: Option<&str>) -> Self {
        let label = match label {
            None => LabelMatch::Any,
            Some(name) => Label::new(name).map_or(LabelMatch::Never, LabelMatch::Exact),
        };
        Self { kind, label }
    }

    /// Requested type
    pub fn kind(&self) -> PartitionType {
        self.kind
    }

    /// Check an entry against the filter
    pub fn matches(&self, entry: &PartitionEntry) -> bool {
        if !self.kind.matches(entry.kind) {
            return false;
        }
        match &self.label {
            LabelMatch::Any => true,
            LabelMatch::Exact(label) => entry.label.as_bytes() == label.as_bytes(),
            LabelMatch::Never => false,
        }
    }
}

/// Lazily loaded, read-only view of a flash partition table
pub struct PartitionDirectory<S> {
    storage: S,
    config: TableConfig,
    entries: OnceCell<Vec<PartitionEntry>>,
    lock: Mutex<()>,
}

impl<S> PartitionDirectory<S> {
    /// Storage backend
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Table location
    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Whether the table has been loaded
    pub fn is_loaded(&self) -> bool {
        self.entries.get().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // Guards no data, poisoning is irrelevant
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Find the first match at or after `from`, under the directory lock
    fn scan(&self, filter: &PartitionFilter, from: usize) -> Option<(usize, &PartitionEntry)> {
        let _guard = self.lock();
        let entries = self.entries.get().map_or(&[][..], Vec::as_slice);
        entries
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, entry)| filter.matches(entry))
    }
}

impl<S: FlashMap> PartitionDirectory<S> {
    /// Create a directory for a table at the default location
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            config: TableConfig::default(),
            entries: OnceCell::new(),
            lock: Mutex::new(()),
        }
    }

    /// Create a directory for a table described by `config`
    pub fn with_config(storage: S, config: TableConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            config,
            entries: OnceCell::new(),
            lock: Mutex::new(()),
        })
    }

    /// Load the table now instead of on first lookup
    pub fn initialize(&self) -> Result<()> {
        self.entries().map(|_| ())
    }

    fn entries(&self) -> Result<&[PartitionEntry]> {
        if let Some(entries) = self.entries.get() {
            return Ok(entries.as_slice());
        }

        let _guard = self.lock();
        if let Some(entries) = self.entries.get() {
            return Ok(entries.as_slice());
        }

        match load_table(&self.storage, &self.config) {
            Ok(entries) => Ok(self.entries.get_or_init(|| entries).as_slice()),
            Err(e) => {
                log::warn!("Failed to load partition table: {}", e);
                Err(e)
            }
        }
    }

    /// Find partitions of type `kind`, optionally with an exact `label`
    ///
    /// Returns a cursor positioned on the first match, or `None` when nothing
    /// matches. Fails only if the table had to be loaded and could not be.
    pub fn find(
        &self,
        kind: PartitionType,
        label: Option<&str>,
    ) -> Result<Option<PartitionIterator<'_, S>>> {
        self.find_filtered(PartitionFilter::new(kind, label))
    }

    /// Find partitions matching a prepared filter
    pub fn find_filtered(
        &self,
        filter: PartitionFilter,
    ) -> Result<Option<PartitionIterator<'_, S>>> {
        self.entries()?;
        log::trace!("find {} label={:?}", filter.kind, filter.label);
        Ok(PartitionIterator::position(Partitions {
            directory: self,
            filter,
            next: 0,
        }))
    }

    /// Find the first partition of type `kind`, optionally with an exact `label`
    pub fn find_first(
        &self,
        kind: PartitionType,
        label: Option<&str>,
    ) -> Result<Option<&PartitionEntry>> {
        Ok(self.find(kind, label)?.map(|it| it.get()))
    }

    /// Iterate over all partitions of type `kind`, optionally with an exact `label`
    pub fn iter(&self, kind: PartitionType, label: Option<&str>) -> Result<Partitions<'_, S>> {
        self.entries()?;
        Ok(Partitions {
            directory: self,
            filter: PartitionFilter::new(kind, label),
            next: 0,
        })
    }
}

impl<S> fmt::Debug for PartitionDirectory<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionDirectory")
            .field("config", &self.config)
            .field("entries", &self.entries.get().map(Vec::len))
            .finish_non_exhaustive()
    }
}

/// Iterator over the partitions matching a filter
///
/// Each call to `next` scans forward under the directory lock.
pub struct Partitions<'d, S> {
    directory: &'d PartitionDirectory<S>,
    filter: PartitionFilter,
    next: usize,
}

impl<'d, S> Iterator for Partitions<'d, S> {
    type Item = &'d PartitionEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let (index, entry) = self.directory.scan(&self.filter, self.next)?;
        self.next = index + 1;
        Some(entry)
    }
}

impl<S> fmt::Debug for Partitions<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partitions")
            .field("filter", &self.filter)
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

/// Cursor positioned on a matching partition
///
/// A cursor only exists while it points at a match. [`advance`] moves it to
/// the next match or consumes it when there is none; dropping it or calling
/// [`release`] ends the traversal early.
///
/// [`advance`]: PartitionIterator::advance
/// [`release`]: PartitionIterator::release
pub struct PartitionIterator<'d, S> {
    rest: Partitions<'d, S>,
    current: &'d PartitionEntry,
}

impl<'d, S> PartitionIterator<'d, S> {
    fn position(mut rest: Partitions<'d, S>) -> Option<Self> {
        let current = rest.next()?;
        Some(Self { rest, current })
    }

    /// Move to the next match, or `None` once the table is exhausted
    pub fn advance(self) -> Option<Self> {
        Self::position(self.rest)
    }

    /// End the traversal
    pub fn release(self) {}

    /// Current entry
    pub fn get(&self) -> &'d PartitionEntry {
        self.current
    }

    /// Type of the current entry
    pub fn kind(&self) -> PartitionType {
        self.current.kind
    }

    /// Size of the current entry
    pub fn size(&self) -> u32 {
        self.current.size
    }

    /// Address of the current entry
    pub fn address(&self) -> u32 {
        self.current.address
    }

    /// Label of the current entry
    pub fn label(&self) -> &'d Label {
        &self.current.label
    }

    /// Encryption flag of the current entry
    pub fn is_encrypted(&self) -> bool {
        self.current.encrypted
    }
}

impl<'d, S> IntoIterator for PartitionIterator<'d, S> {
    type Item = &'d PartitionEntry;
    type IntoIter = iter::Chain<iter::Once<&'d PartitionEntry>, Partitions<'d, S>>;

    fn into_iter(self) -> Self::IntoIter {
        iter::once(self.current).chain(self.rest)
    }
}

impl<S> fmt::Debug for PartitionIterator<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionIterator")
            .field("current", self.current)
            .field("rest", &self.rest)
            .finish()
    }
}
