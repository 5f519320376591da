//! Batches of changed rows split into ordered parts.
//!
//! A [`BatchInfo`] either keeps every part's rows in memory or persists each
//! part to a [`BatchPartStore`] as soon as it is appended, so that at most one
//! part's rows are held in memory while a batch is transferred.

use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use rowsync_protocol::{CborSerializer, ContainerSet, Schema, SyncSerializer};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Persists and reloads batch parts by index.
pub trait BatchPartStore: Send + Sync {
    /// Persists the rows of one part.
    fn persist(&self, index: u32, rows: &ContainerSet) -> SyncResult<()>;

    /// Loads the rows of one part.
    fn load(&self, index: u32) -> SyncResult<ContainerSet>;

    /// Removes every persisted part.
    fn clear(&self) -> SyncResult<()>;
}

/// In-memory part store, keyed by index.
#[derive(Debug, Default)]
pub struct MemoryPartStore {
    parts: RwLock<BTreeMap<u32, ContainerSet>>,
}

impl MemoryPartStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored parts.
    pub fn len(&self) -> usize {
        self.parts.read().len()
    }

    /// Returns true if no part is stored.
    pub fn is_empty(&self) -> bool {
        self.parts.read().is_empty()
    }
}

impl BatchPartStore for MemoryPartStore {
    fn persist(&self, index: u32, rows: &ContainerSet) -> SyncResult<()> {
        self.parts.write().insert(index, rows.clone());
        Ok(())
    }

    fn load(&self, index: u32) -> SyncResult<ContainerSet> {
        self.parts
            .read()
            .get(&index)
            .cloned()
            .ok_or_else(|| SyncError::Storage(format!("batch part {} not found", index)))
    }

    fn clear(&self) -> SyncResult<()> {
        self.parts.write().clear();
        Ok(())
    }
}

/// Part store writing one CBOR file per part into a directory.
#[derive(Debug)]
pub struct DirectoryPartStore {
    directory: PathBuf,
}

impl DirectoryPartStore {
    /// Creates the directory (and parents) if needed.
    pub fn create(directory: impl Into<PathBuf>) -> SyncResult<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    /// Returns the directory holding the parts.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn part_path(&self, index: u32) -> PathBuf {
        self.directory.join(format!("part_{:06}.batch", index))
    }
}

impl BatchPartStore for DirectoryPartStore {
    fn persist(&self, index: u32, rows: &ContainerSet) -> SyncResult<()> {
        let bytes = CborSerializer.serialize(rows)?;
        fs::write(self.part_path(index), bytes)?;
        Ok(())
    }

    fn load(&self, index: u32) -> SyncResult<ContainerSet> {
        let path = self.part_path(index);
        let bytes = fs::read(&path).map_err(|e| {
            SyncError::Storage(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(CborSerializer.deserialize(&bytes)?)
    }

    fn clear(&self) -> SyncResult<()> {
        if self.directory.exists() {
            fs::remove_dir_all(&self.directory)?;
        }
        Ok(())
    }
}

/// Where the rows of a batch live. Chosen once when the batch is built.
#[derive(Clone)]
pub enum BatchStorage {
    /// Rows stay in each part.
    InMemory,
    /// Rows are persisted to the store and released from the part.
    Persisted {
        /// Part store.
        store: Arc<dyn BatchPartStore>,
    },
}

impl fmt::Debug for BatchStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStorage::InMemory => f.write_str("InMemory"),
            BatchStorage::Persisted { .. } => f.write_str("Persisted"),
        }
    }
}

/// One slice of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPart {
    /// Part index, contiguous from 0.
    pub index: u32,
    /// Whether this is the last part.
    pub is_last: bool,
    /// Number of rows in the part.
    pub row_count: usize,
    rows: Option<ContainerSet>,
}

impl BatchPart {
    /// Returns the in-memory rows, if held.
    pub fn rows(&self) -> Option<&ContainerSet> {
        self.rows.as_ref()
    }
}

/// An ordered batch of parts for one direction of a run.
#[derive(Debug, Clone)]
pub struct BatchInfo {
    parts: Vec<BatchPart>,
    storage: BatchStorage,
    schema: Option<Schema>,
    row_count: usize,
}

impl BatchInfo {
    /// Creates an empty in-memory batch.
    pub fn in_memory() -> Self {
        Self::with_storage(BatchStorage::InMemory)
    }

    /// Creates an empty batch persisting parts to `store`.
    pub fn persisted(store: Arc<dyn BatchPartStore>) -> Self {
        Self::with_storage(BatchStorage::Persisted { store })
    }

    /// Creates an empty batch with the given storage.
    pub fn with_storage(storage: BatchStorage) -> Self {
        Self {
            parts: Vec::new(),
            storage,
            schema: None,
            row_count: 0,
        }
    }

    /// Attaches the sanitized schema the rows are validated against.
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Returns the sanitized schema, if attached.
    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// Returns the storage mode.
    pub fn storage(&self) -> &BatchStorage {
        &self.storage
    }

    /// Returns true if rows stay in memory.
    pub fn is_in_memory(&self) -> bool {
        matches!(self.storage, BatchStorage::InMemory)
    }

    /// Returns the parts in index order.
    pub fn parts(&self) -> &[BatchPart] {
        &self.parts
    }

    /// Returns the number of parts.
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Returns the total number of rows across parts.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Returns true if any part holds rows.
    pub fn has_data(&self) -> bool {
        self.row_count > 0
    }

    /// Returns true if the last part has been appended.
    pub fn is_complete(&self) -> bool {
        self.parts.last().is_some_and(|p| p.is_last)
    }

    /// Appends the next part.
    ///
    /// `index` must equal the number of parts already held and no part may
    /// follow the last one. In persisted mode the rows are written to the
    /// store and released.
    pub fn append_part(&mut self, index: u32, is_last: bool, rows: ContainerSet) -> SyncResult<()> {
        if self.is_complete() {
            return Err(SyncError::protocol(format!(
                "batch part {} received after the last part",
                index
            )));
        }
        let expected = self.parts.len() as u32;
        if index != expected {
            return Err(SyncError::protocol(format!(
                "batch part {} received, expected {}",
                index, expected
            )));
        }

        let row_count = rows.row_count();
        let rows = match &self.storage {
            BatchStorage::InMemory => Some(rows),
            BatchStorage::Persisted { store } => {
                store.persist(index, &rows)?;
                None
            }
        };

        self.parts.push(BatchPart {
            index,
            is_last,
            row_count,
            rows,
        });
        self.row_count += row_count;
        Ok(())
    }

    /// Loads the rows of one part, from memory or from the store.
    pub fn load_part(&self, index: u32) -> SyncResult<ContainerSet> {
        let part = self
            .parts
            .get(index as usize)
            .ok_or_else(|| SyncError::Storage(format!("batch part {} not found", index)))?;

        match (&self.storage, &part.rows) {
            (_, Some(rows)) => Ok(rows.clone()),
            (BatchStorage::Persisted { store }, None) => store.load(index),
            (BatchStorage::InMemory, None) => Ok(ContainerSet::new()),
        }
    }

    /// Returns every in-memory row merged into one container.
    pub fn in_memory_rows(&self) -> ContainerSet {
        let mut merged = ContainerSet::new();
        for part in &self.parts {
            if let Some(rows) = &part.rows {
                merged.merge(rows.clone());
            }
        }
        merged
    }

    /// Removes persisted parts from the store and forgets every part.
    pub fn clear(&mut self) -> SyncResult<()> {
        if let BatchStorage::Persisted { store } = &self.storage {
            store.clear()?;
        }
        self.parts.clear();
        self.row_count = 0;
        Ok(())
    }
}

impl Default for BatchInfo {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_protocol::{ContainerTable, FieldValue, SyncRow};

    fn rows(n: usize) -> ContainerSet {
        let mut table = ContainerTable::new("Product", None);
        for i in 0..n {
            table
                .rows
                .push(SyncRow::modified(vec![FieldValue::Integer(i as i64)]));
        }
        ContainerSet::new().with_table(table)
    }

    #[test]
    fn in_memory_parts_keep_rows() {
        let mut batch = BatchInfo::in_memory();
        batch.append_part(0, false, rows(5)).unwrap();
        batch.append_part(1, true, rows(3)).unwrap();

        assert!(batch.is_in_memory());
        assert!(batch.is_complete());
        assert_eq!(batch.row_count(), 8);
        assert_eq!(batch.parts()[1].rows().unwrap().row_count(), 3);
        assert_eq!(batch.in_memory_rows().row_count(), 8);
    }

    #[test]
    fn persisted_parts_release_rows() {
        let store = Arc::new(MemoryPartStore::new());
        let mut batch = BatchInfo::persisted(store.clone());
        batch.append_part(0, false, rows(2)).unwrap();
        batch.append_part(1, true, rows(4)).unwrap();

        assert!(!batch.is_in_memory());
        assert_eq!(store.len(), 2);
        assert!(batch.parts().iter().all(|p| p.rows().is_none()));
        assert_eq!(batch.load_part(1).unwrap().row_count(), 4);
        assert_eq!(batch.in_memory_rows().row_count(), 0);

        batch.clear().unwrap();
        assert!(store.is_empty());
        assert_eq!(batch.part_count(), 0);
    }

    #[test]
    fn gap_is_rejected() {
        let mut batch = BatchInfo::in_memory();
        batch.append_part(0, false, rows(1)).unwrap();
        let err = batch.append_part(2, true, rows(1)).unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }

    #[test]
    fn repeat_is_rejected() {
        let mut batch = BatchInfo::in_memory();
        batch.append_part(0, false, rows(1)).unwrap();
        assert!(batch.append_part(0, false, rows(1)).is_err());
    }

    #[test]
    fn nothing_after_last() {
        let mut batch = BatchInfo::in_memory();
        batch.append_part(0, true, rows(1)).unwrap();
        assert!(batch.append_part(1, true, rows(1)).is_err());
    }

    #[test]
    fn directory_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DirectoryPartStore::create(dir.path().join("run")).unwrap());
        let mut batch = BatchInfo::persisted(store.clone());
        batch.append_part(0, true, rows(6)).unwrap();

        assert!(store.directory().join("part_000000.batch").exists());
        assert_eq!(batch.load_part(0).unwrap(), rows(6));

        batch.clear().unwrap();
        assert!(!store.directory().exists());
    }

    #[test]
    fn missing_part_is_a_storage_error() {
        let store = MemoryPartStore::new();
        assert!(matches!(store.load(3), Err(SyncError::Storage(_))));
        assert!(matches!(
            BatchInfo::in_memory().load_part(0),
            Err(SyncError::Storage(_))
        ));
    }
}
