//! Per-row transforms applied around serialization.

use rowsync_protocol::{ContainerSet, SyncRow};

/// Transforms rows before upload serialization and after download
/// deserialization, e.g. to obfuscate fields.
///
/// Both hooks work in place and default to no-ops.
pub trait RowConverter: Send + Sync {
    /// Called for every row before it is serialized for upload.
    fn before_serialize(&self, _table: &str, _row: &mut SyncRow) {}

    /// Called for every row after a download part is deserialized.
    fn after_deserialize(&self, _table: &str, _row: &mut SyncRow) {}
}

pub(crate) fn before_serialize(converter: Option<&dyn RowConverter>, rows: &mut ContainerSet) {
    if let Some(converter) = converter {
        rows.for_each_row_mut(|table, row| converter.before_serialize(table, row));
    }
}

pub(crate) fn after_deserialize(converter: Option<&dyn RowConverter>, rows: &mut ContainerSet) {
    if let Some(converter) = converter {
        rows.for_each_row_mut(|table, row| converter.after_deserialize(table, row));
    }
}
