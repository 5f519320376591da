//! Change statistics reported by the server.

use crate::rows::RowState;
use serde::{Deserialize, Serialize};

/// Rows selected on the server for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChangesSelected {
    /// Table name.
    pub table_name: String,
    /// Optional schema name.
    pub schema_name: Option<String>,
    /// Inserted or updated rows.
    pub upserts: u64,
    /// Deleted rows.
    pub deletes: u64,
}

/// Rows selected on the server, per table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseChangesSelected {
    /// Per-table counters.
    pub tables: Vec<TableChangesSelected>,
}

impl DatabaseChangesSelected {
    /// Total rows selected.
    pub fn total_changes_selected(&self) -> u64 {
        self.tables.iter().map(|t| t.upserts + t.deletes).sum()
    }

    /// Total upserts selected.
    pub fn total_upserts(&self) -> u64 {
        self.tables.iter().map(|t| t.upserts).sum()
    }

    /// Total deletes selected.
    pub fn total_deletes(&self) -> u64 {
        self.tables.iter().map(|t| t.deletes).sum()
    }
}

/// Rows applied on the server for one table and row state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChangesApplied {
    /// Table name.
    pub table_name: String,
    /// Optional schema name.
    pub schema_name: Option<String>,
    /// Row state the counters refer to.
    pub state: RowState,
    /// Rows applied.
    pub applied: u64,
    /// Conflicts resolved while applying.
    pub resolved_conflicts: u64,
    /// Rows that failed to apply.
    pub failed: u64,
}

/// Rows the server applied from the client's upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseChangesApplied {
    /// Per-table counters.
    pub tables: Vec<TableChangesApplied>,
}

impl DatabaseChangesApplied {
    /// Total rows applied.
    pub fn total_applied(&self) -> u64 {
        self.tables.iter().map(|t| t.applied).sum()
    }

    /// Total conflicts resolved.
    pub fn total_resolved_conflicts(&self) -> u64 {
        self.tables.iter().map(|t| t.resolved_conflicts).sum()
    }

    /// Total rows failed.
    pub fn total_failed(&self) -> u64 {
        self.tables.iter().map(|t| t.failed).sum()
    }
}
