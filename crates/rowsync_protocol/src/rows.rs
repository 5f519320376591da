//! Row containers exchanged in batch parts.

use serde::{Deserialize, Serialize};

/// A single column value carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Double(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// Returns true if this is a NULL value.
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Returns the text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer content, if this is an integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

/// Change kind of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowState {
    /// Inserted or updated.
    Modified,
    /// Deleted (values still carry every column of the table).
    Deleted,
}

/// One changed row, values ordered like the schema table's columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRow {
    /// Change kind.
    pub state: RowState,
    /// Column values.
    pub values: Vec<FieldValue>,
}

impl SyncRow {
    /// Creates a modified row.
    pub fn modified(values: Vec<FieldValue>) -> Self {
        Self {
            state: RowState::Modified,
            values,
        }
    }

    /// Creates a deleted row.
    pub fn deleted(values: Vec<FieldValue>) -> Self {
        Self {
            state: RowState::Deleted,
            values,
        }
    }
}

/// Rows of one table inside a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerTable {
    /// Table name.
    pub table_name: String,
    /// Optional schema (namespace) name.
    pub schema_name: Option<String>,
    /// Rows.
    pub rows: Vec<SyncRow>,
}

impl ContainerTable {
    /// Creates an empty table entry.
    pub fn new(table_name: impl Into<String>, schema_name: Option<String>) -> Self {
        Self {
            table_name: table_name.into(),
            schema_name,
            rows: Vec::new(),
        }
    }

    /// Adds a row and returns self.
    pub fn with_row(mut self, row: SyncRow) -> Self {
        self.rows.push(row);
        self
    }

    /// Returns the qualified name (`schema.table` or `table`).
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.table_name, self.schema_name.as_deref())
    }
}

/// The row payload of one batch part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSet {
    /// Tables with rows.
    pub tables: Vec<ContainerTable>,
}

impl ContainerSet {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table entry and returns self.
    pub fn with_table(mut self, table: ContainerTable) -> Self {
        self.tables.push(table);
        self
    }

    /// Returns the total number of rows across tables.
    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }

    /// Returns true if no table holds any row.
    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    /// Appends the tables of another container, merging entries for the same table.
    pub fn merge(&mut self, other: ContainerSet) {
        for table in other.tables {
            match self.tables.iter_mut().find(|t| {
                t.table_name == table.table_name && t.schema_name == table.schema_name
            }) {
                Some(existing) => existing.rows.extend(table.rows),
                None => self.tables.push(table),
            }
        }
    }

    /// Applies `f` to every row together with its table name.
    pub fn for_each_row_mut(&mut self, mut f: impl FnMut(&str, &mut SyncRow)) {
        for table in &mut self.tables {
            let name = table.qualified_name();
            for row in &mut table.rows {
                f(&name, row);
            }
        }
    }
}

pub(crate) fn qualified_name(table: &str, schema: Option<&str>) -> String {
    match schema {
        Some(schema) if !schema.is_empty() => format!("{}.{}", schema, table),
        _ => table.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customers(n: i64) -> ContainerTable {
        let mut table = ContainerTable::new("Customer", Some("dbo".into()));
        for i in 0..n {
            table.rows.push(SyncRow::modified(vec![
                FieldValue::Integer(i),
                FieldValue::Text(format!("c{}", i)),
            ]));
        }
        table
    }

    #[test]
    fn row_count_spans_tables() {
        let set = ContainerSet::new()
            .with_table(customers(3))
            .with_table(ContainerTable::new("Product", None).with_row(SyncRow::deleted(vec![
                FieldValue::Integer(9),
            ])));
        assert_eq!(set.row_count(), 4);
        assert!(!set.is_empty());
        assert!(ContainerSet::new().is_empty());
    }

    #[test]
    fn merge_joins_same_table() {
        let mut set = ContainerSet::new().with_table(customers(2));
        set.merge(ContainerSet::new().with_table(customers(3)));
        assert_eq!(set.tables.len(), 1);
        assert_eq!(set.row_count(), 5);
    }

    #[test]
    fn for_each_row_sees_qualified_names() {
        let mut set = ContainerSet::new().with_table(customers(2));
        let mut seen = Vec::new();
        set.for_each_row_mut(|name, row| {
            seen.push(name.to_string());
            row.values[1] = FieldValue::Null;
        });
        assert_eq!(seen, vec!["dbo.Customer", "dbo.Customer"]);
        assert!(set.tables[0].rows.iter().all(|r| r.values[1].is_null()));
    }
}
