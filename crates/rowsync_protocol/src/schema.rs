//! Negotiated schema and its structural checks.

use crate::error::{SchemaError, SchemaResult};
use crate::rows::{qualified_name, ContainerSet, ContainerTable};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Column data type as negotiated with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// Boolean.
    Boolean,
    /// 64-bit integer.
    Integer,
    /// Floating point.
    Double,
    /// Fixed-point decimal.
    Decimal,
    /// Text.
    Text,
    /// Binary.
    Binary,
    /// Date and time.
    DateTime,
    /// GUID / UUID.
    Guid,
}

/// A column of a schema table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaColumn {
    /// Column name.
    pub name: String,
    /// Data type.
    pub data_type: ColumnType,
    /// Whether NULL is allowed.
    pub allow_null: bool,
    /// Read-only or computed column, never transferred.
    pub read_only: bool,
}

impl SchemaColumn {
    /// Creates a writable, non-null column.
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
            allow_null: false,
            read_only: false,
        }
    }

    /// Marks the column nullable.
    pub fn nullable(mut self) -> Self {
        self.allow_null = true;
        self
    }

    /// Marks the column read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// A table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaTable {
    /// Table name.
    pub name: String,
    /// Optional schema (namespace) name.
    pub schema_name: Option<String>,
    /// Columns, in row value order.
    pub columns: Vec<SchemaColumn>,
    /// Names of primary key columns.
    pub primary_keys: Vec<String>,
}

impl SchemaTable {
    /// Creates an empty table definition.
    pub fn new(name: impl Into<String>, schema_name: Option<String>) -> Self {
        Self {
            name: name.into(),
            schema_name,
            columns: Vec::new(),
            primary_keys: Vec::new(),
        }
    }

    /// Adds a column.
    pub fn with_column(mut self, column: SchemaColumn) -> Self {
        self.columns.push(column);
        self
    }

    /// Adds a primary key column name.
    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_keys.push(column.into());
        self
    }

    /// Returns the qualified name (`schema.table` or `table`).
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.name, self.schema_name.as_deref())
    }

    /// Finds a column by name.
    pub fn column(&self, name: &str) -> Option<&SchemaColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn matches(&self, table_name: &str, schema_name: Option<&str>) -> bool {
        self.name == table_name
            && self.schema_name.as_deref().unwrap_or("") == schema_name.unwrap_or("")
    }
}

/// A foreign-key style relation between two tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRelation {
    /// Relation name.
    pub name: String,
    /// Qualified name of the parent table.
    pub parent_table: String,
    /// Parent key columns.
    pub parent_columns: Vec<String>,
    /// Qualified name of the child table.
    pub child_table: String,
    /// Child key columns.
    pub child_columns: Vec<String>,
}

/// The negotiated schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Tables.
    pub tables: Vec<SchemaTable>,
    /// Relations.
    pub relations: Vec<SchemaRelation>,
}

impl Schema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table.
    pub fn with_table(mut self, table: SchemaTable) -> Self {
        self.tables.push(table);
        self
    }

    /// Adds a relation.
    pub fn with_relation(mut self, relation: SchemaRelation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Returns true if the schema has at least one table.
    pub fn has_tables(&self) -> bool {
        !self.tables.is_empty()
    }

    /// Finds a table by name and optional schema name.
    pub fn table(&self, table_name: &str, schema_name: Option<&str>) -> Option<&SchemaTable> {
        self.tables.iter().find(|t| t.matches(table_name, schema_name))
    }

    fn table_by_qualified_name(&self, qualified: &str) -> Option<&SchemaTable> {
        self.tables.iter().find(|t| t.qualified_name() == qualified)
    }

    /// Checks that every table, key and relation resolves inside this schema.
    ///
    /// This never mutates the schema, so calling it again on a consistent
    /// schema is a no-op.
    pub fn ensure_schema(&self) -> SchemaResult<()> {
        if self.tables.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut names = HashSet::new();
        for table in &self.tables {
            let qualified = table.qualified_name();
            if !names.insert(qualified.clone()) {
                return Err(SchemaError::DuplicateTable { table: qualified });
            }

            let mut columns = HashSet::new();
            for column in &table.columns {
                if !columns.insert(column.name.as_str()) {
                    return Err(SchemaError::DuplicateColumn {
                        table: qualified,
                        column: column.name.clone(),
                    });
                }
            }

            if table.primary_keys.is_empty() {
                return Err(SchemaError::MissingPrimaryKey { table: qualified });
            }
            for key in &table.primary_keys {
                if !columns.contains(key.as_str()) {
                    return Err(SchemaError::UnknownColumn {
                        table: qualified,
                        column: key.clone(),
                    });
                }
            }
        }

        for relation in &self.relations {
            if relation.parent_columns.len() != relation.child_columns.len()
                || relation.parent_columns.is_empty()
            {
                return Err(SchemaError::RelationArity {
                    relation: relation.name.clone(),
                });
            }
            self.check_relation_side(&relation.parent_table, &relation.parent_columns)?;
            self.check_relation_side(&relation.child_table, &relation.child_columns)?;
        }

        Ok(())
    }

    fn check_relation_side(&self, table: &str, columns: &[String]) -> SchemaResult<()> {
        let resolved = self
            .table_by_qualified_name(table)
            .ok_or_else(|| SchemaError::UnknownTable {
                table: table.to_string(),
            })?;
        for column in columns {
            if resolved.column(column).is_none() {
                return Err(SchemaError::UnknownColumn {
                    table: table.to_string(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }

    /// Returns a copy without read-only columns.
    ///
    /// Primary key columns are always kept, even if flagged read-only.
    pub fn sanitized(&self) -> Schema {
        let tables = self
            .tables
            .iter()
            .map(|table| SchemaTable {
                name: table.name.clone(),
                schema_name: table.schema_name.clone(),
                columns: table
                    .columns
                    .iter()
                    .filter(|c| !c.read_only || table.primary_keys.contains(&c.name))
                    .cloned()
                    .collect(),
                primary_keys: table.primary_keys.clone(),
            })
            .collect();

        Schema {
            tables,
            relations: self.relations.clone(),
        }
    }

    /// Builds a fresh container from `container`, validated against this schema.
    ///
    /// Tables unknown to the schema and rows whose value count does not match
    /// the table's column count are rejected. Repeated entries for one table
    /// are merged in arrival order.
    pub fn materialize(&self, container: ContainerSet) -> SchemaResult<ContainerSet> {
        let mut result = ContainerSet::new();

        for table in container.tables {
            let definition = self
                .table(&table.table_name, table.schema_name.as_deref())
                .ok_or_else(|| SchemaError::UnknownTable {
                    table: table.qualified_name(),
                })?;

            let expected = definition.columns.len();
            if let Some(row) = table.rows.iter().find(|r| r.values.len() != expected) {
                return Err(SchemaError::RowArity {
                    table: definition.qualified_name(),
                    expected,
                    actual: row.values.len(),
                });
            }

            let mut entry = ContainerTable::new(
                definition.name.clone(),
                definition.schema_name.clone(),
            );
            entry.rows = table.rows;
            result.merge(ContainerSet::new().with_table(entry));
        }

        Ok(result)
    }
}
