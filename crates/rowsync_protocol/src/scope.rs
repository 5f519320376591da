//! Scope records exchanged with the server.

use crate::context::SyncParameters;
use crate::schema::Schema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A table participating in a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupTable {
    /// Table name.
    pub name: String,
    /// Optional schema (namespace) name.
    pub schema_name: Option<String>,
    /// Synchronized columns; empty means all columns.
    pub columns: Vec<String>,
}

impl SetupTable {
    /// Creates a table entry synchronizing all columns.
    pub fn new(name: impl Into<String>, schema_name: Option<String>) -> Self {
        Self {
            name: name.into(),
            schema_name,
            columns: Vec::new(),
        }
    }
}

/// A row filter attached to a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupFilter {
    /// Filtered table.
    pub table_name: String,
    /// Names of the parameters the filter takes.
    pub parameters: Vec<String>,
}

/// The tables and filters a scope synchronizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSetup {
    /// Tables.
    pub tables: Vec<SetupTable>,
    /// Filters.
    pub filters: Vec<SetupFilter>,
}

impl SyncSetup {
    /// Creates a setup from table names.
    pub fn with_tables<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: tables
                .into_iter()
                .map(|name| SetupTable::new(name, None))
                .collect(),
            filters: Vec::new(),
        }
    }

    /// Returns true if the setup has at least one table.
    pub fn has_tables(&self) -> bool {
        !self.tables.is_empty()
    }
}

/// The scope as the server describes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerScopeInfo {
    /// Scope name.
    pub name: String,
    /// Scope version.
    pub version: String,
    /// Setup, if provisioned.
    pub setup: Option<SyncSetup>,
    /// Negotiated schema, if requested.
    pub schema: Option<Schema>,
    /// Last time the server cleaned up tracking metadata.
    pub last_cleanup_timestamp: Option<i64>,
}

/// The scope as the client tracks it between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientScopeInfo {
    /// Client scope id.
    pub id: Uuid,
    /// Scope name.
    pub name: String,
    /// Known schema, if any.
    pub schema: Option<Schema>,
    /// Known setup, if any.
    pub setup: Option<SyncSetup>,
    /// Filter parameter values.
    pub parameters: SyncParameters,
    /// High-watermark returned by the server on the last run.
    pub last_server_sync_timestamp: Option<i64>,
    /// Local timestamp of the last run.
    pub last_sync_timestamp: Option<i64>,
}

impl ClientScopeInfo {
    /// Creates a new client scope with a random id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            schema: None,
            setup: None,
            parameters: SyncParameters::new(),
            last_server_sync_timestamp: None,
            last_sync_timestamp: None,
        }
    }

    /// Sets the schema and returns self.
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Returns true if this scope never completed a run.
    pub fn is_new(&self) -> bool {
        self.last_server_sync_timestamp.is_none()
    }

    /// Returns a copy without the schema, for the wire.
    pub fn without_schema(&self) -> ClientScopeInfo {
        ClientScopeInfo {
            schema: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, SchemaColumn, SchemaTable};

    #[test]
    fn new_client_scope() {
        let scope = ClientScopeInfo::new("default");
        assert!(scope.is_new());
        assert!(scope.schema.is_none());
        assert_ne!(scope.id, ClientScopeInfo::new("default").id);
    }

    #[test]
    fn without_schema_keeps_identity() {
        let schema = Schema::new().with_table(
            SchemaTable::new("Product", None)
                .with_column(SchemaColumn::new("Id", ColumnType::Guid))
                .with_primary_key("Id"),
        );
        let mut scope = ClientScopeInfo::new("default").with_schema(schema);
        scope.last_server_sync_timestamp = Some(12);

        let wire = scope.without_schema();
        assert!(wire.schema.is_none());
        assert_eq!(wire.id, scope.id);
        assert_eq!(wire.last_server_sync_timestamp, Some(12));
    }

    #[test]
    fn setup_from_names() {
        let setup = SyncSetup::with_tables(["Customer", "Order"]);
        assert!(setup.has_tables());
        assert_eq!(setup.tables[1].name, "Order");
    }
}
