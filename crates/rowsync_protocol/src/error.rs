//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Result type for schema checks.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while serializing or deserializing envelopes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }
}

/// Structural problems found in a schema or in a payload checked against one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The schema has no tables.
    #[error("schema has no tables")]
    Empty,

    /// Two tables share the same name.
    #[error("duplicate table {table}")]
    DuplicateTable {
        /// Qualified table name.
        table: String,
    },

    /// Two columns of one table share the same name.
    #[error("duplicate column {column} in table {table}")]
    DuplicateColumn {
        /// Qualified table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A table declares no primary key.
    #[error("table {table} has no primary key")]
    MissingPrimaryKey {
        /// Qualified table name.
        table: String,
    },

    /// A primary key or relation refers to a column the table does not have.
    #[error("column {column} not found in table {table}")]
    UnknownColumn {
        /// Qualified table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A relation or payload refers to a table that is not in the schema.
    #[error("table {table} is not part of the schema")]
    UnknownTable {
        /// Qualified table name.
        table: String,
    },

    /// A relation has different numbers of parent and child columns.
    #[error("relation {relation} has mismatched key columns")]
    RelationArity {
        /// Relation name.
        relation: String,
    },

    /// A row does not carry one value per schema column.
    #[error("row in table {table} has {actual} values, expected {expected}")]
    RowArity {
        /// Qualified table name.
        table: String,
        /// Number of columns in the schema table.
        expected: usize,
        /// Number of values in the row.
        actual: usize,
    },
}
