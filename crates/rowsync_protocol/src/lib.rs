//! # rowsync protocol
//!
//! Protocol types and codecs for the rowsync change-exchange protocol.
//!
//! This crate provides:
//! - `SyncContext` and the per-run `SyncStage`
//! - Scope records (`ServerScopeInfo`, `ClientScopeInfo`, `SyncSetup`)
//! - `Schema` with its structural-consistency check and sanitization
//! - Row containers (`ContainerSet`) exchanged in batch parts
//! - Message envelopes for each `HttpStep`
//! - Change statistics and the recorded conflict policy
//! - The `SyncSerializer` capability with CBOR and JSON implementations
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod conflict;
mod context;
mod error;
mod messages;
mod rows;
mod schema;
mod scope;
mod stats;

pub use codec::{CborSerializer, JsonSerializer, SyncSerializer};
pub use conflict::ConflictResolutionPolicy;
pub use context::{SyncContext, SyncParameter, SyncParameters, SyncStage};
pub use error::{CodecError, CodecResult, SchemaError, SchemaResult};
pub use messages::{
    EnsureSchemaResponse, EnsureScopesRequest, EnsureScopesResponse, ErrorResponse,
    EstimatedChangesRequest, EstimatedChangesResponse, GetMoreChangesRequest, HttpStep,
    RemoteErrorKind, SendChangesRequest, SendChangesResponse,
};
pub use rows::{ContainerSet, ContainerTable, FieldValue, RowState, SyncRow};
pub use schema::{ColumnType, Schema, SchemaColumn, SchemaRelation, SchemaTable};
pub use scope::{ClientScopeInfo, ServerScopeInfo, SetupFilter, SetupTable, SyncSetup};
pub use stats::{
    DatabaseChangesApplied, DatabaseChangesSelected, TableChangesApplied, TableChangesSelected,
};
