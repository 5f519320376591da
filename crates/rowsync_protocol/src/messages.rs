//! Protocol messages for change exchange.

use crate::conflict::ConflictResolutionPolicy;
use crate::context::SyncContext;
use crate::rows::ContainerSet;
use crate::schema::Schema;
use crate::scope::{ClientScopeInfo, ServerScopeInfo};
use crate::stats::{DatabaseChangesApplied, DatabaseChangesSelected};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A protocol step, carried on every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HttpStep {
    /// No step.
    #[default]
    None,
    /// Load or provision the scope.
    EnsureScopes,
    /// Read the negotiated schema.
    EnsureSchema,
    /// Upload a batch part of local changes.
    SendChanges,
    /// Server marker: keep sending upload parts.
    SendChangesInProgress,
    /// Download-only run.
    GetChanges,
    /// Request the next download part.
    GetMoreChanges,
    /// Count pending server changes.
    GetEstimatedChangesCount,
    /// Download a pre-built snapshot.
    GetSnapshot,
}

impl HttpStep {
    /// Returns the step code.
    pub fn code(&self) -> u8 {
        match self {
            HttpStep::None => 0,
            HttpStep::EnsureScopes => 1,
            HttpStep::EnsureSchema => 2,
            HttpStep::SendChanges => 3,
            HttpStep::SendChangesInProgress => 4,
            HttpStep::GetChanges => 5,
            HttpStep::GetMoreChanges => 6,
            HttpStep::GetEstimatedChangesCount => 7,
            HttpStep::GetSnapshot => 8,
        }
    }

    /// Returns the stable wire name sent in the step header.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpStep::None => "None",
            HttpStep::EnsureScopes => "EnsureScopes",
            HttpStep::EnsureSchema => "EnsureSchema",
            HttpStep::SendChanges => "SendChanges",
            HttpStep::SendChangesInProgress => "SendChangesInProgress",
            HttpStep::GetChanges => "GetChanges",
            HttpStep::GetMoreChanges => "GetMoreChanges",
            HttpStep::GetEstimatedChangesCount => "GetEstimatedChangesCount",
            HttpStep::GetSnapshot => "GetSnapshot",
        }
    }

    /// Parses a wire name.
    pub fn parse(name: &str) -> Option<Self> {
        [
            HttpStep::None,
            HttpStep::EnsureScopes,
            HttpStep::EnsureSchema,
            HttpStep::SendChanges,
            HttpStep::SendChangesInProgress,
            HttpStep::GetChanges,
            HttpStep::GetMoreChanges,
            HttpStep::GetEstimatedChangesCount,
            HttpStep::GetSnapshot,
        ]
        .into_iter()
        .find(|step| step.as_str() == name)
    }
}

impl fmt::Display for HttpStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request for `EnsureScopes` and `EnsureSchema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsureScopesRequest {
    /// Run context.
    pub context: SyncContext,
}

impl EnsureScopesRequest {
    /// Creates a new request.
    pub fn new(context: SyncContext) -> Self {
        Self { context }
    }
}

/// Response to `EnsureScopes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsureScopesResponse {
    /// Server context.
    pub context: SyncContext,
    /// Server scope.
    pub server_scope_info: Option<ServerScopeInfo>,
}

/// Response to `EnsureSchema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsureSchemaResponse {
    /// Server context.
    pub context: SyncContext,
    /// Server scope.
    pub server_scope_info: Option<ServerScopeInfo>,
    /// Negotiated schema.
    pub schema: Option<Schema>,
}

/// Upload envelope, also used for `GetChanges` and `GetSnapshot` probes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendChangesRequest {
    /// Run context.
    pub context: SyncContext,
    /// Client scope, sent without its schema.
    pub scope: ClientScopeInfo,
    /// Rows of this part, if any.
    pub changes: Option<ContainerSet>,
    /// Whether this is the last part.
    pub is_last_batch: bool,
    /// Index of this part.
    pub batch_index: u32,
    /// Total number of parts.
    pub batch_count: u32,
    /// Client's conflict policy.
    pub conflict_resolution_policy: ConflictResolutionPolicy,
}

impl SendChangesRequest {
    /// Creates a single-part request with no rows.
    pub fn probe(context: SyncContext, scope: ClientScopeInfo) -> Self {
        Self {
            context,
            scope,
            changes: None,
            is_last_batch: true,
            batch_index: 0,
            batch_count: 0,
            conflict_resolution_policy: ConflictResolutionPolicy::default(),
        }
    }
}

/// Response carrying one server part (or acknowledging one client part).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendChangesResponse {
    /// Server context.
    pub context: SyncContext,
    /// Rows of this part, if any.
    pub changes: Option<ContainerSet>,
    /// Whether this is the last part.
    pub is_last_batch: bool,
    /// Index of this part.
    pub batch_index: u32,
    /// Total number of parts.
    pub batch_count: u32,
    /// Server high-watermark timestamp.
    pub remote_clients_timestamp: i64,
    /// Rows selected on the server.
    pub server_changes_selected: Option<DatabaseChangesSelected>,
    /// Client rows applied on the server.
    pub client_changes_applied: Option<DatabaseChangesApplied>,
    /// Policy the server applied.
    pub conflict_resolution_policy: ConflictResolutionPolicy,
    /// Next step the server expects.
    pub server_step: HttpStep,
}

impl SendChangesResponse {
    /// Creates an empty response for the given server step.
    pub fn new(context: SyncContext, server_step: HttpStep) -> Self {
        Self {
            context,
            changes: None,
            is_last_batch: false,
            batch_index: 0,
            batch_count: 0,
            remote_clients_timestamp: 0,
            server_changes_selected: None,
            client_changes_applied: None,
            conflict_resolution_policy: ConflictResolutionPolicy::default(),
            server_step,
        }
    }
}

/// Request for the next download part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetMoreChangesRequest {
    /// Run context.
    pub context: SyncContext,
    /// Index of the requested part.
    pub batch_index_requested: u32,
}

/// Request for `GetEstimatedChangesCount`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatedChangesRequest {
    /// Run context.
    pub context: SyncContext,
    /// Client scope, sent without its schema.
    pub scope: ClientScopeInfo,
}

/// Response to `GetEstimatedChangesCount`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatedChangesResponse {
    /// Server context.
    pub context: SyncContext,
    /// Server high-watermark timestamp.
    pub remote_clients_timestamp: i64,
    /// Estimated rows to select.
    pub server_changes_selected: Option<DatabaseChangesSelected>,
}

/// Kind of error reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    /// The server no longer knows the session id.
    SessionLost,
    /// The request was malformed.
    BadRequest,
    /// Any other server failure.
    Server,
}

/// Error body returned with a non-success HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error kind.
    pub kind: RemoteErrorKind,
    /// Error message.
    pub message: String,
}

impl ErrorResponse {
    /// Creates a session-lost error.
    pub fn session_lost(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::SessionLost,
            message: message.into(),
        }
    }

    /// Creates a generic server error.
    pub fn server(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Server,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_wire_names() {
        for step in [
            HttpStep::EnsureScopes,
            HttpStep::EnsureSchema,
            HttpStep::SendChanges,
            HttpStep::SendChangesInProgress,
            HttpStep::GetChanges,
            HttpStep::GetMoreChanges,
            HttpStep::GetEstimatedChangesCount,
            HttpStep::GetSnapshot,
        ] {
            assert_eq!(HttpStep::parse(step.as_str()), Some(step));
        }
        assert_eq!(HttpStep::parse("Handshake"), None);
        assert_eq!(HttpStep::GetMoreChanges.to_string(), "GetMoreChanges");
    }

    #[test]
    fn step_codes_are_distinct() {
        let codes: std::collections::HashSet<u8> = [
            HttpStep::None,
            HttpStep::EnsureScopes,
            HttpStep::EnsureSchema,
            HttpStep::SendChanges,
            HttpStep::SendChangesInProgress,
            HttpStep::GetChanges,
            HttpStep::GetMoreChanges,
            HttpStep::GetEstimatedChangesCount,
            HttpStep::GetSnapshot,
        ]
        .iter()
        .map(HttpStep::code)
        .collect();
        assert_eq!(codes.len(), 9);
    }

    #[test]
    fn probe_is_single_last_part() {
        let request = SendChangesRequest::probe(
            SyncContext::new("default"),
            ClientScopeInfo::new("default"),
        );
        assert!(request.is_last_batch);
        assert_eq!(request.batch_index, 0);
        assert!(request.changes.is_none());
    }

    #[test]
    fn error_response_constructors() {
        assert_eq!(
            ErrorResponse::session_lost("gone").kind,
            RemoteErrorKind::SessionLost
        );
        assert_eq!(ErrorResponse::server("boom").kind, RemoteErrorKind::Server);
    }
}
