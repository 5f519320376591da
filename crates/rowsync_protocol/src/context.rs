//! Per-run synchronization context.

use crate::rows::FieldValue;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The stage a run is in.
///
/// Recorded on the context before each network phase. It is informative only
/// and never gates which operation may run next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncStage {
    /// Nothing started yet.
    #[default]
    Idle,
    /// Loading the scope from the server.
    ScopeLoading,
    /// Reading the negotiated schema.
    SchemaReading,
    /// Uploading local changes.
    ChangesApplying,
    /// Downloading remote changes.
    ChangesSelecting,
    /// Downloading a server snapshot.
    SnapshotApplying,
    /// The run finished.
    Completed,
}

impl SyncStage {
    /// Returns true if the stage involves network traffic.
    pub fn is_active(&self) -> bool {
        !matches!(self, SyncStage::Idle | SyncStage::Completed)
    }
}

/// A named filter parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncParameter {
    /// Parameter name.
    pub name: String,
    /// Parameter value.
    pub value: FieldValue,
}

/// Scope-level parameters sent with every request of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncParameters(Vec<SyncParameter>);

impl SyncParameters {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter, replacing an existing value with the same name.
    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        match self.0.iter_mut().find(|p| p.name == name) {
            Some(existing) => existing.value = value,
            None => self.0.push(SyncParameter { name, value }),
        }
    }

    /// Adds a parameter and returns self.
    pub fn with(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.set(name, value);
        self
    }

    /// Gets a parameter value by name.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    /// Iterates parameters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SyncParameter> {
        self.0.iter()
    }

    /// Returns the number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// State of one synchronization run.
///
/// The server holds the authoritative copy; the client overwrites its copy
/// from every response with [`SyncContext::copy_from`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncContext {
    /// Server-assigned session id, absent until the first response.
    pub session_id: Option<String>,
    /// Client identifier.
    pub client_id: Option<Uuid>,
    /// Scope name.
    pub scope_name: String,
    /// Current stage.
    pub stage: SyncStage,
    /// Scope parameters.
    pub parameters: SyncParameters,
    /// Progress fraction in `[0, 1]`.
    pub progress: f64,
}

impl SyncContext {
    /// Creates a context for a new run on the given scope.
    pub fn new(scope_name: impl Into<String>) -> Self {
        Self {
            scope_name: scope_name.into(),
            ..Default::default()
        }
    }

    /// Sets the client id and returns self.
    pub fn with_client_id(mut self, client_id: Uuid) -> Self {
        self.client_id = Some(client_id);
        self
    }

    /// Sets the parameters and returns self.
    pub fn with_parameters(mut self, parameters: SyncParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the progress fraction, clamped to `[0, 1]`.
    pub fn set_progress(&mut self, progress: f64) {
        self.progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };
    }

    /// Overwrites every field from the server-returned context.
    pub fn copy_from(&mut self, server: &SyncContext) {
        self.session_id = server.session_id.clone();
        self.client_id = server.client_id;
        self.scope_name = server.scope_name.clone();
        self.stage = server.stage;
        self.parameters = server.parameters.clone();
        self.set_progress(server.progress);
    }
}
