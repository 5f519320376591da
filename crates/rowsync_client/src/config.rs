//! Configuration for the sync client.

use rowsync_protocol::{ConflictResolutionPolicy, FieldValue, SyncParameters};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a remote orchestrator.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Endpoint receiving every protocol POST.
    pub service_uri: String,
    /// Scope name.
    pub scope_name: String,
    /// Batch size hint in rows; 0 keeps downloaded batches in memory.
    pub batch_size: usize,
    /// Directory for persisted batch parts; a temp dir is used when unset.
    pub batch_directory: Option<PathBuf>,
    /// Custom headers sent on every request.
    pub custom_headers: Vec<(String, String)>,
    /// Scope parameters sent on every request.
    pub parameters: SyncParameters,
    /// Preferred conflict policy sent with uploads.
    pub conflict_resolution_policy: ConflictResolutionPolicy,
    /// Host identifier reported in progress events.
    pub host_name: String,
    /// Request timeout applied by the HTTP client.
    pub timeout: Duration,
}

impl ClientConfig {
    /// Creates a new configuration.
    pub fn new(service_uri: impl Into<String>, scope_name: impl Into<String>) -> Self {
        Self {
            service_uri: service_uri.into(),
            scope_name: scope_name.into(),
            batch_size: 0,
            batch_directory: None,
            custom_headers: Vec::new(),
            parameters: SyncParameters::new(),
            conflict_resolution_policy: ConflictResolutionPolicy::ServerWins,
            host_name: "client".into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the batch size hint.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the directory used for persisted batch parts.
    pub fn with_batch_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.batch_directory = Some(directory.into());
        self
    }

    /// Adds a custom header, replacing any previous value for the same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.custom_headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.custom_headers.push((name, value.into()));
        self
    }

    /// Adds a scope parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.parameters.set(name, value);
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_resolution_policy(mut self, policy: ConflictResolutionPolicy) -> Self {
        self.conflict_resolution_policy = policy;
        self
    }

    /// Sets the host identifier.
    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = host_name.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns true if downloaded batches stay in memory.
    pub fn is_in_memory(&self) -> bool {
        self.batch_size == 0
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("", "default")
    }
}
