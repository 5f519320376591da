//! Session orchestration: the top-level protocol operations.
//!
//! Every operation works on the caller's [`SyncContext`] for one run, emits
//! exactly one [`ProgressEvent::OperationStarting`] and then exactly one of
//! [`ProgressEvent::OperationCompleted`] or [`ProgressEvent::OperationFailed`].

use crate::batch::{BatchInfo, DirectoryPartStore};
use crate::channel::{RequestChannel, SessionStats};
use crate::config::ClientConfig;
use crate::converter::RowConverter;
use crate::error::{SyncError, SyncResult};
use crate::http::HttpClient;
use crate::interceptor::{
    Interceptors, Operation, ProgressEvent, ProgressInterceptor, ProgressReporter,
};
use crate::policy::SyncPolicy;
use crate::transfer::BatchTransferEngine;
use async_trait::async_trait;
use parking_lot::RwLock;
use rowsync_protocol::{
    CborSerializer, ClientScopeInfo, ConflictResolutionPolicy, DatabaseChangesApplied,
    DatabaseChangesSelected, EnsureSchemaResponse, EnsureScopesRequest, EnsureScopesResponse,
    EstimatedChangesRequest, EstimatedChangesResponse, HttpStep, Schema, SendChangesRequest,
    SendChangesResponse, ServerScopeInfo, SyncContext, SyncSerializer, SyncSetup, SyncStage,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of [`SyncOrchestrator::apply_then_get_changes`].
#[derive(Debug, Clone)]
pub struct ApplyChangesResult {
    /// Server high-watermark timestamp.
    pub remote_clients_timestamp: i64,
    /// Server changes, one part per downloaded batch.
    pub server_batch_info: BatchInfo,
    /// Conflict policy the server applied.
    pub conflict_resolution_policy: ConflictResolutionPolicy,
    /// Client rows applied on the server.
    pub client_changes_applied: DatabaseChangesApplied,
    /// Rows selected on the server.
    pub server_changes_selected: DatabaseChangesSelected,
}

/// Result of [`SyncOrchestrator::get_snapshot`].
#[derive(Debug, Clone)]
pub struct SnapshotResult {
    /// Server high-watermark timestamp.
    pub remote_clients_timestamp: i64,
    /// Snapshot parts, or `None` when the server has no snapshot.
    pub batch_info: Option<BatchInfo>,
    /// Rows selected on the server.
    pub server_changes_selected: DatabaseChangesSelected,
}

/// Result of [`SyncOrchestrator::get_changes`].
#[derive(Debug, Clone)]
pub struct ChangesResult {
    /// Server high-watermark timestamp.
    pub remote_clients_timestamp: i64,
    /// Server changes, or `None` when the server sent no change container.
    pub batch_info: Option<BatchInfo>,
    /// Rows selected on the server.
    pub server_changes_selected: DatabaseChangesSelected,
}

/// Result of [`SyncOrchestrator::get_estimated_changes_count`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EstimatedChanges {
    /// Server high-watermark timestamp.
    pub remote_clients_timestamp: i64,
    /// Estimated rows to select; zero when the server sent no summary.
    pub server_changes_selected: DatabaseChangesSelected,
}

/// The operations a sync run is built from.
///
/// `progress` is an optional per-call sink invoked after the orchestrator's
/// own interceptors.
#[async_trait]
pub trait SyncOrchestrator: Send + Sync {
    /// Loads or provisions the scope on the server.
    async fn ensure_scope(
        &self,
        context: &mut SyncContext,
        cancel: &CancellationToken,
        progress: Option<&dyn ProgressInterceptor>,
    ) -> SyncResult<ServerScopeInfo>;

    /// Reads and validates the negotiated schema.
    ///
    /// On failure neither `context` nor the stored setup is modified.
    async fn ensure_schema(
        &self,
        context: &mut SyncContext,
        cancel: &CancellationToken,
        progress: Option<&dyn ProgressInterceptor>,
    ) -> SyncResult<ServerScopeInfo>;

    /// Uploads `local_batch` (or nothing) and downloads the server's changes.
    async fn apply_then_get_changes(
        &self,
        context: &mut SyncContext,
        scope: &ClientScopeInfo,
        local_batch: Option<BatchInfo>,
        cancel: &CancellationToken,
        progress: Option<&dyn ProgressInterceptor>,
    ) -> SyncResult<ApplyChangesResult>;

    /// Downloads a pre-built snapshot, if the server has one.
    ///
    /// The schema is negotiated first when `schema` is `None`.
    async fn get_snapshot(
        &self,
        context: &mut SyncContext,
        schema: Option<&Schema>,
        cancel: &CancellationToken,
        progress: Option<&dyn ProgressInterceptor>,
    ) -> SyncResult<SnapshotResult>;

    /// Downloads the server's changes without uploading.
    async fn get_changes(
        &self,
        context: &mut SyncContext,
        scope: &ClientScopeInfo,
        cancel: &CancellationToken,
        progress: Option<&dyn ProgressInterceptor>,
    ) -> SyncResult<ChangesResult>;

    /// Asks the server how many rows a download would select.
    async fn get_estimated_changes_count(
        &self,
        context: &mut SyncContext,
        scope: &ClientScopeInfo,
        cancel: &CancellationToken,
        progress: Option<&dyn ProgressInterceptor>,
    ) -> SyncResult<EstimatedChanges>;

    /// Removes tracking metadata older than `timestamp`.
    async fn delete_metadatas(&self, timestamp: Option<i64>) -> SyncResult<()>;

    /// Returns true if the scope needs an upgrade.
    async fn needs_upgrade(&self) -> SyncResult<bool>;

    /// Upgrades the scope.
    async fn upgrade(&self) -> SyncResult<()>;
}

/// Orchestrator talking to a remote sync service over HTTP.
pub struct WebRemoteOrchestrator<C: HttpClient, S: SyncSerializer = CborSerializer> {
    config: ClientConfig,
    channel: RequestChannel<C, S>,
    setup: RwLock<Option<SyncSetup>>,
    interceptors: Interceptors,
    converter: Option<Arc<dyn RowConverter>>,
}

impl<C: HttpClient> WebRemoteOrchestrator<C, CborSerializer> {
    /// Creates an orchestrator speaking CBOR.
    pub fn new(config: ClientConfig, client: C) -> Self {
        Self::with_serializer(config, client, CborSerializer)
    }
}

#[cfg(feature = "reqwest")]
impl WebRemoteOrchestrator<crate::http::ReqwestClient, CborSerializer> {
    /// Creates an orchestrator with a `reqwest` client honoring the configured timeout.
    pub fn connect(config: ClientConfig) -> SyncResult<Self> {
        let client =
            crate::http::ReqwestClient::new(config.timeout).map_err(SyncError::transport_fatal)?;
        Ok(Self::new(config, client))
    }
}

impl<C: HttpClient, S: SyncSerializer> WebRemoteOrchestrator<C, S> {
    /// Creates an orchestrator with the given serializer.
    pub fn with_serializer(config: ClientConfig, client: C, serializer: S) -> Self {
        let channel = RequestChannel::new(client, serializer, config.service_uri.clone())
            .with_headers(config.custom_headers.clone())
            .with_batch_size(config.batch_size);
        Self {
            config,
            channel,
            setup: RwLock::new(None),
            interceptors: Interceptors::new(),
            converter: None,
        }
    }

    /// Replaces the retry policy.
    pub fn with_policy(mut self, policy: SyncPolicy) -> Self {
        self.channel = self.channel.with_policy(policy);
        self
    }

    /// Sets the row converter.
    pub fn with_converter(mut self, converter: Arc<dyn RowConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Appends an interceptor notified on every milestone.
    pub fn add_interceptor(&mut self, interceptor: Arc<dyn ProgressInterceptor>) {
        self.interceptors.add(interceptor);
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the request channel.
    pub fn channel(&self) -> &RequestChannel<C, S> {
        &self.channel
    }

    /// Returns the last setup received from the server.
    pub fn setup(&self) -> Option<SyncSetup> {
        self.setup.read().clone()
    }

    /// Returns the accumulated counters.
    pub fn stats(&self) -> SessionStats {
        self.channel.stats()
    }

    /// Creates a context for a new run, carrying the configured parameters.
    pub fn new_context(&self) -> SyncContext {
        SyncContext::new(self.config.scope_name.clone())
            .with_parameters(self.config.parameters.clone())
    }

    fn reporter<'a>(&'a self, sink: Option<&'a dyn ProgressInterceptor>) -> ProgressReporter<'a> {
        ProgressReporter::new(&self.interceptors, sink, &self.config.host_name)
    }

    fn engine<'a>(
        &'a self,
        progress: ProgressReporter<'a>,
        cancel: &'a CancellationToken,
    ) -> BatchTransferEngine<'a, C, S> {
        BatchTransferEngine::new(&self.channel, self.converter.as_deref(), progress, cancel)
    }

    fn started(
        &self,
        operation: Operation,
        context: &SyncContext,
        progress: &ProgressReporter<'_>,
    ) {
        info!(
            operation = %operation,
            scope = %context.scope_name,
            session = ?context.session_id,
            "sync operation starting"
        );
        progress.report(context, ProgressEvent::OperationStarting { operation });
    }

    fn finished<T>(
        &self,
        operation: Operation,
        context: &SyncContext,
        progress: &ProgressReporter<'_>,
        result: &SyncResult<T>,
    ) {
        match result {
            Ok(_) => {
                info!(
                    operation = %operation,
                    scope = %context.scope_name,
                    "sync operation completed"
                );
                progress.report(context, ProgressEvent::OperationCompleted { operation });
            }
            Err(error) => {
                warn!(operation = %operation, error = %error, "sync operation failed");
                progress.report(
                    context,
                    ProgressEvent::OperationFailed {
                        operation,
                        error: error.to_string(),
                    },
                );
            }
        }
    }

    /// Builds an empty download batch honoring the configured batch size.
    fn new_batch(&self, schema: &Schema) -> SyncResult<BatchInfo> {
        let batch = if self.config.is_in_memory() {
            BatchInfo::in_memory()
        } else {
            let root = self
                .config
                .batch_directory
                .clone()
                .unwrap_or_else(std::env::temp_dir);
            let directory = root.join(format!(
                "{}_{}",
                self.config.scope_name,
                Uuid::new_v4().simple()
            ));
            BatchInfo::persisted(Arc::new(DirectoryPartStore::create(directory)?))
        };
        Ok(batch.with_schema(schema.sanitized()))
    }

    async fn do_ensure_scope(
        &self,
        context: &mut SyncContext,
        progress: &ProgressReporter<'_>,
        cancel: &CancellationToken,
    ) -> SyncResult<ServerScopeInfo> {
        context.stage = SyncStage::ScopeLoading;
        let request = EnsureScopesRequest::new(context.clone());
        let response: EnsureScopesResponse = self
            .channel
            .send(HttpStep::EnsureScopes, context, &request, progress, cancel)
            .await?
            .ok_or_else(|| SyncError::protocol("no response to EnsureScopes"))?;
        let scope = response
            .server_scope_info
            .ok_or_else(|| SyncError::protocol("EnsureScopes response has no server scope"))?;

        *self.setup.write() = scope.setup.clone();
        context.copy_from(&response.context);
        Ok(scope)
    }

    async fn do_ensure_schema(
        &self,
        context: &mut SyncContext,
        progress: &ProgressReporter<'_>,
        cancel: &CancellationToken,
    ) -> SyncResult<ServerScopeInfo> {
        let mut working = context.clone();
        working.stage = SyncStage::SchemaReading;
        let request = EnsureScopesRequest::new(working.clone());
        let response: EnsureSchemaResponse = self
            .channel
            .send(HttpStep::EnsureSchema, &working, &request, progress, cancel)
            .await?
            .ok_or_else(|| SyncError::protocol("no response to EnsureSchema"))?;

        let mut scope = response
            .server_scope_info
            .ok_or_else(|| SyncError::protocol("EnsureSchema response has no server scope"))?;
        let schema = response
            .schema
            .or_else(|| scope.schema.take())
            .ok_or_else(|| SyncError::protocol("EnsureSchema response has no schema"))?;
        if !schema.has_tables() {
            return Err(SyncError::protocol("negotiated schema has no tables"));
        }
        schema.ensure_schema()?;

        scope.schema = Some(schema);
        *self.setup.write() = scope.setup.clone();
        context.copy_from(&response.context);
        Ok(scope)
    }

    /// Returns `known`, negotiating the schema with the server when absent.
    async fn resolve_schema(
        &self,
        context: &mut SyncContext,
        known: Option<&Schema>,
        progress: &ProgressReporter<'_>,
        cancel: &CancellationToken,
    ) -> SyncResult<Schema> {
        if let Some(schema) = known {
            return Ok(schema.clone());
        }
        self.do_ensure_schema(context, progress, cancel)
            .await?
            .schema
            .ok_or_else(|| SyncError::protocol("EnsureSchema response has no schema"))
    }

    async fn do_apply_then_get_changes(
        &self,
        context: &mut SyncContext,
        scope: &ClientScopeInfo,
        local_batch: Option<BatchInfo>,
        progress: ProgressReporter<'_>,
        cancel: &CancellationToken,
    ) -> SyncResult<ApplyChangesResult> {
        let schema = self
            .resolve_schema(context, scope.schema.as_ref(), &progress, cancel)
            .await?;
        let local_batch = local_batch.unwrap_or_else(BatchInfo::in_memory);
        let engine = self.engine(progress, cancel);

        let response = engine
            .upload(
                context,
                scope,
                &local_batch,
                self.config.conflict_resolution_policy,
                HttpStep::SendChanges,
            )
            .await?;

        context.stage = SyncStage::ChangesSelecting;
        let mut server_batch_info = self.new_batch(&schema)?;
        let outcome = engine
            .download(context, response, &mut server_batch_info, SyncStage::ChangesSelecting)
            .await?;

        context.stage = SyncStage::Completed;
        context.set_progress(1.0);
        Ok(ApplyChangesResult {
            remote_clients_timestamp: outcome.remote_clients_timestamp,
            server_batch_info,
            conflict_resolution_policy: outcome.conflict_resolution_policy,
            client_changes_applied: outcome.client_changes_applied,
            server_changes_selected: outcome.server_changes_selected,
        })
    }

    async fn do_get_snapshot(
        &self,
        context: &mut SyncContext,
        schema: Option<&Schema>,
        progress: ProgressReporter<'_>,
        cancel: &CancellationToken,
    ) -> SyncResult<SnapshotResult> {
        let schema = self.resolve_schema(context, schema, &progress, cancel).await?;

        context.stage = SyncStage::SnapshotApplying;
        let request =
            SendChangesRequest::probe(context.clone(), ClientScopeInfo::new(&context.scope_name));
        let response: SendChangesResponse = self
            .channel
            .send(HttpStep::GetSnapshot, context, &request, &progress, cancel)
            .await?
            .ok_or_else(|| SyncError::protocol("no response to GetSnapshot"))?;
        context.copy_from(&response.context);

        if response.changes.is_none() {
            info!(scope = %context.scope_name, "server has no snapshot");
            return Ok(SnapshotResult {
                remote_clients_timestamp: response.remote_clients_timestamp,
                batch_info: None,
                server_changes_selected: response.server_changes_selected.unwrap_or_default(),
            });
        }

        let mut batch = self.new_batch(&schema)?;
        let outcome = self
            .engine(progress, cancel)
            .download(context, response, &mut batch, SyncStage::SnapshotApplying)
            .await?;

        context.stage = SyncStage::Completed;
        context.set_progress(1.0);

        Ok(SnapshotResult {
            remote_clients_timestamp: outcome.remote_clients_timestamp,
            batch_info: Some(batch),
            server_changes_selected: outcome.server_changes_selected,
        })
    }

    async fn do_get_changes(
        &self,
        context: &mut SyncContext,
        scope: &ClientScopeInfo,
        progress: ProgressReporter<'_>,
        cancel: &CancellationToken,
    ) -> SyncResult<ChangesResult> {
        let schema = self
            .resolve_schema(context, scope.schema.as_ref(), &progress, cancel)
            .await?;

        context.stage = SyncStage::ChangesSelecting;
        let mut request = SendChangesRequest::probe(context.clone(), scope.without_schema());
        request.conflict_resolution_policy = self.config.conflict_resolution_policy;
        let response: SendChangesResponse = self
            .channel
            .send(HttpStep::GetChanges, context, &request, &progress, cancel)
            .await?
            .ok_or_else(|| SyncError::protocol("no response to GetChanges"))?;
        context.copy_from(&response.context);

        if response.changes.is_none() {
            return Ok(ChangesResult {
                remote_clients_timestamp: response.remote_clients_timestamp,
                batch_info: None,
                server_changes_selected: response.server_changes_selected.unwrap_or_default(),
            });
        }

        let mut batch = self.new_batch(&schema)?;
        let outcome = self
            .engine(progress, cancel)
            .download(context, response, &mut batch, SyncStage::ChangesSelecting)
            .await?;

        context.stage = SyncStage::Completed;
        context.set_progress(1.0);
        Ok(ChangesResult {
            remote_clients_timestamp: outcome.remote_clients_timestamp,
            batch_info: Some(batch),
            server_changes_selected: outcome.server_changes_selected,
        })
    }

    async fn do_get_estimated_changes_count(
        &self,
        context: &mut SyncContext,
        scope: &ClientScopeInfo,
        progress: &ProgressReporter<'_>,
        cancel: &CancellationToken,
    ) -> SyncResult<EstimatedChanges> {
        context.stage = SyncStage::ChangesSelecting;
        let request = EstimatedChangesRequest {
            context: context.clone(),
            scope: scope.without_schema(),
        };
        let response: EstimatedChangesResponse = self
            .channel
            .send(
                HttpStep::GetEstimatedChangesCount,
                context,
                &request,
                progress,
                cancel,
            )
            .await?
            .ok_or_else(|| SyncError::protocol("no response to GetEstimatedChangesCount"))?;
        context.copy_from(&response.context);

        Ok(EstimatedChanges {
            remote_clients_timestamp: response.remote_clients_timestamp,
            server_changes_selected: response.server_changes_selected.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl<C: HttpClient, S: SyncSerializer> SyncOrchestrator for WebRemoteOrchestrator<C, S> {
    async fn ensure_scope(
        &self,
        context: &mut SyncContext,
        cancel: &CancellationToken,
        progress: Option<&dyn ProgressInterceptor>,
    ) -> SyncResult<ServerScopeInfo> {
        let progress = self.reporter(progress);
        self.started(Operation::EnsureScope, context, &progress);
        let result = self.do_ensure_scope(context, &progress, cancel).await;
        self.finished(Operation::EnsureScope, context, &progress, &result);
        result
    }

    async fn ensure_schema(
        &self,
        context: &mut SyncContext,
        cancel: &CancellationToken,
        progress: Option<&dyn ProgressInterceptor>,
    ) -> SyncResult<ServerScopeInfo> {
        let progress = self.reporter(progress);
        self.started(Operation::EnsureSchema, context, &progress);
        let result = self.do_ensure_schema(context, &progress, cancel).await;
        self.finished(Operation::EnsureSchema, context, &progress, &result);
        result
    }

    async fn apply_then_get_changes(
        &self,
        context: &mut SyncContext,
        scope: &ClientScopeInfo,
        local_batch: Option<BatchInfo>,
        cancel: &CancellationToken,
        progress: Option<&dyn ProgressInterceptor>,
    ) -> SyncResult<ApplyChangesResult> {
        let progress = self.reporter(progress);
        self.started(Operation::ApplyThenGetChanges, context, &progress);
        let result = self
            .do_apply_then_get_changes(context, scope, local_batch, progress, cancel)
            .await;
        self.finished(Operation::ApplyThenGetChanges, context, &progress, &result);
        result
    }

    async fn get_snapshot(
        &self,
        context: &mut SyncContext,
        schema: Option<&Schema>,
        cancel: &CancellationToken,
        progress: Option<&dyn ProgressInterceptor>,
    ) -> SyncResult<SnapshotResult> {
        let progress = self.reporter(progress);
        self.started(Operation::GetSnapshot, context, &progress);
        let result = self.do_get_snapshot(context, schema, progress, cancel).await;
        self.finished(Operation::GetSnapshot, context, &progress, &result);
        result
    }

    async fn get_changes(
        &self,
        context: &mut SyncContext,
        scope: &ClientScopeInfo,
        cancel: &CancellationToken,
        progress: Option<&dyn ProgressInterceptor>,
    ) -> SyncResult<ChangesResult> {
        let progress = self.reporter(progress);
        self.started(Operation::GetChanges, context, &progress);
        let result = self.do_get_changes(context, scope, progress, cancel).await;
        self.finished(Operation::GetChanges, context, &progress, &result);
        result
    }

    async fn get_estimated_changes_count(
        &self,
        context: &mut SyncContext,
        scope: &ClientScopeInfo,
        cancel: &CancellationToken,
        progress: Option<&dyn ProgressInterceptor>,
    ) -> SyncResult<EstimatedChanges> {
        let progress = self.reporter(progress);
        self.started(Operation::GetEstimatedChangesCount, context, &progress);
        let result = self
            .do_get_estimated_changes_count(context, scope, &progress, cancel)
            .await;
        self.finished(Operation::GetEstimatedChangesCount, context, &progress, &result);
        result
    }

    async fn delete_metadatas(&self, _timestamp: Option<i64>) -> SyncResult<()> {
        Err(SyncError::Unsupported("delete_metadatas"))
    }

    async fn needs_upgrade(&self) -> SyncResult<bool> {
        Err(SyncError::Unsupported("needs_upgrade"))
    }

    async fn upgrade(&self) -> SyncResult<()> {
        Err(SyncError::Unsupported("upgrade"))
    }
}
