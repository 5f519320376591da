//! Upload and download loops over batch parts.

use crate::batch::BatchInfo;
use crate::channel::RequestChannel;
use crate::converter::{self, RowConverter};
use crate::error::{SyncError, SyncResult};
use crate::http::HttpClient;
use crate::interceptor::{ProgressEvent, ProgressReporter};
use rowsync_protocol::{
    ClientScopeInfo, ConflictResolutionPolicy, ContainerSet, DatabaseChangesApplied,
    DatabaseChangesSelected, GetMoreChangesRequest, HttpStep, SendChangesRequest,
    SendChangesResponse, SyncContext, SyncSerializer, SyncStage,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const UPLOAD_PROGRESS: (f64, f64) = (0.2, 0.5);
const DOWNLOAD_PROGRESS: (f64, f64) = (0.55, 0.9);

fn advance(range: (f64, f64), done: u32, total: u32) -> f64 {
    if total == 0 {
        return range.0;
    }
    let fraction = (done as f64 / total as f64).min(1.0);
    range.0 + (range.1 - range.0) * fraction
}

/// Summary of a completed download loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct DownloadOutcome {
    /// Server high-watermark timestamp from the last part.
    pub remote_clients_timestamp: i64,
    /// Rows selected on the server.
    pub server_changes_selected: DatabaseChangesSelected,
    /// Client rows applied on the server, as acknowledged by the upload.
    pub client_changes_applied: DatabaseChangesApplied,
    /// Conflict policy the server applied.
    pub conflict_resolution_policy: ConflictResolutionPolicy,
}

impl DownloadOutcome {
    fn absorb(&mut self, response: &SendChangesResponse) {
        self.remote_clients_timestamp = response.remote_clients_timestamp;
        self.conflict_resolution_policy = response.conflict_resolution_policy;
        if let Some(selected) = &response.server_changes_selected {
            self.server_changes_selected = selected.clone();
        }
        if let Some(applied) = &response.client_changes_applied {
            self.client_changes_applied = applied.clone();
        }
    }
}

/// Drives the part-by-part exchange for one run.
pub(crate) struct BatchTransferEngine<'a, C: HttpClient, S: SyncSerializer> {
    channel: &'a RequestChannel<C, S>,
    converter: Option<&'a dyn RowConverter>,
    progress: ProgressReporter<'a>,
    cancel: &'a CancellationToken,
}

impl<'a, C: HttpClient, S: SyncSerializer> BatchTransferEngine<'a, C, S> {
    pub(crate) fn new(
        channel: &'a RequestChannel<C, S>,
        converter: Option<&'a dyn RowConverter>,
        progress: ProgressReporter<'a>,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            channel,
            converter,
            progress,
            cancel,
        }
    }

    /// Uploads `batch` and returns the last response received.
    ///
    /// An in-memory batch (or one without parts) goes out as a single last
    /// part. A persisted batch must end with its last part and is sent part
    /// by part in index order; the loop stops early when the server answers a
    /// non-last part with anything but `SendChangesInProgress`.
    pub(crate) async fn upload(
        &self,
        context: &mut SyncContext,
        scope: &ClientScopeInfo,
        batch: &BatchInfo,
        policy: ConflictResolutionPolicy,
        step: HttpStep,
    ) -> SyncResult<SendChangesResponse> {
        let scope = scope.without_schema();

        if batch.is_in_memory() || batch.part_count() == 0 {
            let rows = batch.in_memory_rows();
            let row_count = rows.row_count();
            let response = self
                .send_part(context, &scope, rows, 0, 1, true, policy, step)
                .await?;
            context.set_progress(UPLOAD_PROGRESS.1);
            self.uploaded(context, 0, 1, row_count, true);
            return Ok(response);
        }

        if !batch.is_complete() {
            return Err(SyncError::protocol("local batch has no part marked as last"));
        }

        let count = batch.part_count() as u32;
        let mut last = None;
        for part in batch.parts() {
            let rows = batch.load_part(part.index)?;
            let response = self
                .send_part(context, &scope, rows, part.index, count, part.is_last, policy, step)
                .await?;
            context.set_progress(advance(UPLOAD_PROGRESS, part.index + 1, count));
            self.uploaded(context, part.index, count, part.row_count, part.is_last);

            let interrupted =
                !part.is_last && response.server_step != HttpStep::SendChangesInProgress;
            if interrupted {
                warn!(
                    batch_index = part.index,
                    batch_count = count,
                    server_step = %response.server_step,
                    "server stopped the upload before the last part"
                );
                self.progress.report(
                    context,
                    ProgressEvent::UploadInterrupted {
                        batch_index: part.index,
                        server_step: response.server_step,
                    },
                );
            }
            last = Some(response);
            if interrupted {
                break;
            }
        }

        last.ok_or_else(|| SyncError::protocol("upload produced no response"))
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_part(
        &self,
        context: &mut SyncContext,
        scope: &ClientScopeInfo,
        mut rows: ContainerSet,
        batch_index: u32,
        batch_count: u32,
        is_last_batch: bool,
        policy: ConflictResolutionPolicy,
        step: HttpStep,
    ) -> SyncResult<SendChangesResponse> {
        converter::before_serialize(self.converter, &mut rows);
        context.stage = SyncStage::ChangesApplying;

        let request = SendChangesRequest {
            context: context.clone(),
            scope: scope.clone(),
            changes: (!rows.is_empty()).then_some(rows),
            is_last_batch,
            batch_index,
            batch_count,
            conflict_resolution_policy: policy,
        };
        debug!(step = %step, batch_index, batch_count, is_last_batch, "uploading part");

        let response: SendChangesResponse = self
            .channel
            .send(step, context, &request, &self.progress, self.cancel)
            .await?
            .ok_or_else(|| {
                SyncError::protocol(format!("no response to {} part {}", step, batch_index))
            })?;
        context.copy_from(&response.context);
        Ok(response)
    }

    fn uploaded(
        &self,
        context: &SyncContext,
        batch_index: u32,
        batch_count: u32,
        rows: usize,
        is_last: bool,
    ) {
        self.channel.record(|stats| stats.parts_uploaded += 1);
        self.progress.report(
            context,
            ProgressEvent::BatchUploaded {
                batch_index,
                batch_count,
                rows,
                is_last,
            },
        );
    }

    /// Materializes every server part into `batch`, starting from `first`.
    ///
    /// `first` is the response to the request that opened the download and
    /// its context must already be copied onto `context`.
    pub(crate) async fn download(
        &self,
        context: &mut SyncContext,
        first: SendChangesResponse,
        batch: &mut BatchInfo,
        stage: SyncStage,
    ) -> SyncResult<DownloadOutcome> {
        let mut outcome = DownloadOutcome::default();
        let mut response = first;

        loop {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            outcome.absorb(&response);

            let index = response.batch_index;
            let is_last = response.is_last_batch;
            let received = response.changes.take().unwrap_or_default();
            let mut rows = batch
                .schema()
                .ok_or_else(|| SyncError::protocol("download batch has no schema"))?
                .materialize(received)?;
            converter::after_deserialize(self.converter, &mut rows);
            let row_count = rows.row_count();
            batch.append_part(index, is_last, rows)?;

            self.channel.record(|stats| stats.parts_downloaded += 1);
            let total = if is_last { index + 1 } else { response.batch_count };
            context.set_progress(advance(DOWNLOAD_PROGRESS, index + 1, total));
            self.progress.report(
                context,
                ProgressEvent::BatchDownloaded {
                    batch_index: index,
                    rows: row_count,
                    is_last,
                },
            );
            debug!(batch_index = index, rows = row_count, is_last, "downloaded part");

            if is_last {
                return Ok(outcome);
            }

            context.stage = stage;
            let request = GetMoreChangesRequest {
                context: context.clone(),
                batch_index_requested: index + 1,
            };
            response = self
                .channel
                .send(
                    HttpStep::GetMoreChanges,
                    context,
                    &request,
                    &self.progress,
                    self.cancel,
                )
                .await?
                .ok_or_else(|| {
                    SyncError::protocol(format!("no response for batch part {}", index + 1))
                })?;
            context.copy_from(&response.context);
        }
    }
}
