//! Progress notifications.
//!
//! Interceptors are invoked synchronously, in request order, and never
//! concurrently for one run. They observe immutable snapshots and cannot
//! change protocol state.

use rowsync_protocol::{HttpStep, SyncContext};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Top-level orchestrator operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Scope negotiation.
    EnsureScope,
    /// Schema negotiation.
    EnsureSchema,
    /// Upload then download.
    ApplyThenGetChanges,
    /// Download only.
    GetChanges,
    /// Count pending server changes.
    GetEstimatedChangesCount,
    /// Snapshot download.
    GetSnapshot,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A protocol milestone.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// An operation is about to start.
    OperationStarting {
        /// Operation.
        operation: Operation,
    },
    /// An operation finished successfully.
    OperationCompleted {
        /// Operation.
        operation: Operation,
    },
    /// An operation ended with an error.
    OperationFailed {
        /// Operation.
        operation: Operation,
        /// Error that ended the operation.
        error: String,
    },
    /// A request is about to be sent.
    RequestSending {
        /// Protocol step.
        step: HttpStep,
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Serialized body size.
        bytes: usize,
    },
    /// A response body was received.
    ResponseReceived {
        /// Protocol step.
        step: HttpStep,
        /// Response body size.
        bytes: usize,
    },
    /// An upload part was acknowledged by the server.
    BatchUploaded {
        /// Part index.
        batch_index: u32,
        /// Total parts.
        batch_count: u32,
        /// Rows in the part.
        rows: usize,
        /// Whether the part was the last.
        is_last: bool,
    },
    /// A download part was materialized locally.
    BatchDownloaded {
        /// Part index.
        batch_index: u32,
        /// Rows in the part.
        rows: usize,
        /// Whether the part was the last.
        is_last: bool,
    },
    /// A failed attempt will be retried after `delay`.
    RetryScheduled {
        /// Protocol step.
        step: HttpStep,
        /// Number of the failed attempt.
        attempt: u32,
        /// Delay before the next attempt.
        delay: Duration,
        /// Error of the failed attempt.
        error: String,
    },
    /// The server stopped the upload before the last part.
    UploadInterrupted {
        /// Index of the last part sent.
        batch_index: u32,
        /// Step marker returned by the server.
        server_step: HttpStep,
    },
}

/// Payload passed to interceptors.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressArgs {
    /// Snapshot of the run context.
    pub context: SyncContext,
    /// Human readable host identifier.
    pub host: String,
    /// The milestone.
    pub event: ProgressEvent,
}

/// A progress notification sink.
pub trait ProgressInterceptor: Send + Sync {
    /// Receives one milestone.
    fn notify(&self, args: &ProgressArgs);
}

impl<F> ProgressInterceptor for F
where
    F: Fn(&ProgressArgs) + Send + Sync,
{
    fn notify(&self, args: &ProgressArgs) {
        self(args)
    }
}

/// Ordered list of interceptors.
#[derive(Clone, Default)]
pub struct Interceptors {
    sinks: Vec<Arc<dyn ProgressInterceptor>>,
}

impl Interceptors {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an interceptor.
    pub fn add(&mut self, interceptor: Arc<dyn ProgressInterceptor>) {
        self.sinks.push(interceptor);
    }

    /// Returns the number of interceptors.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns true if there are no interceptors.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Notifies every interceptor in insertion order.
    pub fn notify(&self, args: &ProgressArgs) {
        for sink in &self.sinks {
            sink.notify(args);
        }
    }
}

impl fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptors")
            .field("len", &self.sinks.len())
            .finish()
    }
}

/// Routes events of one call to the orchestrator interceptors, then to the
/// per-call sink.
#[derive(Clone, Copy)]
pub(crate) struct ProgressReporter<'a> {
    interceptors: &'a Interceptors,
    sink: Option<&'a dyn ProgressInterceptor>,
    host: &'a str,
}

impl<'a> ProgressReporter<'a> {
    pub(crate) fn new(
        interceptors: &'a Interceptors,
        sink: Option<&'a dyn ProgressInterceptor>,
        host: &'a str,
    ) -> Self {
        Self {
            interceptors,
            sink,
            host,
        }
    }

    pub(crate) fn report(&self, context: &SyncContext, event: ProgressEvent) {
        if self.interceptors.is_empty() && self.sink.is_none() {
            return;
        }
        let args = ProgressArgs {
            context: context.clone(),
            host: self.host.to_string(),
            event,
        };
        self.interceptors.notify(&args);
        if let Some(sink) = self.sink {
            sink.notify(&args);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn interceptors_run_in_order_before_sink() {
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut interceptors = Interceptors::new();
        for name in ["first", "second"] {
            let log = Arc::clone(&log);
            interceptors.add(Arc::new(move |_: &ProgressArgs| log.lock().push(name)));
        }
        let sink_log = Arc::clone(&log);
        let sink = move |args: &ProgressArgs| {
            assert_eq!(args.host, "laptop");
            sink_log.lock().push("sink");
        };

        let reporter = ProgressReporter::new(&interceptors, Some(&sink), "laptop");
        reporter.report(
            &SyncContext::new("default"),
            ProgressEvent::OperationStarting {
                operation: Operation::EnsureScope,
            },
        );

        assert_eq!(*log.lock(), vec!["first", "second", "sink"]);
        assert_eq!(interceptors.len(), 2);
    }

    #[test]
    fn payload_is_a_snapshot() {
        let seen = Arc::new(Mutex::new(None));
        let mut interceptors = Interceptors::new();
        let captured = Arc::clone(&seen);
        interceptors.add(Arc::new(move |args: &ProgressArgs| {
            *captured.lock() = Some(args.context.progress)
        }));

        let mut context = SyncContext::new("default");
        context.set_progress(0.25);
        ProgressReporter::new(&interceptors, None, "host").report(
            &context,
            ProgressEvent::ResponseReceived {
                step: HttpStep::EnsureScopes,
                bytes: 10,
            },
        );
        context.set_progress(0.75);

        assert_eq!(*seen.lock(), Some(0.25));
    }
}
