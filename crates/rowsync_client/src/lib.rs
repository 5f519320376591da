//! # rowsync client
//!
//! Client side of the rowsync batched change-synchronization protocol.
//!
//! This crate provides:
//! - `WebRemoteOrchestrator`, driving the protocol steps of a sync run
//! - Bidirectional batch pagination with in-memory or persisted parts
//! - Session affinity and a pluggable retry policy per request
//! - Progress interceptors and per-row converters
//! - HTTP transport abstraction (reqwest and in-process loopback)
//!
//! ## Architecture
//!
//! A run is a sequence of orchestrator operations on one `SyncContext`:
//! 1. Ensure the scope, then the schema
//! 2. Upload local changes part by part
//! 3. Download server changes part by part
//!
//! Every network attempt goes through the `RequestChannel`, wrapped by the
//! `SyncPolicy`.
//!
//! ## Key Invariants
//!
//! - The session id is absent before the first response and pinned afterwards
//! - Batch parts are contiguous from index 0 with exactly one last part
//! - A lost session is never retried
//! - Interceptors are invoked in order and never concurrently within a run

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod channel;
mod config;
mod converter;
mod error;
mod http;
mod interceptor;
mod orchestrator;
mod policy;
mod transfer;

pub use batch::{
    BatchInfo, BatchPart, BatchPartStore, BatchStorage, DirectoryPartStore, MemoryPartStore,
};
pub use channel::{
    RequestChannel, SessionStats, BATCH_SIZE_HEADER, PROTOCOL_VERSION, SCOPE_NAME_HEADER,
    SESSION_ID_HEADER, STEP_HEADER, VERSION_HEADER,
};
pub use config::ClientConfig;
pub use converter::RowConverter;
pub use error::{SyncError, SyncErrorKind, SyncResult};
#[cfg(feature = "reqwest")]
pub use http::ReqwestClient;
pub use http::{HttpClient, HttpRequest, HttpResponse, LoopbackClient, LoopbackServer};
pub use interceptor::{Interceptors, Operation, ProgressArgs, ProgressEvent, ProgressInterceptor};
pub use orchestrator::{
    ApplyChangesResult, ChangesResult, EstimatedChanges, SnapshotResult, SyncOrchestrator,
    WebRemoteOrchestrator,
};
pub use policy::{
    is_transient, linear_backoff, BackoffFn, RetryPredicate, SyncPolicy, BACKOFF_STEP,
    DEFAULT_MAX_ATTEMPTS,
};

pub use tokio_util::sync::CancellationToken;
