//! Request channel: one protocol step, one round trip.
//!
//! The channel serializes an envelope once and then sends it through the
//! retry policy. Every attempt carries the session id the server assigned to
//! the run so that retries and follow-up parts reach the same session.

use crate::error::{SyncError, SyncResult};
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::interceptor::{ProgressEvent, ProgressReporter};
use crate::policy::SyncPolicy;
use parking_lot::RwLock;
use rowsync_protocol::{ErrorResponse, HttpStep, RemoteErrorKind, SyncContext, SyncSerializer};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Header carrying the step wire name.
pub const STEP_HEADER: &str = "rowsync-step";
/// Header carrying the scope name.
pub const SCOPE_NAME_HEADER: &str = "rowsync-scope-name";
/// Header carrying the server-assigned session id.
pub const SESSION_ID_HEADER: &str = "rowsync-session-id";
/// Header carrying the batch size hint.
pub const BATCH_SIZE_HEADER: &str = "rowsync-batch-size";
/// Header carrying the protocol version.
pub const VERSION_HEADER: &str = "rowsync-version";
/// Protocol version sent on every request.
pub const PROTOCOL_VERSION: &str = "1";

/// Counters accumulated by one orchestrator across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Request attempts sent.
    pub requests_sent: u64,
    /// Retries scheduled.
    pub retries: u64,
    /// Request bytes sent.
    pub bytes_sent: u64,
    /// Response bytes received.
    pub bytes_received: u64,
    /// Upload parts acknowledged.
    pub parts_uploaded: u64,
    /// Download parts materialized.
    pub parts_downloaded: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Sends protocol envelopes to the service endpoint.
pub struct RequestChannel<C: HttpClient, S: SyncSerializer> {
    client: C,
    serializer: S,
    service_uri: String,
    custom_headers: Vec<(String, String)>,
    batch_size: usize,
    policy: SyncPolicy,
    stats: RwLock<SessionStats>,
}

impl<C: HttpClient, S: SyncSerializer> RequestChannel<C, S> {
    /// Creates a channel with the default retry policy.
    pub fn new(client: C, serializer: S, service_uri: impl Into<String>) -> Self {
        Self {
            client,
            serializer,
            service_uri: service_uri.into(),
            custom_headers: Vec::new(),
            batch_size: 0,
            policy: SyncPolicy::default(),
            stats: RwLock::new(SessionStats::default()),
        }
    }

    /// Sets the headers added to every request.
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.custom_headers = headers;
        self
    }

    /// Sets the batch size hint.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the retry policy.
    pub fn with_policy(mut self, policy: SyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the retry policy.
    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Returns the HTTP client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the serializer.
    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> SessionStats {
        self.stats.read().clone()
    }

    pub(crate) fn record(&self, update: impl FnOnce(&mut SessionStats)) {
        update(&mut self.stats.write());
    }

    /// Builds the headers of one attempt.
    pub fn headers(&self, step: HttpStep, context: &SyncContext) -> Vec<(String, String)> {
        let mut headers = vec![
            (STEP_HEADER.to_string(), step.as_str().to_string()),
            (SCOPE_NAME_HEADER.to_string(), context.scope_name.clone()),
        ];
        if let Some(session_id) = &context.session_id {
            headers.push((SESSION_ID_HEADER.to_string(), session_id.clone()));
        }
        headers.push((BATCH_SIZE_HEADER.to_string(), self.batch_size.to_string()));
        headers.push((VERSION_HEADER.to_string(), PROTOCOL_VERSION.to_string()));
        headers.push((
            "content-type".to_string(),
            self.serializer.content_type().to_string(),
        ));
        headers.extend(self.custom_headers.iter().cloned());
        headers
    }

    /// Sends `message` for `step` and returns the decoded response.
    ///
    /// A successful response with an empty body or a serialized null yields
    /// `Ok(None)`; whether that is acceptable is up to the caller.
    pub(crate) async fn send<Req, Res>(
        &self,
        step: HttpStep,
        context: &SyncContext,
        message: &Req,
        progress: &ProgressReporter<'_>,
        cancel: &CancellationToken,
    ) -> SyncResult<Option<Res>>
    where
        Req: Serialize + Sync,
        Res: DeserializeOwned + Send,
    {
        let body = self.serializer.serialize(message)?;
        let headers = self.headers(step, context);

        let result = self
            .policy
            .execute(
                cancel,
                |attempt| {
                    let request = HttpRequest {
                        url: self.service_uri.clone(),
                        headers: headers.clone(),
                        body: body.clone(),
                    };
                    self.attempt(step, context, request, attempt, progress)
                },
                |error, attempt, delay| {
                    warn!(
                        step = %step,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "request failed, retrying"
                    );
                    self.record(|stats| stats.retries += 1);
                    progress.report(
                        context,
                        ProgressEvent::RetryScheduled {
                            step,
                            attempt,
                            delay,
                            error: error.to_string(),
                        },
                    );
                },
            )
            .await;

        if let Err(error) = &result {
            self.record(|stats| stats.last_error = Some(error.to_string()));
        }
        result
    }

    async fn attempt<Res: DeserializeOwned>(
        &self,
        step: HttpStep,
        context: &SyncContext,
        request: HttpRequest,
        attempt: u32,
        progress: &ProgressReporter<'_>,
    ) -> SyncResult<Option<Res>> {
        let bytes = request.body.len();
        debug!(step = %step, attempt, bytes, "sending request");
        progress.report(
            context,
            ProgressEvent::RequestSending {
                step,
                attempt,
                bytes,
            },
        );
        self.record(|stats| {
            stats.requests_sent += 1;
            stats.bytes_sent += bytes as u64;
        });

        let response = self
            .client
            .post(request)
            .await
            .map_err(SyncError::transport_retryable)?;

        let received = response.body.len();
        self.record(|stats| stats.bytes_received += received as u64);
        progress.report(
            context,
            ProgressEvent::ResponseReceived {
                step,
                bytes: received,
            },
        );

        self.decode(context, response)
    }

    fn decode<Res: DeserializeOwned>(
        &self,
        context: &SyncContext,
        response: HttpResponse,
    ) -> SyncResult<Option<Res>> {
        if response.is_success() {
            if response.body.is_empty() {
                return Ok(None);
            }
            return Ok(self.serializer.deserialize::<Option<Res>>(&response.body)?);
        }

        match self.serializer.deserialize::<ErrorResponse>(&response.body) {
            Ok(ErrorResponse {
                kind: RemoteErrorKind::SessionLost,
                ..
            }) => Err(SyncError::SessionLost {
                session_id: context.session_id.clone().unwrap_or_default(),
            }),
            Ok(error) => Err(SyncError::transport_retryable(format!(
                "HTTP {} ({:?}): {}",
                response.status, error.kind, error.message
            ))),
            Err(_) => Err(SyncError::transport_retryable(format!(
                "HTTP {}",
                response.status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{LoopbackClient, LoopbackServer};
    use crate::interceptor::{Interceptors, ProgressArgs};
    use parking_lot::Mutex;
    use rowsync_protocol::{CborSerializer, EnsureScopesRequest};
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    /// Replays canned responses and records every request.
    #[derive(Default)]
    struct Scripted {
        responses: Mutex<VecDeque<Result<HttpResponse, String>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl Scripted {
        fn push(&self, response: Result<HttpResponse, String>) {
            self.responses.lock().push_back(response);
        }
    }

    impl LoopbackServer for Scripted {
        fn handle_post(&self, request: &HttpRequest) -> Result<HttpResponse, String> {
            self.requests.lock().push(request.clone());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err("no scripted response".into()))
        }
    }

    fn cbor<T: Serialize>(value: &T) -> Vec<u8> {
        CborSerializer.serialize(value).unwrap()
    }

    type TestChannel = RequestChannel<LoopbackClient<Arc<Scripted>>, CborSerializer>;

    fn channel(server: &Arc<Scripted>) -> TestChannel {
        RequestChannel::new(
            LoopbackClient::new(Arc::clone(server)),
            CborSerializer,
            "https://sync.example.com/api",
        )
        .with_batch_size(100)
        .with_headers(vec![("Authorization".into(), "Bearer t".into())])
    }

    fn request() -> EnsureScopesRequest {
        EnsureScopesRequest::new(SyncContext::new("products"))
    }

    #[test]
    fn headers_without_session() {
        let server = Arc::new(Scripted::default());
        let headers =
            channel(&server).headers(HttpStep::EnsureScopes, &SyncContext::new("products"));
        let find = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(find(STEP_HEADER), Some("EnsureScopes"));
        assert_eq!(find(SCOPE_NAME_HEADER), Some("products"));
        assert_eq!(find(SESSION_ID_HEADER), None);
        assert_eq!(find(BATCH_SIZE_HEADER), Some("100"));
        assert_eq!(find(VERSION_HEADER), Some(PROTOCOL_VERSION));
        assert_eq!(find("content-type"), Some("application/cbor"));
        assert_eq!(find("Authorization"), Some("Bearer t"));
    }

    #[tokio::test]
    async fn session_header_follows_context() {
        let server = Arc::new(Scripted::default());
        server.push(Ok(HttpResponse::ok(cbor(&request()))));
        let channel = channel(&server);
        let interceptors = Interceptors::new();
        let progress = ProgressReporter::new(&interceptors, None, "host");

        let mut context = SyncContext::new("products");
        context.session_id = Some("s-1".into());
        let response: Option<EnsureScopesRequest> = channel
            .send(
                HttpStep::EnsureScopes,
                &context,
                &request(),
                &progress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(response.is_some());
        let sent = server.requests.lock();
        assert_eq!(sent[0].header(SESSION_ID_HEADER), Some("s-1"));
        assert_eq!(sent[0].url, "https://sync.example.com/api");
    }

    #[tokio::test]
    async fn empty_and_null_bodies_are_absent() {
        let server = Arc::new(Scripted::default());
        server.push(Ok(HttpResponse::ok(Vec::new())));
        server.push(Ok(HttpResponse::ok(cbor(&Option::<EnsureScopesRequest>::None))));
        let channel = channel(&server);
        let interceptors = Interceptors::new();
        let progress = ProgressReporter::new(&interceptors, None, "host");
        let cancel = CancellationToken::new();
        let context = SyncContext::new("products");

        for _ in 0..2 {
            let response: Option<EnsureScopesRequest> = channel
                .send(HttpStep::EnsureScopes, &context, &request(), &progress, &cancel)
                .await
                .unwrap();
            assert!(response.is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_are_retried_with_events() {
        let server = Arc::new(Scripted::default());
        server.push(Err("connection reset".into()));
        server.push(Ok(HttpResponse::with_status(
            503,
            cbor(&ErrorResponse::server("busy")),
        )));
        server.push(Ok(HttpResponse::ok(cbor(&request()))));
        let channel = channel(&server);

        let events = Arc::new(Mutex::new(Vec::new()));
        let mut interceptors = Interceptors::new();
        let sink = Arc::clone(&events);
        interceptors.add(Arc::new(move |args: &ProgressArgs| {
            sink.lock().push(args.event.clone())
        }));
        let progress = ProgressReporter::new(&interceptors, None, "host");

        let response: Option<EnsureScopesRequest> = channel
            .send(
                HttpStep::EnsureScopes,
                &SyncContext::new("products"),
                &request(),
                &progress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(response.is_some());
        let retries: Vec<_> = events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::RetryScheduled { attempt, delay, .. } => Some((*attempt, *delay)),
                _ => None,
            })
            .collect();
        assert_eq!(
            retries,
            vec![
                (1, Duration::from_millis(500)),
                (2, Duration::from_millis(1000))
            ]
        );

        let stats = channel.stats();
        assert_eq!(stats.requests_sent, 3);
        assert_eq!(stats.retries, 2);
        assert!(stats.last_error.is_none());
    }

    #[tokio::test]
    async fn session_lost_is_terminal() {
        let server = Arc::new(Scripted::default());
        server.push(Ok(HttpResponse::with_status(
            410,
            cbor(&ErrorResponse::session_lost("unknown session")),
        )));
        let channel = channel(&server);
        let interceptors = Interceptors::new();
        let progress = ProgressReporter::new(&interceptors, None, "host");

        let mut context = SyncContext::new("products");
        context.session_id = Some("s-9".into());
        let result: SyncResult<Option<EnsureScopesRequest>> = channel
            .send(
                HttpStep::GetMoreChanges,
                &context,
                &request(),
                &progress,
                &CancellationToken::new(),
            )
            .await;

        match result {
            Err(SyncError::SessionLost { session_id }) => assert_eq!(session_id, "s-9"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(server.requests.lock().len(), 1);
        assert_eq!(channel.stats().retries, 0);
        assert!(channel.stats().last_error.is_some());
    }

    #[tokio::test]
    async fn undecodable_error_body_keeps_status() {
        let server = Arc::new(Scripted::default());
        server.push(Ok(HttpResponse::with_status(500, b"oops".to_vec())));
        let channel = channel(&server).with_policy(SyncPolicy::no_retry());
        let interceptors = Interceptors::new();
        let progress = ProgressReporter::new(&interceptors, None, "host");

        let result: SyncResult<Option<EnsureScopesRequest>> = channel
            .send(
                HttpStep::EnsureScopes,
                &SyncContext::new("products"),
                &request(),
                &progress,
                &CancellationToken::new(),
            )
            .await;

        match result {
            Err(SyncError::RetryExhausted { attempts, source }) => {
                assert_eq!(attempts, 1);
                assert!(source.to_string().contains("HTTP 500"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
