//! HTTP transport abstraction.
//!
//! The protocol only needs POST with a byte body, custom headers and
//! transparent response decompression. The actual client is abstracted via
//! [`HttpClient`] so any HTTP library (or an in-process loopback) can be used.

use async_trait::async_trait;
use std::sync::Arc;

/// A POST request produced by the request channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Target URL.
    pub url: String,
    /// Headers, in insertion order.
    pub headers: Vec<(String, String)>,
    /// Serialized envelope.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Returns the first header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A response as seen by the protocol layer (already decompressed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a 200 response with the given body.
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body,
        }
    }

    /// Creates a response with the given status and body.
    pub fn with_status(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the first header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// HTTP client abstraction.
///
/// Implementations return `Err` only when no response was obtained at all
/// (connection refused, reset, timeout); HTTP error statuses are returned as
/// responses.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the decompressed response.
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST request and returns the response.
    fn handle_post(&self, request: &HttpRequest) -> Result<HttpResponse, String>;
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for Arc<S> {
    fn handle_post(&self, request: &HttpRequest) -> Result<HttpResponse, String> {
        (**self).handle_post(request)
    }
}

/// A loopback client that routes requests directly to an in-process server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        self.server.handle_post(&request)
    }
}

#[cfg(feature = "reqwest")]
pub use self::reqwest_client::ReqwestClient;

#[cfg(feature = "reqwest")]
mod reqwest_client {
    use super::{HttpClient, HttpRequest, HttpResponse};
    use async_trait::async_trait;
    use std::time::Duration;

    /// [`HttpClient`] backed by `reqwest`, with gzip decompression enabled.
    #[derive(Debug, Clone)]
    pub struct ReqwestClient {
        client: reqwest::Client,
    }

    impl ReqwestClient {
        /// Builds a client with the given request timeout.
        pub fn new(timeout: Duration) -> Result<Self, String> {
            let client = reqwest::Client::builder()
                .gzip(true)
                .timeout(timeout)
                .build()
                .map_err(|e| e.to_string())?;
            Ok(Self { client })
        }

        /// Wraps an existing `reqwest` client.
        pub fn from_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl HttpClient for ReqwestClient {
        async fn post(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            let mut builder = self.client.post(&request.url).body(request.body);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let response = builder.send().await.map_err(|e| e.to_string())?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();
            let body = response.bytes().await.map_err(|e| e.to_string())?;

            Ok(HttpResponse {
                status,
                headers,
                body: body.to_vec(),
            })
        }
    }

}
