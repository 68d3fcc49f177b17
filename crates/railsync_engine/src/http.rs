//! HTTP access to the registry.
//!
//! The registry client talks through the [`HttpClient`] trait so that the
//! same code runs against the real registry ([`ReqwestClient`]) or an
//! in-process server ([`LoopbackClient`]).

use railsync_protocol::{HttpMethod, HttpRequest, HttpResponse, LoopbackServer, TransportError};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::redirect::Policy;
use std::time::Duration;

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a request and waits at most `timeout` for the response.
    fn send(&self, request: &HttpRequest, timeout: Duration)
        -> Result<HttpResponse, TransportError>;
}

impl<C: HttpClient + ?Sized> HttpClient for std::sync::Arc<C> {
    fn send(
        &self,
        request: &HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        (**self).send(request, timeout)
    }
}

/// Blocking reqwest client bound to a registry base URL.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    base_url: String,
    client: Client,
}

impl ReqwestClient {
    /// Creates a client for the registry at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Other`] when the underlying client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("railsync/", env!("CARGO_PKG_VERSION")))
            .redirect(Policy::none())
            .build()
            .map_err(|e| TransportError::Other(format!("http client build failed: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl HttpClient for ReqwestClient {
    fn send(
        &self,
        request: &HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let url = self.url(&request.path);
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Put => self.client.put(&url),
            HttpMethod::Delete => self.client.delete(&url),
        }
        .timeout(timeout)
        .header(ACCEPT, "application/json");

        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let response = builder.send().map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(map_reqwest_error)?;
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

/// A client that routes requests directly to an in-process server.
///
/// Timeouts are not enforced; the server decides whether a call times out.
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

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn send(
        &self,
        request: &HttpRequest,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.server.handle(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct EchoServer {
        seen: Mutex<Vec<String>>,
    }

    impl LoopbackServer for EchoServer {
        fn handle(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.lock().push(format!("{} {}", request.method, request.path));
            if request.path == "/down" {
                return Err(TransportError::Connect("refused".into()));
            }
            Ok(HttpResponse::new(200, request.body.clone().unwrap_or_default()))
        }
    }

    #[test]
    fn loopback_routes_to_server() {
        let client = LoopbackClient::new(EchoServer {
            seen: Mutex::new(Vec::new()),
        });
        let request = HttpRequest::new(HttpMethod::Put, "/a").with_body(b"{}".to_vec());
        let response = client.send(&request, Duration::from_secs(1)).unwrap();
        assert_eq!(response.body, b"{}");

        let err = client
            .send(&HttpRequest::new(HttpMethod::Get, "/down"), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
        assert_eq!(*client.server().seen.lock(), vec!["PUT /a", "GET /down"]);
    }

    #[test]
    fn reqwest_client_trims_base_url() {
        let client = ReqwestClient::new("http://registry.invalid/").unwrap();
        assert_eq!(client.base_url(), "http://registry.invalid");
        assert_eq!(client.url("/api/x"), "http://registry.invalid/api/x");
    }
}
