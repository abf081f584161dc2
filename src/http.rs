//! HTTP transport for the Google Play endpoints.
//!
//! The [`Transport`] trait is the seam between the request pipeline and the
//! network: it takes a fully described [`Request`] and returns raw response
//! bytes. The production implementation is [`HttpTransport`], a pooled
//! `reqwest::Client` bounded to a configurable number of concurrent
//! requests (100 total and 30 idle connections per host by default).
//!
//! # Status handling
//!
//! Any non-200 status is a service rejection: the response body is read in
//! full and carried verbatim as [`Error::Protocol`]. Failures below the
//! HTTP layer surface as [`Error::Transport`].
//!
//! # Concurrency
//!
//! Many requests may be in flight at once from independent tasks; the
//! transport itself holds no per-request state. No timeouts, retries or
//! throttling are applied here - a failed call surfaces immediately.

use std::{pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::{Stream, StreamExt, TryStreamExt};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Method, StatusCode, Url,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Default `Content-Type` for form bodies.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

/// Async chunk stream returned by [`Transport::stream`].
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Request body: url-encoded form pairs or a pre-encoded payload.
///
/// Raw payloads rely on the request's header set to declare their content
/// type; form bodies default to [`FORM_CONTENT_TYPE`] unless the headers
/// say otherwise.
#[derive(Clone, Debug)]
pub enum Body {
    /// Form pairs, encoded as `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
    /// Pre-encoded bytes sent as-is.
    Raw(Vec<u8>),
}

/// One HTTP request as the pipeline hands it to the transport.
///
/// Headers with empty values are skipped when the request is built; that
/// is the mechanism by which optional headers are omitted.
#[derive(Clone, Debug)]
pub struct Request {
    /// HTTP method.
    pub method: Method,
    /// Request URL, query string included.
    pub url: Url,
    /// Header set; empty values are not sent.
    pub headers: Vec<(&'static str, String)>,
    /// Optional request body.
    pub body: Option<Body>,
}

impl Request {
    /// Builds a GET request.
    #[must_use]
    pub fn get(url: Url, headers: Vec<(&'static str, String)>) -> Self {
        Self {
            method: Method::GET,
            url,
            headers,
            body: None,
        }
    }

    /// Builds a POST request with a body.
    #[must_use]
    pub fn post(url: Url, headers: Vec<(&'static str, String)>, body: Body) -> Self {
        Self {
            method: Method::POST,
            url,
            headers,
            body: Some(body),
        }
    }

    /// Resolves the header set into a [`HeaderMap`].
    ///
    /// Empty values and values that cannot be carried in an HTTP header
    /// are skipped. Form bodies get [`FORM_CONTENT_TYPE`] unless the
    /// header set carries an explicit `Content-Type`.
    fn header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if matches!(self.body, Some(Body::Form(_))) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        }

        for (name, value) in &self.headers {
            if value.is_empty() {
                continue;
            }
            let Ok(name) = HeaderName::try_from(*name) else {
                continue;
            };
            let Ok(value) = HeaderValue::from_str(value) else {
                continue;
            };
            headers.insert(name, value);
        }

        headers
    }
}

/// Executes requests against the service.
///
/// Implemented by [`HttpTransport`] for production use; tests substitute a
/// scripted implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Executes a request and returns the raw response bytes.
    ///
    /// # Errors
    ///
    /// * [`Error::Transport`] on connection or I/O failure
    /// * [`Error::Protocol`] when the service answers with a non-200
    ///   status; the body text is the error detail
    async fn execute(&self, request: Request) -> Result<Vec<u8>>;

    /// Executes a request and returns the response body as a chunk stream.
    ///
    /// Used for downloads, where bodies are too large to buffer. Status
    /// handling is the same as [`execute`](Self::execute).
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    async fn stream(&self, request: Request) -> Result<ByteStream>;
}

/// Pooled `reqwest`-backed [`Transport`].
pub struct HttpTransport {
    client: reqwest::Client,
    limiter: Arc<Semaphore>,
}

impl HttpTransport {
    /// Maximum number of requests in flight at once.
    const MAX_CONCURRENT_REQUESTS: usize = 100;

    /// Maximum number of idle pooled connections kept per host.
    const MAX_IDLE_PER_HOST: usize = 30;

    /// Duration to keep idle connections alive.
    ///
    /// Prevents frequent reconnection overhead for subsequent requests.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Creates a transport with the default pool caps (100 total, 30 per
    /// host).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Self::with_limits(Self::MAX_CONCURRENT_REQUESTS, Self::MAX_IDLE_PER_HOST)
    }

    /// Creates a transport with custom pool caps.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the HTTP client cannot be built.
    pub fn with_limits(max_concurrent: usize, max_idle_per_host: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .pool_max_idle_per_host(max_idle_per_host)
            .build()?;

        Ok(Self {
            client,
            limiter: Arc::new(Semaphore::new(max_concurrent)),
        })
    }

    /// Sends the request and checks the status line.
    async fn send(&self, request: Request) -> Result<reqwest::Response> {
        let headers = request.header_map();
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(headers);

        if let Some(body) = request.body {
            builder = match body {
                Body::Form(pairs) => builder.body(encode_form(&pairs)),
                Body::Raw(data) => builder.body(data),
            };
        }

        let response = builder.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            warn!("service rejected request with status {status}");
            let body = response.text().await?;
            return Err(Error::Protocol(body));
        }

        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: Request) -> Result<Vec<u8>> {
        // The semaphore is never closed, so acquisition cannot fail.
        let _permit = self
            .limiter
            .acquire()
            .await
            .expect("connection limiter closed");

        let response = self.send(request).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn stream(&self, request: Request) -> Result<ByteStream> {
        // The permit rides inside the returned stream so the concurrency
        // bound covers the whole body transfer, not just the connection.
        let permit = Arc::clone(&self.limiter)
            .acquire_owned()
            .await
            .expect("connection limiter closed");

        let response = self.send(request).await?;
        let body = response
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(Error::from);

        Ok(hold_permit(body, permit))
    }
}

/// Ties a semaphore permit to a stream's lifetime.
///
/// The permit is released when the stream is dropped, whether or not the
/// body was consumed to the end.
fn hold_permit<S>(stream: S, permit: OwnedSemaphorePermit) -> ByteStream
where
    S: Stream<Item = Result<Vec<u8>>> + Send + 'static,
{
    Box::pin(stream.map(move |item| {
        let _permit = &permit;
        item
    }))
}

/// Encodes form pairs as `application/x-www-form-urlencoded`.
pub(crate) fn encode_form(pairs: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(input: &[(&str, &str)]) -> Vec<(String, String)> {
        input
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn form_encoding_escapes_reserved_characters() {
        let encoded = encode_form(&pairs(&[
            ("Email", "user@gmail.com"),
            ("Passwd", "p&ss wd"),
        ]));
        assert_eq!(encoded, "Email=user%40gmail.com&Passwd=p%26ss+wd");
    }

    #[test]
    fn form_encoding_preserves_order() {
        let encoded = encode_form(&pairs(&[("c", "3"), ("q", "foo")]));
        assert_eq!(encoded, "c=3&q=foo");
    }

    #[test]
    fn header_map_skips_empty_values() {
        let url = Url::parse("https://android.clients.google.com/fdfe/search").expect("url");
        let request = Request::get(
            url,
            vec![
                ("X-DFE-Device-Id", String::new()),
                ("Host", "android.clients.google.com".to_string()),
            ],
        );

        let headers = request.header_map();
        assert!(!headers.contains_key("X-DFE-Device-Id"));
        assert_eq!(
            headers.get("Host").and_then(|value| value.to_str().ok()),
            Some("android.clients.google.com")
        );
    }

    #[test]
    fn form_body_defaults_content_type() {
        let url = Url::parse("https://android.clients.google.com/auth").expect("url");
        let request = Request::post(url, Vec::new(), Body::Form(pairs(&[("Email", "a")])));
        assert_eq!(
            request
                .header_map()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
            Some(FORM_CONTENT_TYPE)
        );
    }

    #[tokio::test]
    async fn stream_holds_its_permit_until_dropped() {
        let limiter = Arc::new(Semaphore::new(1));
        let permit = Arc::clone(&limiter).acquire_owned().await.expect("permit");

        let chunks = futures_util::stream::iter(vec![Ok(b"apk bytes".to_vec())]);
        let stream = hold_permit(chunks, permit);
        assert_eq!(limiter.available_permits(), 0);

        drop(stream);
        assert_eq!(limiter.available_permits(), 1);
    }

    #[tokio::test]
    async fn consumed_stream_releases_its_permit() {
        let limiter = Arc::new(Semaphore::new(1));
        let permit = Arc::clone(&limiter).acquire_owned().await.expect("permit");

        let chunks = futures_util::stream::iter(vec![Ok(b"a".to_vec()), Ok(b"b".to_vec())]);
        let stream = hold_permit(chunks, permit);

        let collected: Vec<Vec<u8>> = stream.try_collect().await.expect("collect");
        assert_eq!(collected, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(limiter.available_permits(), 1);
    }

    #[test]
    fn explicit_content_type_wins_over_form_default() {
        let url = Url::parse("https://android.clients.google.com/checkin").expect("url");
        let request = Request::post(
            url,
            vec![("Content-Type", "application/x-protobuffer".to_string())],
            Body::Form(Vec::new()),
        );
        assert_eq!(
            request
                .header_map()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
            Some("application/x-protobuffer")
        );
    }
}
