//! HTTP byte sources.
//!
//! [`HttpSource`] negotiates range support once per source and then serves every window either
//! from a single cached full download or from one `Range` request per fetch. The wire work sits
//! behind [`HttpTransport`] so the same negotiation runs over the async and the blocking
//! `reqwest` clients.

use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

use crate::error::{FastHeaderError, FastHeaderResult};
use crate::reader::{ByteSource, FetchCounter};

/// Largest file downloaded whole when the server does not accept ranges.
pub const RANGE_FALLBACK_MAX: u64 = 10 * 1024 * 1024;

/// Tunables for HTTP sources and the shared clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    /// Bound on every single request, including reading the body.
    pub timeout: Duration,
    /// Files below this size are downloaded once when ranges are not supported.
    pub fallback_max: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            fallback_max: RANGE_FALLBACK_MAX,
        }
    }
}

/// The parts of an HTTP response a [`HttpSource`] looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Parsed `Content-Length`, if present.
    pub content_length: Option<u64>,
    /// `Accept-Ranges: bytes` was present.
    pub accept_ranges: bool,
    /// Response body. Empty for `HEAD`.
    pub body: Bytes,
}

/// One HTTP round trip.
///
/// `Err` means the round trip itself failed (connection, timeout, body read) and may be
/// retried. Every HTTP status, including error statuses, is returned as `Ok`. `timeout` bounds
/// the whole round trip, including reading the body.
pub trait HttpTransport: Debug + Send + Sync {
    /// Issue a `HEAD` request.
    fn head(&self, url: &Url, timeout: Duration) -> BoxFuture<'_, FastHeaderResult<HttpResponse>>;

    /// Issue a `GET`, restricted to `range` when one is given.
    fn get(
        &self,
        url: &Url,
        range: Option<Range<u64>>,
        timeout: Duration,
    ) -> BoxFuture<'_, FastHeaderResult<HttpResponse>>;
}

impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    fn head(&self, url: &Url, timeout: Duration) -> BoxFuture<'_, FastHeaderResult<HttpResponse>> {
        self.as_ref().head(url, timeout)
    }

    fn get(
        &self,
        url: &Url,
        range: Option<Range<u64>>,
        timeout: Duration,
    ) -> BoxFuture<'_, FastHeaderResult<HttpResponse>> {
        self.as_ref().get(url, range, timeout)
    }
}

/// What the capability probe learned about the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Declared size of the resource.
    pub content_length: Option<u64>,
    /// The server declared `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
}

#[derive(Debug, Clone)]
enum Request {
    Probe,
    Full,
    Range(Range<u64>),
}

/// A [`ByteSource`] over an HTTP(S) URL.
///
/// The transport is a cheap handle onto a connection pool that outlives the source; dropping
/// the source never closes the pool.
#[derive(Debug)]
pub struct HttpSource<T: HttpTransport> {
    transport: T,
    url: Url,
    config: HttpConfig,
    capabilities: OnceCell<Capabilities>,
    full_content: OnceCell<Bytes>,
    counter: FetchCounter,
}

impl<T: HttpTransport> HttpSource<T> {
    /// Create a source for `url`. No request is made until the first fetch or probe.
    pub fn new(transport: T, url: Url) -> Self {
        Self {
            transport,
            url,
            config: HttpConfig::default(),
            capabilities: OnceCell::new(),
            full_content: OnceCell::new(),
            counter: FetchCounter::new(),
        }
    }

    /// Replace the default [`HttpConfig`].
    pub fn with_config(mut self, config: HttpConfig) -> Self {
        self.config = config;
        self
    }

    /// The URL this source reads from.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Run the capability probe if it has not run yet.
    ///
    /// A failed probe leaves the source unprobed, so the next fetch probes again.
    pub async fn probe(&self) -> FastHeaderResult<Capabilities> {
        let capabilities = self
            .capabilities
            .get_or_try_init(|| async {
                let response = self.round_trip(&Request::Probe).await?;
                if response.status >= 400 {
                    return Err(FastHeaderError::HttpStatus(response.status));
                }
                let capabilities = Capabilities {
                    content_length: response.content_length,
                    accept_ranges: response.accept_ranges,
                };
                debug!(url = %self.url, ?capabilities, "probed");
                Ok(capabilities)
            })
            .await?;
        Ok(*capabilities)
    }

    fn wants_full_get(&self, capabilities: Capabilities) -> bool {
        !capabilities.accept_ranges
            && capabilities
                .content_length
                .is_some_and(|length| length < self.config.fallback_max)
    }

    async fn fetch_window(&self, start: u64, length: u64) -> FastHeaderResult<Bytes> {
        if length == 0 {
            return Err(FastHeaderError::InvalidRange(start));
        }
        let capabilities = self.probe().await?;
        if capabilities
            .content_length
            .is_some_and(|total| start.saturating_add(length) > total)
        {
            return Err(end_of_file(start, length, capabilities.content_length));
        }

        if let Some(content) = self.full_content.get() {
            return slice(content, start, length);
        }

        if self.wants_full_get(capabilities) {
            let content = self
                .full_content
                .get_or_try_init(|| self.download())
                .await?;
            return slice(content, start, length);
        }

        if !capabilities.accept_ranges {
            return Err(FastHeaderError::RangesUnsupported);
        }

        self.fetch_range(start, length, capabilities).await
    }

    async fn download(&self) -> FastHeaderResult<Bytes> {
        let response = self.round_trip(&Request::Full).await?;
        if response.status >= 400 {
            return Err(FastHeaderError::HttpStatus(response.status));
        }
        Ok(response.body)
    }

    async fn fetch_range(
        &self,
        start: u64,
        length: u64,
        capabilities: Capabilities,
    ) -> FastHeaderResult<Bytes> {
        let response = self
            .round_trip(&Request::Range(start..start + length))
            .await?;

        match response.status {
            206 => {}
            200 => {
                // The server ignored `Range` and sent everything.
                if capabilities
                    .content_length
                    .is_some_and(|length| length >= self.config.fallback_max)
                {
                    return Err(FastHeaderError::RangesUnsupported);
                }
                let body = response.body;
                let content = self.full_content.get_or_init(|| async move { body }).await;
                return slice(content, start, length);
            }
            416 => return Err(end_of_file(start, length, capabilities.content_length)),
            status => return Err(FastHeaderError::HttpStatus(status)),
        }

        let mut body = response.body;
        body.truncate(length as usize);
        if body.len() as u64 == length {
            return Ok(body);
        }

        // One corrective request for the missing tail.
        let received = body.len() as u64;
        let tail = self
            .round_trip(&Request::Range(start + received..start + length))
            .await?;
        match tail.status {
            206 => {}
            416 => return Err(end_of_file(start, length, capabilities.content_length)),
            status => return Err(FastHeaderError::HttpStatus(status)),
        }

        let mut data = BytesMut::with_capacity(length as usize);
        data.extend_from_slice(&body);
        data.extend_from_slice(&tail.body[..tail.body.len().min((length - received) as usize)]);
        if data.len() as u64 != length {
            return Err(FastHeaderError::EndOfFile(length, data.len() as u64));
        }
        Ok(data.freeze())
    }

    /// One request with a single retry on transport failure.
    async fn round_trip(&self, request: &Request) -> FastHeaderResult<HttpResponse> {
        let timeout = self.config.timeout;
        let mut retried = false;
        loop {
            let attempt = match request {
                Request::Probe => self.transport.head(&self.url, timeout),
                Request::Full => self.transport.get(&self.url, None, timeout),
                Request::Range(range) => self.transport.get(&self.url, Some(range.clone()), timeout),
            };
            match attempt.await {
                Ok(response) => {
                    self.counter.record_request(response.body.len() as u64);
                    debug!(
                        url = %self.url,
                        ?request,
                        status = response.status,
                        received = response.body.len(),
                        "round trip"
                    );
                    return Ok(response);
                }
                Err(err) if !retried => {
                    debug!(url = %self.url, ?request, %err, "round trip failed, retrying");
                    retried = true;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<T: HttpTransport> ByteSource for HttpSource<T> {
    fn fetch(&self, start: u64, length: u64) -> BoxFuture<'_, FastHeaderResult<Bytes>> {
        self.fetch_window(start, length).boxed()
    }

    fn size(&self) -> Option<u64> {
        self.capabilities
            .get()
            .and_then(|capabilities| capabilities.content_length)
            .or_else(|| self.full_content.get().map(|content| content.len() as u64))
    }

    fn bytes_fetched(&self) -> u64 {
        self.counter.bytes()
    }

    fn requests_made(&self) -> u64 {
        self.counter.requests()
    }
}

fn slice(content: &Bytes, start: u64, length: u64) -> FastHeaderResult<Bytes> {
    let available = (content.len() as u64).saturating_sub(start);
    if length > available {
        return Err(FastHeaderError::EndOfFile(length, available));
    }
    Ok(content.slice(start as usize..(start + length) as usize))
}

fn end_of_file(start: u64, length: u64, content_length: Option<u64>) -> FastHeaderError {
    let available = content_length.map_or(0, |total| total.saturating_sub(start));
    FastHeaderError::EndOfFile(length, available)
}

#[cfg(feature = "reqwest")]
pub use with_reqwest::{shared_blocking_client, shared_client};

#[cfg(feature = "reqwest")]
mod with_reqwest {
    use std::ops::Range;
    use std::time::Duration;

    use bytes::Bytes;
    use futures::future::{BoxFuture, FutureExt};
    use once_cell::sync::OnceCell;
    use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_LENGTH, RANGE};
    use url::Url;

    use super::{HttpConfig, HttpResponse, HttpTransport};
    use crate::error::FastHeaderResult;

    /// The process-wide async client, built on first use.
    pub fn shared_client() -> FastHeaderResult<reqwest::Client> {
        static CLIENT: OnceCell<reqwest::Client> = OnceCell::new();
        let client = CLIENT.get_or_try_init(|| {
            reqwest::Client::builder()
                .timeout(HttpConfig::default().timeout)
                .build()
        })?;
        Ok(client.clone())
    }

    /// The process-wide blocking client, built on first use.
    ///
    /// Like every `reqwest::blocking` client, it must not be first used from within an async
    /// runtime.
    pub fn shared_blocking_client() -> FastHeaderResult<reqwest::blocking::Client> {
        static CLIENT: OnceCell<reqwest::blocking::Client> = OnceCell::new();
        let client = CLIENT.get_or_try_init(|| {
            reqwest::blocking::Client::builder()
                .timeout(HttpConfig::default().timeout)
                .build()
        })?;
        Ok(client.clone())
    }

    fn range_header(range: &Range<u64>) -> String {
        // HTTP range is inclusive, so we need to subtract 1 from the end
        format!("bytes={}-{}", range.start, range.end - 1)
    }

    fn to_response(status: u16, headers: &HeaderMap, body: Bytes) -> HttpResponse {
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok());
        let accept_ranges = headers
            .get(ACCEPT_RANGES)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("bytes"));
        HttpResponse {
            status,
            content_length,
            accept_ranges,
            body,
        }
    }

    impl HttpTransport for reqwest::Client {
        fn head(
            &self,
            url: &Url,
            timeout: Duration,
        ) -> BoxFuture<'_, FastHeaderResult<HttpResponse>> {
            let request = reqwest::Client::head(self, url.clone()).timeout(timeout);
            async move {
                let response = request.send().await?;
                Ok(to_response(
                    response.status().as_u16(),
                    response.headers(),
                    Bytes::new(),
                ))
            }
            .boxed()
        }

        fn get(
            &self,
            url: &Url,
            range: Option<Range<u64>>,
            timeout: Duration,
        ) -> BoxFuture<'_, FastHeaderResult<HttpResponse>> {
            let mut request = reqwest::Client::get(self, url.clone()).timeout(timeout);
            if let Some(range) = range {
                request = request.header(RANGE, range_header(&range));
            }
            async move {
                let response = request.send().await?;
                let status = response.status().as_u16();
                let headers = response.headers().clone();
                let body = response.bytes().await?;
                Ok(to_response(status, &headers, body))
            }
            .boxed()
        }
    }

    fn send_blocking(request: reqwest::blocking::RequestBuilder) -> FastHeaderResult<HttpResponse> {
        let response = request.send()?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes()?;
        Ok(to_response(status, &headers, body))
    }

    impl HttpTransport for reqwest::blocking::Client {
        fn head(
            &self,
            url: &Url,
            timeout: Duration,
        ) -> BoxFuture<'_, FastHeaderResult<HttpResponse>> {
            let result = reqwest::blocking::Client::head(self, url.clone())
                .timeout(timeout)
                .send()
                .map(|response| {
                    to_response(
                        response.status().as_u16(),
                        response.headers(),
                        Bytes::new(),
                    )
                })
                .map_err(Into::into);
            futures::future::ready(result).boxed()
        }

        fn get(
            &self,
            url: &Url,
            range: Option<Range<u64>>,
            timeout: Duration,
        ) -> BoxFuture<'_, FastHeaderResult<HttpResponse>> {
            let mut request = reqwest::blocking::Client::get(self, url.clone()).timeout(timeout);
            if let Some(range) = range {
                request = request.header(RANGE, range_header(&range));
            }
            futures::future::ready(send_blocking(request)).boxed()
        }
    }
}
