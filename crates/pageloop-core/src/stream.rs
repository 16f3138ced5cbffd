//! HTTP dispatch over a shared reqwest client.
//!
//! Requests run as async futures on a shared tokio runtime, bounded by
//! `buffer_unordered`, behind the blocking [`Dispatcher`] interface.
//! Responses are delivered on the calling thread once the batch is done.
//! `flush` must not be called from inside a tokio runtime.

use std::collections::BTreeMap;
use std::sync::{LazyLock, OnceLock};
use std::time::Duration;

use futures_util::StreamExt;

use crate::dispatch::{Dispatcher, Request, Response};

/// Process-wide HTTP settings, fixed before the first request
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    /// Whole-request timeout, body included
    pub request_timeout: Duration,
    /// Upper bound on in-flight requests per flush
    pub max_concurrency: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            max_concurrency: 10,
        }
    }
}

static HTTP_CONFIG: OnceLock<HttpConfig> = OnceLock::new();

/// Install HTTP settings; only the first call takes effect
pub fn set_http_config(config: HttpConfig) {
    if HTTP_CONFIG.set(config).is_err() {
        log::warn!("HTTP config already initialized, ignoring new settings");
    }
}

pub fn http_config() -> &'static HttpConfig {
    HTTP_CONFIG.get_or_init(HttpConfig::default)
}

/// Transport-level failure of a single request
#[derive(Debug)]
pub enum StreamError {
    /// Connection, TLS, redirect or body errors
    Http {
        status: Option<u16>,
        message: String,
    },
    /// Connect or request timeout elapsed
    Timeout(String),
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Timeout(message) => write!(f, "timed out: {message}"),
        }
    }
}

impl std::error::Error for StreamError {}

impl StreamError {
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout(e.to_string());
        }
        Self::Http {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    let config = http_config();
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .pool_max_idle_per_host(8)
        .build()
        .expect("failed to build HTTP client")
});

pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Shared tokio runtime driving every flush.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Live dispatcher: queued requests go out concurrently on flush
pub struct HttpDispatcher {
    queue: Vec<Request>,
    max_concurrency: usize,
}

impl HttpDispatcher {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            queue: Vec::new(),
            max_concurrency: max_concurrency.max(1),
        }
    }
}

impl Default for HttpDispatcher {
    fn default() -> Self {
        Self::new(http_config().max_concurrency)
    }
}

impl Dispatcher for HttpDispatcher {
    fn enqueue(&mut self, request: Request) {
        log::debug!("queueing url: {}", request.full_url());
        self.queue.push(request);
    }

    fn flush(&mut self, on_complete: &mut dyn FnMut(Response)) {
        let batch = std::mem::take(&mut self.queue);
        if batch.is_empty() {
            return;
        }
        let limit = self.max_concurrency;
        // Completions are handed out only after the runtime returns, so
        // handlers may start nested runs of their own.
        let responses: Vec<Response> = SHARED_RUNTIME.handle().block_on(
            futures_util::stream::iter(batch)
                .map(fetch)
                .buffer_unordered(limit)
                .collect(),
        );
        for response in responses {
            on_complete(response);
        }
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// GET one request; transport errors become a failed [`Response`]
async fn fetch(request: Request) -> Response {
    let builder = request
        .headers
        .iter()
        .fold(http_client().get(&request.url), |b, (name, value)| {
            b.header(name, value)
        })
        .query(&request.params);

    let result = async {
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let effective_url = resp.url().to_string();
        let headers: BTreeMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = resp.text().await?;
        Ok::<_, reqwest::Error>((status, headers, body, effective_url))
    }
    .await;

    match result {
        Ok((status, headers, body, effective_url)) => Response {
            request,
            status: Some(status),
            headers,
            body,
            effective_url,
            error: None,
        },
        Err(e) => Response::failed(request, StreamError::from_reqwest(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_http_with_status() {
        let err = StreamError::Http {
            status: Some(502),
            message: "bad gateway".to_string(),
        };
        assert_eq!(format!("{err}"), "HTTP 502: bad gateway");
    }

    #[test]
    fn display_http_without_status() {
        let err = StreamError::Http {
            status: None,
            message: "connection refused".to_string(),
        };
        assert_eq!(format!("{err}"), "HTTP error: connection refused");
    }

    #[test]
    fn display_timeout() {
        let err = StreamError::Timeout("operation timed out".to_string());
        assert!(format!("{err}").starts_with("timed out"));
    }

    #[test]
    fn dispatcher_concurrency_is_at_least_one() {
        let dispatcher = HttpDispatcher::new(0);
        assert_eq!(dispatcher.max_concurrency, 1);
    }

    #[test]
    fn empty_flush_is_noop() {
        let mut dispatcher = HttpDispatcher::new(4);
        let mut calls = 0;
        dispatcher.flush(&mut |_| calls += 1);
        assert_eq!(calls, 0);
    }

    #[test]
    fn completion_handler_can_flush_again() {
        let mut outer = HttpDispatcher::new(1);
        outer.enqueue(Request::new("http://127.0.0.1:9/outer"));
        let mut nested = Vec::new();
        outer.flush(&mut |_| {
            let mut inner = HttpDispatcher::new(1);
            inner.enqueue(Request::new("http://127.0.0.1:9/inner"));
            inner.flush(&mut |resp| nested.push(resp.request.url));
        });
        assert_eq!(nested, vec!["http://127.0.0.1:9/inner".to_string()]);
    }

    #[test]
    fn unreachable_host_becomes_failed_response() {
        let mut dispatcher = HttpDispatcher::new(2);
        dispatcher.enqueue(Request::new("http://127.0.0.1:9/nothing-listens-here"));
        assert_eq!(dispatcher.pending(), 1);
        let mut responses = Vec::new();
        dispatcher.flush(&mut |resp| responses.push(resp));
        assert_eq!(responses.len(), 1);
        assert!(!responses[0].is_success());
        assert!(responses[0].error.is_some());
        assert_eq!(dispatcher.pending(), 0);
    }
}
