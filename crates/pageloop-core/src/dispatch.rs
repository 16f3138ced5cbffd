//! Request/response model and the dispatcher seam
//!
//! A [`Dispatcher`] queues requests and delivers their responses on
//! `flush`. The scraper decides when to flush: after every request in
//! sequential mode, once per pattern in async mode.

use std::collections::{BTreeMap, VecDeque};

use reqwest::Url;

/// One outgoing GET request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Base URL without query string
    pub url: String,
    pub params: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    /// Iteration value carried by this request, if any
    pub iteration_value: Option<String>,
}

impl Request {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            params: BTreeMap::new(),
            headers: BTreeMap::new(),
            iteration_value: None,
        }
    }

    /// Split a URL into base and query parameters.
    ///
    /// Explicit `params` win over parameters already present in the URL.
    pub fn from_template(
        url: &str,
        params: &BTreeMap<String, String>,
        headers: &BTreeMap<String, String>,
    ) -> Self {
        let (base, query) = match url.split_once('?') {
            Some((base, query)) => (base, Some(query)),
            None => (url, None),
        };
        let mut merged: BTreeMap<String, String> = match query {
            Some(_) => Url::parse(url)
                .map(|u| u.query_pairs().into_owned().collect())
                .unwrap_or_default(),
            None => BTreeMap::new(),
        };
        merged.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            url: base.to_string(),
            params: merged,
            headers: headers.clone(),
            iteration_value: None,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Full URL including encoded query, for logs and failure reports
    pub fn full_url(&self) -> String {
        if self.params.is_empty() {
            return self.url.clone();
        }
        match Url::parse_with_params(&self.url, &self.params) {
            Ok(url) => url.to_string(),
            Err(_) => self.url.clone(),
        }
    }
}

/// Outcome of one request: a response or a transport failure
#[derive(Debug, Clone)]
pub struct Response {
    pub request: Request,
    /// HTTP status, `None` when the request never completed
    pub status: Option<u16>,
    /// Header names are lowercase
    pub headers: BTreeMap<String, String>,
    pub body: String,
    /// URL after redirects
    pub effective_url: String,
    /// Transport error message
    pub error: Option<String>,
}

impl Response {
    pub fn new(request: Request, status: u16, body: impl Into<String>) -> Self {
        let effective_url = request.full_url();
        Self {
            request,
            status: Some(status),
            headers: BTreeMap::new(),
            body: body.into(),
            effective_url,
            error: None,
        }
    }

    pub fn failed(request: Request, error: impl std::fmt::Display) -> Self {
        let effective_url = request.full_url();
        Self {
            request,
            status: None,
            headers: BTreeMap::new(),
            body: String::new(),
            effective_url,
            error: Some(error.to_string()),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && matches!(self.status, Some(200..=299))
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    /// Why this response counts as failed, `None` on success
    pub fn failure_reason(&self) -> Option<String> {
        if let Some(err) = &self.error {
            return Some(err.clone());
        }
        match self.status {
            Some(200..=299) => None,
            Some(status) => Some(format!("HTTP {status}")),
            None => Some("no response".to_string()),
        }
    }
}

/// Queue-and-flush request executor
pub trait Dispatcher {
    fn enqueue(&mut self, request: Request);

    /// Execute every queued request, handing each response to `on_complete`.
    ///
    /// Blocks until all of them finished. Completion order is unspecified.
    fn flush(&mut self, on_complete: &mut dyn FnMut(Response));

    fn pending(&self) -> usize;
}

type Responder = Box<dyn FnMut(&Request) -> Response + Send>;

/// In-memory dispatcher answering from a closure.
///
/// Records every request it sees and how often it was flushed; used for
/// offline replays and tests.
pub struct FixtureDispatcher {
    queue: VecDeque<Request>,
    responder: Responder,
    seen: Vec<Request>,
    flushes: usize,
}

impl FixtureDispatcher {
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(&Request) -> Response + Send + 'static,
    {
        Self {
            queue: VecDeque::new(),
            responder: Box::new(responder),
            seen: Vec::new(),
            flushes: 0,
        }
    }

    /// Same body with status 200 for every request
    pub fn constant(content_type: &str, body: impl Into<String>) -> Self {
        let content_type = content_type.to_string();
        let body = body.into();
        Self::new(move |req| {
            Response::new(req.clone(), 200, body.clone()).with_header("content-type", content_type.clone())
        })
    }

    /// Requests in enqueue order
    pub fn requests(&self) -> &[Request] {
        &self.seen
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }
}

impl Dispatcher for FixtureDispatcher {
    fn enqueue(&mut self, request: Request) {
        self.seen.push(request.clone());
        self.queue.push_back(request);
    }

    fn flush(&mut self, on_complete: &mut dyn FnMut(Response)) {
        self.flushes += 1;
        while let Some(request) = self.queue.pop_front() {
            let response = (self.responder)(&request);
            on_complete(response);
        }
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }
}
