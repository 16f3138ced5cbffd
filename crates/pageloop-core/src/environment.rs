//! Execution context handed to every extractor callback and hook

use serde_json::Value;

use crate::dispatch::Response;
use crate::document::Document;
use crate::scraper::ScraperOptions;

/// Counters accumulated by a scraper run, as seen by callbacks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunState {
    pub responses_received: usize,
    pub records_extracted: usize,
    pub failed_requests: usize,
}

/// Read-only view of the current document and the owning scraper.
///
/// Rebuilt for every response; borrows everything, owns nothing.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionEnvironment<'a> {
    options: &'a ScraperOptions,
    state: &'a RunState,
    document: Option<&'a Document>,
    response: Option<&'a Response>,
}

impl<'a> ExtractionEnvironment<'a> {
    pub fn new(options: &'a ScraperOptions, state: &'a RunState) -> Self {
        Self {
            options,
            state,
            document: None,
            response: None,
        }
    }

    pub fn with_document(mut self, document: &'a Document) -> Self {
        self.document = Some(document);
        self
    }

    pub fn with_response(mut self, response: &'a Response) -> Self {
        self.response = Some(response);
        self
    }

    /// Document being extracted; `None` for failed responses
    pub fn document(&self) -> Option<&'a Document> {
        self.document
    }

    pub fn response(&self) -> Option<&'a Response> {
        self.response
    }

    pub fn options(&self) -> &'a ScraperOptions {
        self.options
    }

    pub fn state(&self) -> &'a RunState {
        self.state
    }

    /// User variable from [`ScraperOptions::vars`]
    pub fn var(&self, name: &str) -> Option<&'a Value> {
        self.options.vars.get(name)
    }

    /// Value of the iteration parameter carried by the current request
    pub fn iteration_value(&self) -> Option<&'a str> {
        self.response?.request.iteration_value.as_deref()
    }

    /// Invoke a callback inside this environment
    pub fn run<T>(&self, callback: impl FnOnce(&Self) -> T) -> T {
        callback(self)
    }
}
