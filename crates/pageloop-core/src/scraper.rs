//! The scraper: configuration, pre-flight validation and the response pipeline

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::dispatch::{Dispatcher, Request, Response};
use crate::document::{Document, Format};
use crate::environment::{ExtractionEnvironment, RunState};
use crate::error::ScrapeError;
use crate::extraction_loop::ExtractionLoop;
use crate::extractor::FieldExtractor;
use crate::hooks::{HookArgs, HookEvent, HookRegistry};
use crate::iteration::{Discovery, IterationController, IterationSource, ResponseHandler};
use crate::record::Record;
use crate::stream::HttpDispatcher;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
pub const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Run-wide options
#[derive(Debug, Clone)]
pub struct ScraperOptions {
    /// Queue all requests of a pattern and flush once
    pub async_mode: bool,
    /// Force a document format instead of sniffing each response
    pub format: Option<Format>,
    /// Upper bound on in-flight requests for the live dispatcher
    pub max_concurrency: usize,
    /// Free-form values readable from callbacks and hooks
    pub vars: Map<String, Value>,
}

impl Default for ScraperOptions {
    fn default() -> Self {
        Self {
            async_mode: false,
            format: None,
            max_concurrency: 10,
            vars: Map::new(),
        }
    }
}

/// A response that produced no records
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseFailure {
    pub url: String,
    pub iteration_value: Option<String>,
    pub status: Option<u16>,
    pub reason: String,
}

/// Totals for one call to [`Scraper::run`]
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub requests_issued: usize,
    pub responses_received: usize,
    pub records_extracted: usize,
    pub failures: Vec<ResponseFailure>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone)]
struct IterationConfig {
    param: String,
    source: IterationSource,
}

/// Declarative scraper: URLs, a loop extractor, field extractors, hooks and
/// an optional iteration source.
///
/// Configuration is immutable once `run` starts; a scraper can be run again.
#[derive(Debug)]
pub struct Scraper {
    urls: Vec<String>,
    options: ScraperOptions,
    params: BTreeMap<String, String>,
    headers: BTreeMap<String, String>,
    loop_extractor: Option<FieldExtractor>,
    extractors: Vec<FieldExtractor>,
    hooks: HookRegistry,
    iteration: Option<IterationConfig>,
    iteration_default: Option<String>,
}

impl Scraper {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let headers = [("User-Agent", DEFAULT_USER_AGENT), ("Accept", DEFAULT_ACCEPT)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            options: ScraperOptions::default(),
            params: BTreeMap::new(),
            headers,
            loop_extractor: None,
            extractors: Vec::new(),
            hooks: HookRegistry::new(),
            iteration: None,
            iteration_default: None,
        }
    }

    pub fn options(mut self, options: ScraperOptions) -> Self {
        self.options = options;
        self
    }

    pub fn async_mode(mut self, enabled: bool) -> Self {
        self.options.async_mode = enabled;
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.options.format = Some(format);
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.options.max_concurrency = n;
        self
    }

    pub fn var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.vars.insert(name.into(), value.into());
        self
    }

    /// Query parameter sent with every request
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Request header; replaces a default header of the same name
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value.into());
        self
    }

    /// Nodes that each become one record
    pub fn loop_on(mut self, extractor: FieldExtractor) -> Self {
        self.loop_extractor = Some(extractor);
        self
    }

    /// Field of every record, in call order
    pub fn extract(mut self, extractor: FieldExtractor) -> Self {
        self.extractors.push(extractor);
        self
    }

    pub fn on<F>(mut self, event: HookEvent, hook: F) -> Self
    where
        F: Fn(&ExtractionEnvironment<'_>, &HookArgs<'_, '_>) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.register(event, hook);
        self
    }

    /// `data` hook taking just the records and their response
    pub fn on_data<F>(self, f: F) -> Self
    where
        F: Fn(&[Record], &Response) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on(HookEvent::Data, move |_env, args| match args {
            HookArgs::Data(records, response) => f(*records, *response),
            _ => Ok(()),
        })
    }

    /// Iterate over a fixed set of values
    pub fn set_iteration<I, V>(mut self, param: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        let values = values.into_iter().map(|v| v.to_string()).collect();
        self.iteration = Some(IterationConfig {
            param: param.into(),
            source: IterationSource::Static(values),
        });
        self
    }

    /// Iterate over values found in the first response of each pattern
    pub fn set_iteration_extractor(
        mut self,
        param: impl Into<String>,
        extractor: FieldExtractor,
    ) -> Self {
        self.iteration = Some(IterationConfig {
            param: param.into(),
            source: IterationSource::Extracted(extractor),
        });
        self
    }

    /// Follow continuation tokens until a response yields none
    pub fn continue_with(mut self, param: impl Into<String>, extractor: FieldExtractor) -> Self {
        self.iteration = Some(IterationConfig {
            param: param.into(),
            source: IterationSource::Continuation(extractor),
        });
        self
    }

    /// Value sent with the first request of a discovered or continued
    /// iteration. Independent of call order; static sets ignore it.
    pub fn iteration_default(mut self, value: impl Into<String>) -> Self {
        self.iteration_default = Some(value.into());
        self
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn scraper_options(&self) -> &ScraperOptions {
        &self.options
    }

    /// Configuration problems that would make `run` fail before any request
    pub fn validate(&self) -> Result<&FieldExtractor, ScrapeError> {
        let loop_extractor = self
            .loop_extractor
            .as_ref()
            .ok_or(ScrapeError::MissingLoopExtractor)?;
        if let Some(unnamed) = self.extractors.iter().position(|e| e.field_name().is_none()) {
            return Err(ScrapeError::InvalidExtractorConfig(format!(
                "field extractor #{} has no field name",
                unnamed + 1
            )));
        }
        if let Some(iteration) = &self.iteration {
            let kind = iteration.source.kind();
            if self.options.async_mode && kind.is_dependent() {
                return Err(ScrapeError::UnsupportedAsyncIteration(kind.name()));
            }
        }
        Ok(loop_extractor)
    }

    /// Run against the live HTTP dispatcher
    pub fn with_http(&self) -> Result<RunSummary, ScrapeError> {
        let mut dispatcher = HttpDispatcher::new(self.options.max_concurrency);
        self.run(&mut dispatcher)
    }

    /// Issue every request and deliver records through the `data` hooks
    pub fn run(&self, dispatcher: &mut dyn Dispatcher) -> Result<RunSummary, ScrapeError> {
        self.execute(dispatcher, false).map(|(summary, _)| summary)
    }

    /// Like [`Scraper::run`], but also hand back every record in delivery order
    pub fn collect(
        &self,
        dispatcher: &mut dyn Dispatcher,
    ) -> Result<(Vec<Record>, RunSummary), ScrapeError> {
        self.execute(dispatcher, true)
            .map(|(summary, records)| (records, summary))
    }

    fn execute(
        &self,
        dispatcher: &mut dyn Dispatcher,
        keep_records: bool,
    ) -> Result<(RunSummary, Vec<Record>), ScrapeError> {
        let loop_extractor = self.validate()?;
        if self.urls.is_empty() {
            log::warn!("no URLs configured, nothing to do");
        }

        let started = Instant::now();
        let patterns: Vec<Request> = self
            .urls
            .iter()
            .map(|url| Request::from_template(url, &self.params, &self.headers))
            .collect();
        let mut pipeline = Pipeline {
            scraper: self,
            extraction: ExtractionLoop::new(loop_extractor, &self.extractors, &self.hooks),
            state: RunState::default(),
            failures: Vec::new(),
            kept: keep_records.then(Vec::new),
        };

        let requests_issued = match &self.iteration {
            Some(iteration) => {
                let mut controller =
                    IterationController::new(iteration.param.clone(), iteration.source.clone());
                if let Some(default) = &self.iteration_default {
                    controller = controller.with_default(default.clone());
                }
                controller.run(
                    &patterns,
                    self.options.async_mode,
                    dispatcher,
                    &mut pipeline,
                )?
            }
            None => self.run_once(patterns, dispatcher, &mut pipeline),
        };

        let summary = RunSummary {
            requests_issued,
            responses_received: pipeline.state.responses_received,
            records_extracted: pipeline.state.records_extracted,
            failures: pipeline.failures,
            elapsed: started.elapsed(),
        };
        log::info!(
            "run finished: {} requests, {} records, {} failures in {:.1}s",
            summary.requests_issued,
            summary.records_extracted,
            summary.failures.len(),
            summary.elapsed.as_secs_f64()
        );
        Ok((summary, pipeline.kept.unwrap_or_default()))
    }

    /// One request per URL; sequential flushes each, async flushes once
    fn run_once(
        &self,
        patterns: Vec<Request>,
        dispatcher: &mut dyn Dispatcher,
        pipeline: &mut Pipeline<'_>,
    ) -> usize {
        let mut issued = 0;
        for request in patterns {
            dispatcher.enqueue(request);
            issued += 1;
            if !self.options.async_mode {
                dispatcher.flush(&mut |response| {
                    pipeline.handle(response, None);
                });
            }
        }
        if self.options.async_mode {
            dispatcher.flush(&mut |response| {
                pipeline.handle(response, None);
            });
        }
        issued
    }
}

/// Per-run response processing: parse, discover, extract, deliver
struct Pipeline<'s> {
    scraper: &'s Scraper,
    extraction: ExtractionLoop<'s>,
    state: RunState,
    failures: Vec<ResponseFailure>,
    kept: Option<Vec<Record>>,
}

impl Pipeline<'_> {
    fn fail(&mut self, response: &Response, reason: String) {
        log::warn!("failed: {}: {reason}", response.request.full_url());
        self.state.failed_requests += 1;
        self.failures.push(ResponseFailure {
            url: response.request.full_url(),
            iteration_value: response.request.iteration_value.clone(),
            status: response.status,
            reason,
        });
    }

    /// Failed responses still reach `after` and `data`, with no records
    fn deliver_empty(&self, response: &Response) {
        let state = self.state;
        let env = ExtractionEnvironment::new(&self.scraper.options, &state).with_response(response);
        for args in [HookArgs::After(&[]), HookArgs::Data(&[], response)] {
            if let Err(e) = self.scraper.hooks.dispatch(&env, args) {
                log::warn!("{e}");
            }
        }
    }

    fn parse(&self, response: &Response) -> Result<Document, String> {
        let format = self
            .scraper
            .options
            .format
            .unwrap_or_else(|| Format::detect(response.content_type(), &response.body));
        format
            .adapter()
            .parse(&response.body)
            .map_err(|e| e.to_string())
    }
}

impl ResponseHandler for Pipeline<'_> {
    fn handle(&mut self, response: Response, discovery: Option<Discovery<'_>>) -> Vec<String> {
        self.state.responses_received += 1;
        log::info!(
            "response #{} status: [{}] url: {}",
            self.state.responses_received,
            response
                .status
                .map_or_else(|| "-".to_string(), |s| s.to_string()),
            response.effective_url
        );

        if let Some(reason) = response.failure_reason() {
            self.fail(&response, reason);
            self.deliver_empty(&response);
            return Vec::new();
        }
        let document = match self.parse(&response) {
            Ok(document) => document,
            Err(reason) => {
                self.fail(&response, reason);
                self.deliver_empty(&response);
                return Vec::new();
            }
        };

        let scraper = self.scraper;
        let state = self.state;
        let env = ExtractionEnvironment::new(&scraper.options, &state)
            .with_document(&document)
            .with_response(&response);

        let discovered = match discovery.map(|d| d.apply(&env, &document)) {
            Some(Ok(values)) => {
                log::debug!("discovered {} iteration values", values.len());
                values
            }
            Some(Err(e)) => {
                self.fail(&response, format!("iteration discovery failed: {e}"));
                Vec::new()
            }
            None => Vec::new(),
        };

        let records = match self.extraction.run(&env, &document) {
            Ok(records) => records,
            Err(e) => {
                self.fail(&response, e.to_string());
                return discovered;
            }
        };
        self.state.records_extracted += records.len();
        if let Err(e) = scraper.hooks.dispatch(&env, HookArgs::Data(&records, &response)) {
            self.fail(&response, e.to_string());
        }
        if let Some(kept) = self.kept.as_mut() {
            kept.extend(records);
        }
        discovered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::FixtureDispatcher;
    use crate::document::Node;
    use std::sync::{Arc, Mutex};

    const PAGE: &str = r#"
        <div class="item"><a href="/1">one</a></div>
        <div class="item"><a href="/2">two</a></div>
    "#;

    fn items_scraper(urls: &[&str]) -> Scraper {
        Scraper::new(urls.iter().copied())
            .loop_on(FieldExtractor::list().selector(".item").build().unwrap())
            .extract(FieldExtractor::field("title").selector("a").build().unwrap())
    }

    #[test]
    fn run_without_loop_extractor_fails_fast() {
        let scraper = Scraper::new(["http://example.com/"]);
        let mut dispatcher = FixtureDispatcher::constant("text/html", PAGE);
        let err = scraper.run(&mut dispatcher).unwrap_err();
        assert!(matches!(err, ScrapeError::MissingLoopExtractor));
        assert!(dispatcher.requests().is_empty());
    }

    #[test]
    fn unnamed_field_extractor_rejected() {
        let scraper = items_scraper(&["http://example.com/"])
            .extract(FieldExtractor::list().selector("a").build().unwrap());
        let err = scraper.validate().unwrap_err();
        assert!(matches!(err, ScrapeError::InvalidExtractorConfig(_)));
    }

    #[test]
    fn async_with_continuation_fails_before_requests() {
        let scraper = items_scraper(&["http://example.com/"])
            .async_mode(true)
            .continue_with("next", FieldExtractor::field("next").build().unwrap());
        let mut dispatcher = FixtureDispatcher::constant("text/html", PAGE);
        let err = scraper.run(&mut dispatcher).unwrap_err();
        assert!(matches!(err, ScrapeError::UnsupportedAsyncIteration("continuation")));
        assert!(dispatcher.requests().is_empty());
    }

    #[test]
    fn one_shot_sequential_flushes_per_url() {
        let scraper = items_scraper(&["http://a.example/", "http://b.example/"]);
        let mut dispatcher = FixtureDispatcher::constant("text/html", PAGE);
        let (records, summary) = scraper.collect(&mut dispatcher).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(summary.requests_issued, 2);
        assert_eq!(summary.responses_received, 2);
        assert_eq!(dispatcher.flushes(), 2);
        assert!(summary.is_success());
    }

    #[test]
    fn one_shot_async_flushes_once() {
        let scraper = items_scraper(&["http://a.example/", "http://b.example/"]).async_mode(true);
        let mut dispatcher = FixtureDispatcher::constant("text/html", PAGE);
        let summary = scraper.run(&mut dispatcher).unwrap();
        assert_eq!(summary.records_extracted, 4);
        assert_eq!(dispatcher.flushes(), 1);
    }

    #[test]
    fn static_set_delivers_one_data_call_per_value() {
        let calls = Arc::new(Mutex::new(0usize));
        let counter = calls.clone();
        let scraper = items_scraper(&["http://example.com/list"])
            .set_iteration("page", 1..=4)
            .on_data(move |_, _| {
                *counter.lock().unwrap() += 1;
                Ok(())
            });
        let mut dispatcher = FixtureDispatcher::constant("text/html", PAGE);
        let summary = scraper.run(&mut dispatcher).unwrap();
        assert_eq!(*calls.lock().unwrap(), 4);
        assert_eq!(summary.requests_issued, 4);
        assert_eq!(summary.records_extracted, 8);
    }

    #[test]
    fn async_static_set_sends_every_value_in_one_flush() {
        let scraper = items_scraper(&["http://example.com/list"])
            .set_iteration("offset", [0, 5, 10, 15, 20])
            .async_mode(true);
        let mut dispatcher = FixtureDispatcher::constant("text/html", PAGE);
        let summary = scraper.run(&mut dispatcher).unwrap();

        let mut sent: Vec<&str> = dispatcher
            .requests()
            .iter()
            .map(|r| r.params["offset"].as_str())
            .collect();
        sent.sort_unstable_by_key(|v| v.parse::<u32>().unwrap_or(0));
        assert_eq!(sent, vec!["0", "5", "10", "15", "20"]);
        assert_eq!(dispatcher.flushes(), 1);
        assert_eq!(summary.responses_received, 5);
    }

    #[test]
    fn broken_discovery_extractor_is_reported() {
        let scraper = items_scraper(&["http://example.com/list"])
            .set_iteration_extractor("p", FieldExtractor::list().selector("a[").build().unwrap());
        let mut dispatcher = FixtureDispatcher::constant("text/html", PAGE);
        let (records, summary) = scraper.collect(&mut dispatcher).unwrap();

        assert_eq!(summary.requests_issued, 1);
        assert_eq!(records.len(), 2);
        assert!(!summary.is_success());
        assert_eq!(summary.failures.len(), 1);
        assert!(summary.failures[0].reason.contains("iteration discovery failed"));
        assert!(summary.failures[0].reason.contains("invalid selector"));
    }

    #[test]
    fn failing_continuation_callback_is_reported() {
        let scraper = items_scraper(&["http://example.com/list"]).continue_with(
            "next",
            FieldExtractor::list()
                .callback(|_, _, _| anyhow::bail!("token lookup broke"))
                .build()
                .unwrap(),
        );
        let mut dispatcher = FixtureDispatcher::constant("text/html", PAGE);
        let summary = scraper.run(&mut dispatcher).unwrap();
        assert_eq!(summary.requests_issued, 1);
        assert_eq!(summary.failures.len(), 1);
        assert!(summary.failures[0].reason.contains("token lookup broke"));
    }

    #[test]
    fn iteration_default_survives_call_order() {
        let scraper = items_scraper(&["http://example.com/list"])
            .iteration_default("1")
            .set_iteration_extractor("page", FieldExtractor::list().selector(".none").build().unwrap());
        let mut dispatcher = FixtureDispatcher::constant("text/html", PAGE);
        scraper.run(&mut dispatcher).unwrap();
        assert_eq!(dispatcher.requests().len(), 1);
        assert_eq!(dispatcher.requests()[0].params["page"], "1");
    }

    #[test]
    fn default_headers_and_overrides() {
        let scraper = items_scraper(&["http://example.com/?q=x"])
            .header("user-agent", "pageloop-test")
            .param("lang", "en");
        let mut dispatcher = FixtureDispatcher::constant("text/html", PAGE);
        scraper.run(&mut dispatcher).unwrap();

        let request = &dispatcher.requests()[0];
        assert_eq!(request.url, "http://example.com/");
        assert_eq!(request.params["q"], "x");
        assert_eq!(request.params["lang"], "en");
        assert_eq!(request.headers["user-agent"], "pageloop-test");
        assert!(!request.headers.contains_key("User-Agent"));
        assert_eq!(request.headers["Accept"], DEFAULT_ACCEPT);
    }

    #[test]
    fn failed_response_fires_data_with_no_records() {
        let deliveries = Arc::new(Mutex::new(Vec::new()));
        let sink = deliveries.clone();
        let scraper = items_scraper(&["http://example.com/"]).on_data(move |records, response| {
            sink.lock().unwrap().push((records.len(), response.status));
            Ok(())
        });
        let mut dispatcher =
            FixtureDispatcher::new(|req| Response::new(req.clone(), 503, "unavailable"));
        let summary = scraper.run(&mut dispatcher).unwrap();

        assert_eq!(*deliveries.lock().unwrap(), vec![(0, Some(503))]);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].status, Some(503));
        assert_eq!(summary.failures[0].reason, "HTTP 503");
    }

    #[test]
    fn forced_format_overrides_content_type() {
        let scraper = Scraper::new(["http://example.com/api"])
            .format(Format::Json)
            .loop_on(FieldExtractor::list().selector("items").build().unwrap())
            .extract(FieldExtractor::field("id").build().unwrap());
        let mut dispatcher =
            FixtureDispatcher::constant("text/plain", r#"{"items": [{"id": 1}, {"id": 2}]}"#);
        let (records, _) = scraper.collect(&mut dispatcher).unwrap();
        let ids: Vec<&Value> = records.iter().filter_map(|r| r.get("id")).collect();
        assert_eq!(ids, vec![&Value::from(1), &Value::from(2)]);
    }

    #[test]
    fn unparsable_body_is_a_failure() {
        let scraper = Scraper::new(["http://example.com/api"])
            .loop_on(FieldExtractor::list().selector("items").build().unwrap())
            .extract(FieldExtractor::field("id").build().unwrap());
        let mut dispatcher = FixtureDispatcher::constant("application/json", "{oops");
        let summary = scraper.run(&mut dispatcher).unwrap();
        assert_eq!(summary.failures.len(), 1);
        assert!(summary.failures[0].reason.contains("json"));
    }

    #[test]
    fn hook_failure_skips_response_and_continues() {
        let scraper = items_scraper(&["http://a.example/", "http://b.example/"]).on(
            HookEvent::Before,
            |env, _| {
                if env.response().map(|r| r.request.url.as_str()) == Some("http://a.example/") {
                    anyhow::bail!("skip a");
                }
                Ok(())
            },
        );
        let mut dispatcher = FixtureDispatcher::constant("text/html", PAGE);
        let (records, summary) = scraper.collect(&mut dispatcher).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(summary.failures.len(), 1);
        assert!(summary.failures[0].reason.contains("before hook failed"));
    }

    #[test]
    fn vars_reach_callbacks() {
        let scraper = Scraper::new(["http://example.com/"])
            .var("site", "example")
            .loop_on(FieldExtractor::list().selector(".item").build().unwrap())
            .extract(
                FieldExtractor::field("site")
                    .callback(|env, _, _| {
                        Ok(env.var("site").cloned().map(Node::from).unwrap_or_else(Node::null))
                    })
                    .build()
                    .unwrap(),
            );
        let mut dispatcher = FixtureDispatcher::constant("text/html", PAGE);
        let (records, _) = scraper.collect(&mut dispatcher).unwrap();
        assert!(records.iter().all(|r| r.get_str("site") == Some("example")));
    }
}
