//! Iteration over a request parameter: static sets, values discovered in a
//! probe response, or continuation tokens chained response to response.
//!
//! One [`IterationController`] drives every URL pattern of a run; its state
//! is reset per pattern.

use serde_json::Value;

use crate::dispatch::{Dispatcher, Request, Response};
use crate::document::Document;
use crate::environment::ExtractionEnvironment;
use crate::error::{ExtractError, ScrapeError};
use crate::extractor::FieldExtractor;

/// Where iteration values come from
#[derive(Debug, Clone)]
pub enum IterationSource {
    /// Known up front; every request carries one value
    Static(Vec<String>),
    /// Discovered by a list extractor on a probe response
    Extracted(FieldExtractor),
    /// Each response yields the token for the next request
    Continuation(FieldExtractor),
}

impl IterationSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Static(_) => SourceKind::Static,
            Self::Extracted(_) => SourceKind::Extracted,
            Self::Continuation(_) => SourceKind::Continuation,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Static,
    Extracted,
    Continuation,
}

impl SourceKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Extracted => "extracted",
            Self::Continuation => "continuation",
        }
    }

    /// Later requests depend on earlier responses
    pub fn is_dependent(self) -> bool {
        !matches!(self, Self::Static)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Nothing issued yet for the current pattern
    Primed,
    /// Probe (or first continuation) request in flight
    Discovering,
    /// Walking the value sequence
    Iterating,
    Done,
}

/// Progress through one URL pattern
#[derive(Debug, Clone)]
pub struct IterationState {
    pub phase: Phase,
    /// Next position in `values`
    pub index: usize,
    pub values: Vec<String>,
    pub issued: usize,
    pub received: usize,
}

impl IterationState {
    fn primed(values: Vec<String>) -> Self {
        Self {
            phase: Phase::Primed,
            index: 0,
            values,
            issued: 0,
            received: 0,
        }
    }
}

/// What a response should additionally be mined for
#[derive(Debug, Clone, Copy)]
pub enum Discovery<'a> {
    /// All values for the iteration parameter
    List(&'a FieldExtractor),
    /// The next continuation token
    Continuation(&'a FieldExtractor),
}

impl Discovery<'_> {
    /// Run discovery against a parsed response; empty values are dropped
    pub fn apply<'d>(
        &self,
        env: &ExtractionEnvironment<'d>,
        document: &'d Document,
    ) -> Result<Vec<String>, ExtractError> {
        match self {
            Self::List(extractor) => Ok(extractor
                .extract_list(env, document)?
                .into_iter()
                .filter_map(|node| param_value(&node.into_value()))
                .collect()),
            Self::Continuation(extractor) => {
                let token = extractor.extract_field(env, document.root(), None)?;
                Ok(param_value(&token).into_iter().collect())
            }
        }
    }
}

/// Coerce an extracted value to a parameter value; null and "" mean none
pub fn param_value(value: &Value) -> Option<String> {
    let s = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    (!s.is_empty()).then_some(s)
}

/// Receives every response of an iterated pattern
pub trait ResponseHandler {
    /// Process one response. When `discovery` is set, return the values it
    /// finds (the probe's value list or the next continuation token).
    fn handle(&mut self, response: Response, discovery: Option<Discovery<'_>>) -> Vec<String>;
}

/// Next step of the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    /// Issue a request; `None` omits the parameter
    Issue(Option<String>),
    Done,
}

pub struct IterationController {
    param: String,
    default_value: Option<String>,
    source: IterationSource,
    state: IterationState,
}

impl IterationController {
    pub fn new(param: impl Into<String>, source: IterationSource) -> Self {
        let values = match &source {
            IterationSource::Static(values) => values.clone(),
            _ => Vec::new(),
        };
        Self {
            param: param.into(),
            default_value: None,
            source,
            state: IterationState::primed(values),
        }
    }

    /// Value sent with the probe request of a dependent source
    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn param(&self) -> &str {
        &self.param
    }

    pub fn source(&self) -> &IterationSource {
        &self.source
    }

    pub fn state(&self) -> &IterationState {
        &self.state
    }

    /// Fail before any request if the mode cannot work
    pub fn validate(&self, async_mode: bool) -> Result<(), ScrapeError> {
        let kind = self.source.kind();
        if async_mode && kind.is_dependent() {
            return Err(ScrapeError::UnsupportedAsyncIteration(kind.name()));
        }
        Ok(())
    }

    /// Back to `Primed` for the next pattern
    pub fn reset(&mut self) {
        let values = match &self.source {
            IterationSource::Static(values) => values.clone(),
            _ => Vec::new(),
        };
        self.state = IterationState::primed(values);
    }

    /// Drive every pattern to completion, one after the other.
    ///
    /// Returns the number of requests issued across all patterns.
    pub fn run(
        &mut self,
        patterns: &[Request],
        async_mode: bool,
        dispatcher: &mut dyn Dispatcher,
        handler: &mut dyn ResponseHandler,
    ) -> Result<usize, ScrapeError> {
        self.validate(async_mode)?;
        let mut issued = 0;
        for (i, template) in patterns.iter().enumerate() {
            self.reset();
            if async_mode {
                self.run_batched(template, dispatcher, handler);
            } else {
                self.run_sequential(template, dispatcher, handler);
            }
            log::info!(
                "pattern {}/{} done: {} requests, {} responses ({} iteration)",
                i + 1,
                patterns.len(),
                self.state.issued,
                self.state.received,
                self.source.kind().name(),
            );
            issued += self.state.issued;
        }
        Ok(issued)
    }

    /// One request in flight at a time; each response may extend the sequence
    fn run_sequential(
        &mut self,
        template: &Request,
        dispatcher: &mut dyn Dispatcher,
        handler: &mut dyn ResponseHandler,
    ) {
        while let Step::Issue(value) = self.advance() {
            dispatcher.enqueue(build_request(template, &self.param, value));
            self.state.issued += 1;

            let discovery = discovery_for(&self.source, self.state.phase);
            let mut discovered = Vec::new();
            let mut received = 0;
            dispatcher.flush(&mut |response| {
                received += 1;
                discovered.extend(handler.handle(response, discovery));
            });
            self.state.received += received;
            self.absorb(discovered);
        }
    }

    /// Queue the whole static sequence, then flush once
    fn run_batched(
        &mut self,
        template: &Request,
        dispatcher: &mut dyn Dispatcher,
        handler: &mut dyn ResponseHandler,
    ) {
        while let Step::Issue(value) = self.advance() {
            dispatcher.enqueue(build_request(template, &self.param, value));
            self.state.issued += 1;
        }
        let mut received = 0;
        dispatcher.flush(&mut |response| {
            received += 1;
            handler.handle(response, None);
        });
        self.state.received += received;
    }

    fn advance(&mut self) -> Step {
        let state = &mut self.state;
        if state.phase == Phase::Primed {
            match self.source.kind() {
                SourceKind::Static => state.phase = Phase::Iterating,
                SourceKind::Extracted | SourceKind::Continuation => {
                    state.phase = Phase::Discovering;
                    return Step::Issue(self.default_value.clone());
                }
            }
        }
        match state.phase {
            Phase::Iterating if state.index < state.values.len() => {
                let value = state.values[state.index].clone();
                state.index += 1;
                Step::Issue(Some(value))
            }
            _ => {
                state.phase = Phase::Done;
                Step::Done
            }
        }
    }

    /// Fold values discovered by the last response into the sequence
    fn absorb(&mut self, discovered: Vec<String>) {
        let state = &mut self.state;
        match (self.source.kind(), state.phase) {
            (SourceKind::Extracted, Phase::Discovering) => {
                state.values = discovered;
                state.index = 0;
                state.phase = Phase::Iterating;
            }
            (SourceKind::Continuation, Phase::Discovering | Phase::Iterating) => {
                match discovered.into_iter().next() {
                    Some(token)
                        if state.values.contains(&token)
                            || self.default_value.as_ref() == Some(&token) =>
                    {
                        log::warn!("continuation token {token:?} repeated, stopping");
                        state.phase = Phase::Done;
                    }
                    Some(token) => {
                        state.values.push(token);
                        state.phase = Phase::Iterating;
                    }
                    None => state.phase = Phase::Done,
                }
            }
            _ => {}
        }
    }
}

fn discovery_for(source: &IterationSource, phase: Phase) -> Option<Discovery<'_>> {
    match (source, phase) {
        (IterationSource::Extracted(extractor), Phase::Discovering) => {
            Some(Discovery::List(extractor))
        }
        (IterationSource::Continuation(extractor), _) => Some(Discovery::Continuation(extractor)),
        _ => None,
    }
}

/// Copy the template and set (or clear) the iteration parameter.
///
/// A `{param}` placeholder in the URL takes the value instead of the query.
pub fn build_request(template: &Request, param: &str, value: Option<String>) -> Request {
    let mut request = template.clone();
    let placeholder = format!("{{{param}}}");
    if request.url.contains(&placeholder) {
        request.url = request
            .url
            .replace(&placeholder, value.as_deref().unwrap_or_default());
    } else {
        request.params.remove(param);
        if let Some(v) = &value {
            request.params.insert(param.to_string(), v.clone());
        }
    }
    request.iteration_value = value;
    request
}
