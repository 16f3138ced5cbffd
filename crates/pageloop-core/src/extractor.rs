//! Field extractors: how one value (or one list of nodes) is pulled out of a document

use std::sync::Arc;

use serde_json::Value;

use crate::document::{Document, Node, SelectorExpr};
use crate::environment::ExtractionEnvironment;
use crate::error::{ExtractError, ScrapeError};
use crate::record::Record;

/// Field callback: receives the resolved node and the record built so far
pub type FieldFn = Arc<
    dyn for<'d> Fn(&ExtractionEnvironment<'d>, Node<'d>, Option<&Record>) -> anyhow::Result<Node<'d>>
        + Send
        + Sync,
>;

/// List callback: receives every matched node and returns the nodes to keep
pub type ListFn = Arc<
    dyn for<'d> Fn(&ExtractionEnvironment<'d>, Vec<Node<'d>>) -> anyhow::Result<Vec<Node<'d>>>
        + Send
        + Sync,
>;

/// Wrap a closure as a [`ListFn`]
pub fn list_fn<F>(f: F) -> ListFn
where
    F: for<'d> Fn(&ExtractionEnvironment<'d>, Vec<Node<'d>>) -> anyhow::Result<Vec<Node<'d>>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a [`FieldFn`]
pub fn field_fn<F>(f: F) -> FieldFn
where
    F: for<'d> Fn(&ExtractionEnvironment<'d>, Node<'d>, Option<&Record>) -> anyhow::Result<Node<'d>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

#[derive(Clone)]
enum Strategy {
    /// selector → attribute → callback, each step optional
    Steps {
        selector: Option<SelectorExpr>,
        attribute: Option<String>,
        callback: Option<FieldFn>,
        list_callback: Option<ListFn>,
    },
    /// Nothing but a field name: key/attribute/column lookup by that name
    FieldKey(String),
}

/// Validated extractor, immutable once built
#[derive(Clone)]
pub struct FieldExtractor {
    field_name: Option<String>,
    strategy: Strategy,
}

impl std::fmt::Debug for FieldExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("FieldExtractor");
        s.field("field_name", &self.field_name);
        match &self.strategy {
            Strategy::Steps {
                selector,
                attribute,
                callback,
                list_callback,
            } => {
                s.field("selector", &selector.as_ref().map(SelectorExpr::as_str))
                    .field("attribute", attribute)
                    .field("callback", &callback.is_some())
                    .field("list_callback", &list_callback.is_some());
            }
            Strategy::FieldKey(key) => {
                s.field("key", key);
            }
        }
        s.finish()
    }
}

impl FieldExtractor {
    /// Start an extractor that writes into record field `name`
    pub fn field(name: impl Into<String>) -> ExtractorBuilder {
        ExtractorBuilder {
            field_name: Some(name.into()),
            ..ExtractorBuilder::default()
        }
    }

    /// Start an unnamed extractor (loop, iteration discovery, continuation)
    pub fn list() -> ExtractorBuilder {
        ExtractorBuilder::default()
    }

    pub fn field_name(&self) -> Option<&str> {
        self.field_name.as_deref()
    }

    /// Resolve a single value relative to `node`.
    ///
    /// A selector that matches nothing yields null; an attribute applies only
    /// to nodes that expose attributes. The callback sees whatever is left.
    pub fn extract_field<'d>(
        &self,
        env: &ExtractionEnvironment<'d>,
        node: Node<'d>,
        record: Option<&Record>,
    ) -> Result<Value, ExtractError> {
        let (selector, attribute, callback) = match &self.strategy {
            Strategy::FieldKey(name) => return Ok(node.key(name).into_value()),
            Strategy::Steps {
                selector,
                attribute,
                callback,
                ..
            } => (selector, attribute, callback),
        };

        let mut target = node;
        if let Some(selector) = selector {
            target = target.select_first(selector)?.unwrap_or_else(Node::null);
        }
        if let Some(attribute) = attribute {
            if let Some(value) = target.attr(attribute) {
                target = value;
            }
        }
        if let Some(callback) = callback {
            target = env
                .run(|env| callback(env, target, record))
                .map_err(|source| self.callback_error(source))?;
        }
        Ok(target.into_value())
    }

    /// Resolve a node list from the whole document.
    ///
    /// Without a selector the format's natural top-level sequence is used.
    pub fn extract_list<'d>(
        &self,
        env: &ExtractionEnvironment<'d>,
        document: &'d Document,
    ) -> Result<Vec<Node<'d>>, ExtractError> {
        match &self.strategy {
            Strategy::FieldKey(name) => Ok(expand(document.root().key(name))),
            Strategy::Steps {
                selector,
                list_callback,
                ..
            } => {
                let nodes = match selector {
                    Some(selector) => document.adapter().select_list(document, selector)?,
                    None => document.natural_list(),
                };
                match list_callback {
                    Some(callback) => env
                        .run(|env| callback(env, nodes))
                        .map_err(|source| self.callback_error(source)),
                    None => Ok(nodes),
                }
            }
        }
    }

    fn callback_error(&self, source: anyhow::Error) -> ExtractError {
        ExtractError::Callback {
            field: self.field_name.clone().unwrap_or_else(|| "list".to_string()),
            source,
        }
    }
}

/// Arrays become their elements; null becomes nothing
fn expand(node: Node<'_>) -> Vec<Node<'_>> {
    match node {
        Node::Json(Value::Array(items)) => items.iter().map(Node::Json).collect(),
        Node::Value(Value::Array(items)) => items.into_iter().map(Node::Value).collect(),
        n if n.is_null() => Vec::new(),
        n => vec![n],
    }
}

/// Collects extractor settings; [`ExtractorBuilder::build`] validates them
#[derive(Default)]
pub struct ExtractorBuilder {
    field_name: Option<String>,
    selector: Option<String>,
    attribute: Option<String>,
    callback: Option<FieldFn>,
    list_callback: Option<ListFn>,
}

impl ExtractorBuilder {
    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into()).filter(|s: &String| !s.trim().is_empty());
        self
    }

    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into()).filter(|s: &String| !s.is_empty());
        self
    }

    pub fn callback<F>(self, f: F) -> Self
    where
        F: for<'d> Fn(
                &ExtractionEnvironment<'d>,
                Node<'d>,
                Option<&Record>,
            ) -> anyhow::Result<Node<'d>>
            + Send
            + Sync
            + 'static,
    {
        self.callback_with(field_fn(f))
    }

    pub fn callback_with(mut self, f: FieldFn) -> Self {
        self.callback = Some(f);
        self
    }

    pub fn list_callback<F>(self, f: F) -> Self
    where
        F: for<'d> Fn(&ExtractionEnvironment<'d>, Vec<Node<'d>>) -> anyhow::Result<Vec<Node<'d>>>
            + Send
            + Sync
            + 'static,
    {
        self.list_callback_with(list_fn(f))
    }

    pub fn list_callback_with(mut self, f: ListFn) -> Self {
        self.list_callback = Some(f);
        self
    }

    pub fn build(self) -> Result<FieldExtractor, ScrapeError> {
        let has_steps = self.selector.is_some()
            || self.attribute.is_some()
            || self.callback.is_some()
            || self.list_callback.is_some();

        let strategy = if has_steps {
            Strategy::Steps {
                selector: self.selector.map(SelectorExpr::new),
                attribute: self.attribute,
                callback: self.callback,
                list_callback: self.list_callback,
            }
        } else if let Some(name) = self.field_name.clone().filter(|n| !n.is_empty()) {
            Strategy::FieldKey(name)
        } else {
            return Err(ScrapeError::InvalidExtractorConfig(
                "extractor needs a selector, attribute, callback or field name".to_string(),
            ));
        };

        Ok(FieldExtractor {
            field_name: self.field_name,
            strategy,
        })
    }
}
