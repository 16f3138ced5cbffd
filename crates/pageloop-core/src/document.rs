//! Parsed documents, the nodes inside them, and per-format adapters
//!
//! Three formats share one node model:
//! - HTML/XML: `scraper` DOM, CSS selectors
//! - JSON: `serde_json::Value`, dotted key paths (`query.items.0.id`)
//! - CSV: header row + data rows, selectors are column names or indices

use std::sync::OnceLock;

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use crate::error::ExtractError;

/// Document format, chosen by configuration or sniffed from the response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Html,
    Xml,
    Json,
    Csv,
}

impl Format {
    /// Parse config string into enum
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "html" => Some(Self::Html),
            "xml" => Some(Self::Xml),
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Xml => "xml",
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }

    /// Pick a format from the response content type, falling back to markup.
    ///
    /// Markup is XML when the body opens with an XML declaration, unless the
    /// content type says HTML (XHTML pages often carry one).
    pub fn detect(content_type: Option<&str>, body: &str) -> Self {
        let essence = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase());
        match essence.as_deref() {
            Some(ct) if ct.ends_with("json") => Self::Json,
            Some(ct) if ct.ends_with("csv") || ct.ends_with("comma-separated-values") => {
                Self::Csv
            }
            Some(ct) if ct.contains("html") => Self::Html,
            _ if body.trim_start().starts_with("<?xml") => Self::Xml,
            _ => Self::Html,
        }
    }

    pub fn adapter(self) -> &'static dyn DocumentAdapter {
        static HTML: MarkupAdapter = MarkupAdapter { xml: false };
        static XML: MarkupAdapter = MarkupAdapter { xml: true };
        match self {
            Self::Html => &HTML,
            Self::Xml => &XML,
            Self::Json => &JsonAdapter,
            Self::Csv => &CsvAdapter,
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Tabular document: header row plus data rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn column_index(&self, selector: &str) -> Option<usize> {
        column_index(&self.headers, selector)
    }
}

/// A parsed response body
#[derive(Debug)]
pub enum Document {
    Html(Html),
    Xml(Html),
    Json(Value),
    Csv(Table),
}

impl Document {
    pub fn format(&self) -> Format {
        match self {
            Self::Html(_) => Format::Html,
            Self::Xml(_) => Format::Xml,
            Self::Json(_) => Format::Json,
            Self::Csv(_) => Format::Csv,
        }
    }

    pub fn adapter(&self) -> &'static dyn DocumentAdapter {
        self.format().adapter()
    }

    /// Root node: the document element, the JSON root, or the whole table
    pub fn root(&self) -> Node<'_> {
        match self {
            Self::Html(html) | Self::Xml(html) => Node::Element(html.root_element()),
            Self::Json(value) => Node::Json(value),
            Self::Csv(table) => Node::Value(Value::Array(
                table
                    .rows
                    .iter()
                    .map(|cells| row_value(cells))
                    .collect(),
            )),
        }
    }

    /// Natural top-level sequence used when a list extractor has no selector
    pub fn natural_list(&self) -> Vec<Node<'_>> {
        match self {
            Self::Html(html) | Self::Xml(html) => vec![Node::Element(html.root_element())],
            Self::Json(Value::Array(items)) => items.iter().map(Node::Json).collect(),
            Self::Json(value) => vec![Node::Json(value)],
            Self::Csv(table) => table
                .rows
                .iter()
                .map(|cells| {
                    Node::Row(Row {
                        headers: &table.headers,
                        cells,
                    })
                })
                .collect(),
        }
    }
}

/// A CSV data row borrowed from its [`Table`]
#[derive(Debug, Clone, Copy)]
pub struct Row<'d> {
    headers: &'d [String],
    cells: &'d [String],
}

impl<'d> Row<'d> {
    pub fn get(&self, selector: &str) -> Option<&'d str> {
        column_index(self.headers, selector)
            .and_then(|i| self.cells.get(i))
            .map(String::as_str)
    }

    pub fn cells(&self) -> &'d [String] {
        self.cells
    }
}

/// A position inside a document, or a value produced by a callback
#[derive(Debug, Clone)]
pub enum Node<'d> {
    Element(ElementRef<'d>),
    Json(&'d Value),
    Row(Row<'d>),
    Value(Value),
}

impl<'d> Node<'d> {
    pub fn null() -> Self {
        Self::Value(Value::Null)
    }

    pub fn is_null(&self) -> bool {
        match *self {
            Self::Value(Value::Null) | Self::Json(Value::Null) => true,
            _ => false,
        }
    }

    pub fn as_element(&self) -> Option<ElementRef<'d>> {
        match *self {
            Self::Element(el) => Some(el),
            _ => None,
        }
    }

    /// Parent element (markup only)
    pub fn parent(&self) -> Option<Node<'d>> {
        self.as_element()?
            .parent()
            .and_then(ElementRef::wrap)
            .map(Node::Element)
    }

    /// Attribute lookup: element attribute, JSON object key, or CSV column.
    ///
    /// Returns `None` when the node does not expose attributes at all and
    /// `Some(null)` when it does but the attribute is missing.
    pub fn attr(&self, name: &str) -> Option<Node<'d>> {
        match *self {
            Self::Element(el) => Some(
                el.value()
                    .attr(name)
                    .map_or_else(Node::null, |v| Node::Value(Value::from(v))),
            ),
            Self::Json(Value::Object(map)) => {
                Some(map.get(name).map_or_else(Node::null, Node::Json))
            }
            Self::Value(Value::Object(ref map)) => Some(
                map.get(name)
                    .map_or_else(Node::null, |v| Node::Value(v.clone())),
            ),
            Self::Row(row) => Some(
                row.get(name)
                    .map_or_else(Node::null, |v| Node::Value(Value::from(v))),
            ),
            _ => None,
        }
    }

    /// Key lookup by name, null when missing or unsupported
    pub fn key(&self, name: &str) -> Node<'d> {
        self.attr(name).unwrap_or_else(Node::null)
    }

    /// First match of `selector` below this node, `None` when nothing matches
    pub fn select_first(&self, selector: &SelectorExpr) -> Result<Option<Node<'d>>, ExtractError> {
        Ok(match *self {
            Self::Element(el) => el.select(selector.css()?).next().map(Node::Element),
            Self::Json(value) => resolve_path(value, selector.as_str()).map(Node::Json),
            Self::Value(ref value) => {
                resolve_path(value, selector.as_str()).map(|v| Node::Value(v.clone()))
            }
            Self::Row(row) => row
                .get(selector.as_str())
                .map(|v| Node::Value(Value::from(v))),
        })
    }

    /// Text content for markup, string form for scalars
    pub fn text(&self) -> String {
        match *self {
            Self::Element(el) => el.text().collect(),
            Self::Json(value) => scalar_text(value),
            Self::Value(ref value) => scalar_text(value),
            Self::Row(row) => row.cells.join(","),
        }
    }

    /// Coerce to a record value: element text, JSON value, row cells
    pub fn into_value(self) -> Value {
        match self {
            Self::Element(el) => Value::String(el.text().collect()),
            Self::Json(value) => value.clone(),
            Self::Row(row) => row_value(row.cells),
            Self::Value(value) => value,
        }
    }
}

impl From<Value> for Node<'_> {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<String> for Node<'_> {
    fn from(s: String) -> Self {
        Self::Value(Value::String(s))
    }
}

impl From<&str> for Node<'_> {
    fn from(s: &str) -> Self {
        Self::Value(Value::from(s))
    }
}

/// Selector text plus its lazily compiled CSS form
#[derive(Debug)]
pub struct SelectorExpr {
    raw: String,
    css: OnceLock<Result<Selector, String>>,
}

impl SelectorExpr {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            css: OnceLock::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Compiled CSS selector (compiled once, reused across nodes)
    pub fn css(&self) -> Result<&Selector, ExtractError> {
        self.css
            .get_or_init(|| Selector::parse(&self.raw).map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|msg| ExtractError::selector(&self.raw, msg))
    }
}

impl Clone for SelectorExpr {
    fn clone(&self) -> Self {
        Self::new(self.raw.clone())
    }
}

/// Per-format parsing and document-level selection
pub trait DocumentAdapter: Send + Sync {
    fn format(&self) -> Format;

    fn parse(&self, raw: &str) -> Result<Document, ExtractError>;

    /// All nodes matching `selector` anywhere in the document
    fn select_list<'d>(
        &self,
        document: &'d Document,
        selector: &SelectorExpr,
    ) -> Result<Vec<Node<'d>>, ExtractError>;
}

/// HTML and XML through the `scraper` DOM; XML is built by [`crate::xml`]
pub struct MarkupAdapter {
    xml: bool,
}

impl DocumentAdapter for MarkupAdapter {
    fn format(&self) -> Format {
        if self.xml {
            Format::Xml
        } else {
            Format::Html
        }
    }

    fn parse(&self, raw: &str) -> Result<Document, ExtractError> {
        if self.xml {
            crate::xml::parse(raw).map(Document::Xml)
        } else {
            Ok(Document::Html(Html::parse_document(raw)))
        }
    }

    fn select_list<'d>(
        &self,
        document: &'d Document,
        selector: &SelectorExpr,
    ) -> Result<Vec<Node<'d>>, ExtractError> {
        match document {
            Document::Html(html) | Document::Xml(html) => {
                Ok(html.select(selector.css()?).map(Node::Element).collect())
            }
            other => Err(format_mismatch(self.format(), other)),
        }
    }
}

/// JSON through `serde_json`
pub struct JsonAdapter;

impl DocumentAdapter for JsonAdapter {
    fn format(&self) -> Format {
        Format::Json
    }

    fn parse(&self, raw: &str) -> Result<Document, ExtractError> {
        serde_json::from_str(raw)
            .map(Document::Json)
            .map_err(|e| ExtractError::parse("json", e))
    }

    /// Resolves the key path; arrays are expanded into their elements
    fn select_list<'d>(
        &self,
        document: &'d Document,
        selector: &SelectorExpr,
    ) -> Result<Vec<Node<'d>>, ExtractError> {
        let Document::Json(root) = document else {
            return Err(format_mismatch(Format::Json, document));
        };
        Ok(match resolve_path(root, selector.as_str()) {
            Some(Value::Array(items)) => items.iter().map(Node::Json).collect(),
            Some(value) => vec![Node::Json(value)],
            None => Vec::new(),
        })
    }
}

/// Comma-separated text through `csv`
pub struct CsvAdapter;

impl DocumentAdapter for CsvAdapter {
    fn format(&self) -> Format {
        Format::Csv
    }

    fn parse(&self, raw: &str) -> Result<Document, ExtractError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(raw.as_bytes());
        let headers = reader
            .headers()
            .map_err(|e| ExtractError::parse("csv", e))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let rows = reader
            .records()
            .map(|r| r.map(|rec| rec.iter().map(String::from).collect()))
            .collect::<Result<Vec<Vec<String>>, _>>()
            .map_err(|e| ExtractError::parse("csv", e))?;
        Ok(Document::Csv(Table { headers, rows }))
    }

    /// The selected column, one value node per data row; `*` selects whole rows
    fn select_list<'d>(
        &self,
        document: &'d Document,
        selector: &SelectorExpr,
    ) -> Result<Vec<Node<'d>>, ExtractError> {
        let Document::Csv(table) = document else {
            return Err(format_mismatch(Format::Csv, document));
        };
        if selector.as_str().trim() == "*" {
            return Ok(document.natural_list());
        }
        let Some(idx) = table.column_index(selector.as_str()) else {
            return Ok(Vec::new());
        };
        Ok(table
            .rows
            .iter()
            .filter_map(|cells| cells.get(idx))
            .map(|cell| Node::Value(Value::from(cell.as_str())))
            .collect())
    }
}

fn format_mismatch(expected: Format, document: &Document) -> ExtractError {
    ExtractError::Parse {
        format: expected.name(),
        message: format!("adapter cannot select from a {} document", document.format()),
    }
}

/// Walk a dotted key path; numeric segments index into arrays.
///
/// An empty path or `.` resolves to the value itself.
pub fn resolve_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let path = path.trim();
    if path.is_empty() || path == "." {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Header name first, then a zero-based column index
fn column_index(headers: &[String], selector: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h == selector)
        .or_else(|| selector.parse::<usize>().ok())
}

fn row_value(cells: &[String]) -> Value {
    Value::Array(cells.iter().map(|c| Value::from(c.as_str())).collect())
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML: &str = r#"
        <div class="entry">
          <p><a href="http://example.com">my dummy link</a></p>
        </div>
        <div class="entry exclude"></div>
        <div class="entry"></div>
    "#;

    #[test]
    fn detect_json_with_charset() {
        assert_eq!(
            Format::detect(Some("application/json; charset=utf-8"), "{}"),
            Format::Json
        );
        assert_eq!(
            Format::detect(Some("application/vnd.api+json"), "{}"),
            Format::Json
        );
    }

    #[test]
    fn detect_csv_variants() {
        assert_eq!(Format::detect(Some("text/csv"), "a,b"), Format::Csv);
        assert_eq!(
            Format::detect(Some("text/comma-separated-values"), "a,b"),
            Format::Csv
        );
    }

    #[test]
    fn detect_markup_default_and_xml_prologue() {
        assert_eq!(Format::detect(Some("text/html"), "<html>"), Format::Html);
        assert_eq!(Format::detect(None, "<p>hi</p>"), Format::Html);
        assert_eq!(
            Format::detect(Some("text/xml"), "  <?xml version=\"1.0\"?><feed/>"),
            Format::Xml
        );
        assert_eq!(
            Format::detect(Some("application/xhtml+xml"), "<?xml version=\"1.0\"?><html/>"),
            Format::Html
        );
    }

    #[test]
    fn xml_feed_items_keep_link_text() {
        let feed = r#"<?xml version="1.0"?>
<rss><channel>
  <item><title>T1</title><link>http://a.example/1</link></item>
  <item><title>T2</title><link>http://a.example/2</link></item>
</channel></rss>"#;
        let doc = Format::Xml.adapter().parse(feed).unwrap();
        let items = doc
            .adapter()
            .select_list(&doc, &SelectorExpr::new("item"))
            .unwrap();
        assert_eq!(items.len(), 2);
        let link = items[1]
            .select_first(&SelectorExpr::new("link"))
            .unwrap()
            .unwrap();
        assert_eq!(link.into_value(), Value::from("http://a.example/2"));
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        let err = Format::Xml.adapter().parse("<rss><item></rss>").unwrap_err();
        assert!(matches!(err, ExtractError::Parse { format: "xml", .. }));
    }

    #[test]
    fn from_name_roundtrip() {
        for f in [Format::Html, Format::Xml, Format::Json, Format::Csv] {
            assert_eq!(Format::from_name(f.name()), Some(f));
        }
        assert_eq!(Format::from_name("yaml"), None);
    }

    #[test]
    fn markup_select_list_in_document_order() {
        let doc = Format::Html.adapter().parse(HTML).unwrap();
        let nodes = doc
            .adapter()
            .select_list(&doc, &SelectorExpr::new("div.entry"))
            .unwrap();
        assert_eq!(nodes.len(), 3);
        assert!(nodes[0].text().contains("my dummy link"));
    }

    #[test]
    fn markup_invalid_selector_is_error() {
        let doc = Format::Html.adapter().parse(HTML).unwrap();
        let err = doc
            .adapter()
            .select_list(&doc, &SelectorExpr::new("div[[["))
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidSelector { .. }));
    }

    #[test]
    fn element_attr_and_parent() {
        let doc = Format::Html.adapter().parse(HTML).unwrap();
        let anchor = doc.root().select_first(&SelectorExpr::new("p a")).unwrap().unwrap();
        let href = anchor.attr("href").unwrap().into_value();
        assert_eq!(href, Value::from("http://example.com"));
        assert!(anchor.attr("title").unwrap().is_null());

        let parent = anchor.parent().unwrap();
        assert_eq!(parent.as_element().unwrap().value().name(), "p");
    }

    #[test]
    fn json_path_resolution() {
        let doc = JsonAdapter
            .parse(r#"{"query": {"items": [{"id": 1}, {"id": 2}]}}"#)
            .unwrap();
        let items = JsonAdapter
            .select_list(&doc, &SelectorExpr::new("query.items"))
            .unwrap();
        assert_eq!(items.len(), 2);
        let second = doc
            .root()
            .select_first(&SelectorExpr::new("query.items.1.id"))
            .unwrap()
            .unwrap();
        assert_eq!(second.into_value(), Value::from(2));
        assert!(doc
            .root()
            .select_first(&SelectorExpr::new("query.nope"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn json_natural_list_expands_top_level_array() {
        let doc = JsonAdapter.parse("[1, 2, 3]").unwrap();
        assert_eq!(doc.natural_list().len(), 3);
        let doc = JsonAdapter.parse(r#"{"a": 1}"#).unwrap();
        assert_eq!(doc.natural_list().len(), 1);
    }

    #[test]
    fn json_parse_error() {
        let err = JsonAdapter.parse("{not json").unwrap_err();
        assert!(matches!(err, ExtractError::Parse { format: "json", .. }));
    }

    #[test]
    fn csv_rows_keyed_by_header_or_index() {
        let doc = CsvAdapter.parse("name,age\nada,36\ngrace,85\n").unwrap();
        let rows = doc.natural_list();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].key("name").into_value(), Value::from("grace"));
        assert_eq!(rows[0].key("1").into_value(), Value::from("36"));
        assert!(rows[0].key("missing").is_null());
    }

    #[test]
    fn csv_select_list_takes_column() {
        let doc = CsvAdapter.parse("page\n2\n3\n").unwrap();
        let pages: Vec<String> = CsvAdapter
            .select_list(&doc, &SelectorExpr::new("page"))
            .unwrap()
            .iter()
            .map(Node::text)
            .collect();
        assert_eq!(pages, vec!["2", "3"]);
    }

    #[test]
    fn csv_star_selects_rows() {
        let doc = CsvAdapter.parse("name,age\nada,36\ngrace,85\n").unwrap();
        let rows = CsvAdapter.select_list(&doc, &SelectorExpr::new("*")).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key("age").into_value(), Value::from("36"));
    }

    #[test]
    fn adapter_rejects_foreign_document() {
        let doc = JsonAdapter.parse("{}").unwrap();
        let err = CsvAdapter
            .select_list(&doc, &SelectorExpr::new("a"))
            .unwrap_err();
        assert!(format!("{err}").contains("json document"));
    }

    #[test]
    fn resolve_path_empty_is_identity() {
        let v = serde_json::json!({"a": 1});
        assert_eq!(resolve_path(&v, ""), Some(&v));
        assert_eq!(resolve_path(&v, "."), Some(&v));
    }
}
