//! Pageloop Core - declarative scraping of paginated and iterated sources
//!
//! A [`Scraper`] fetches one or more URL patterns, optionally iterating a
//! request parameter, parses each response as HTML, XML, JSON or CSV, and
//! turns every node matched by the loop extractor into a [`Record`].

pub mod dispatch;
pub mod document;
pub mod environment;
pub mod error;
pub mod extraction_loop;
pub mod extractor;
pub mod helpers;
pub mod hooks;
pub mod iteration;
pub mod logging;
pub mod progress;
pub mod record;
pub mod scraper;
pub mod stream;
mod xml;

// Re-exports for convenience
pub use dispatch::{Dispatcher, FixtureDispatcher, Request, Response};
pub use document::{Document, DocumentAdapter, Format, Node, SelectorExpr};
pub use environment::{ExtractionEnvironment, RunState};
pub use error::{ExtractError, ScrapeError};
pub use extraction_loop::ExtractionLoop;
pub use extractor::{ExtractorBuilder, FieldExtractor, FieldFn, ListFn};
pub use hooks::{HookArgs, HookEvent, HookRegistry};
pub use iteration::{IterationController, IterationSource, Phase, SourceKind};
pub use logging::init_logging;
pub use progress::{ProgressContext, RunLine, SharedProgress, fmt_num};
pub use record::Record;
pub use scraper::{ResponseFailure, RunSummary, Scraper, ScraperOptions};
pub use stream::{HttpConfig, HttpDispatcher, SHARED_RUNTIME, StreamError, http_config, set_http_config};
