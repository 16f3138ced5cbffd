//! Error types for scraper configuration and per-response extraction

/// Failure while extracting data from a single response.
///
/// Aborts extraction for the current response only; other responses in the
/// same run keep going.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// Response body could not be parsed in the selected format
    #[error("cannot parse {format} document: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },
    /// Selector expression rejected by the selector engine
    #[error("invalid selector {selector:?}: {message}")]
    InvalidSelector { selector: String, message: String },
    /// A field or list callback returned an error
    #[error("callback for {field} failed: {source:#}")]
    Callback {
        field: String,
        #[source]
        source: anyhow::Error,
    },
    /// A hook handler returned an error
    #[error("{event} hook failed: {source:#}")]
    HookFailed {
        event: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl ExtractError {
    pub(crate) fn parse(format: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Parse {
            format,
            message: err.to_string(),
        }
    }

    pub(crate) fn selector(selector: &str, err: impl std::fmt::Display) -> Self {
        Self::InvalidSelector {
            selector: selector.to_string(),
            message: err.to_string(),
        }
    }
}

/// Errors that stop a scraper before or while it runs.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    /// Extractor has no selector, attribute, callback or field name
    #[error("invalid extractor config: {0}")]
    InvalidExtractorConfig(String),

    /// `run()` called without a loop extractor
    #[error("no loop extractor configured (call loop_on first)")]
    MissingLoopExtractor,

    /// Async dispatch combined with an iteration source that depends on previous responses
    #[error("async dispatch is only supported for static iteration sets, not {0} iteration")]
    UnsupportedAsyncIteration(&'static str),

    /// Extraction failure surfaced outside a scraper run
    #[error(transparent)]
    Extraction(#[from] ExtractError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display_names_format() {
        let err = ExtractError::parse("json", "expected value at line 1 column 1");
        let msg = format!("{err}");
        assert!(msg.contains("json"));
        assert!(msg.contains("line 1"));
    }

    #[test]
    fn selector_error_display_quotes_selector() {
        let err = ExtractError::selector("div[", "unexpected end of input");
        assert_eq!(
            format!("{err}"),
            "invalid selector \"div[\": unexpected end of input"
        );
    }

    #[test]
    fn callback_error_keeps_source_chain() {
        let err = ExtractError::Callback {
            field: "title".to_string(),
            source: anyhow::anyhow!("boom").context("while mapping"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("title"));
        assert!(msg.contains("while mapping"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn unsupported_async_display() {
        let err = ScrapeError::UnsupportedAsyncIteration("continuation");
        assert!(format!("{err}").contains("continuation"));
    }

    #[test]
    fn extraction_error_is_transparent() {
        let err: ScrapeError = ExtractError::parse("csv", "bad row").into();
        assert_eq!(format!("{err}"), "cannot parse csv document: bad row");
    }
}
