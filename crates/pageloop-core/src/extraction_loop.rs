//! Per-document loop: select nodes, build one record per node, fire hooks

use crate::document::Document;
use crate::environment::ExtractionEnvironment;
use crate::error::ExtractError;
use crate::extractor::FieldExtractor;
use crate::hooks::{HookArgs, HookRegistry};
use crate::record::Record;

/// Borrowed view of the scraper configuration needed to process one document
pub struct ExtractionLoop<'s> {
    loop_extractor: &'s FieldExtractor,
    extractors: &'s [FieldExtractor],
    hooks: &'s HookRegistry,
}

impl<'s> ExtractionLoop<'s> {
    pub fn new(
        loop_extractor: &'s FieldExtractor,
        extractors: &'s [FieldExtractor],
        hooks: &'s HookRegistry,
    ) -> Self {
        Self {
            loop_extractor,
            extractors,
            hooks,
        }
    }

    /// Run the loop over `document`.
    ///
    /// Records come back in node order, fields in extractor order. Any
    /// extractor or hook failure aborts the whole document with no partial
    /// result.
    pub fn run<'d>(
        &self,
        env: &ExtractionEnvironment<'d>,
        document: &'d Document,
    ) -> Result<Vec<Record>, ExtractError> {
        self.hooks.dispatch(env, HookArgs::Before(document))?;

        let nodes = self.loop_extractor.extract_list(env, document)?;
        log::debug!("loop selected {} nodes", nodes.len());

        let mut records = Vec::with_capacity(nodes.len());
        for node in nodes {
            self.hooks.dispatch(env, HookArgs::BeforeExtract(&node))?;

            let mut record = Record::new();
            for extractor in self.extractors {
                let value = extractor.extract_field(env, node.clone(), Some(&record))?;
                record.insert(extractor.field_name().unwrap_or_default(), value);
            }

            self.hooks
                .dispatch(env, HookArgs::AfterExtract(&node, &record))?;
            records.push(record);
        }

        self.hooks.dispatch(env, HookArgs::After(&records))?;
        Ok(records)
    }
}
