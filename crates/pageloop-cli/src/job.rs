//! Job files: a declarative scraper described in TOML

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

use pageloop_core::helpers;
use pageloop_core::iteration::param_value;
use pageloop_core::{ExtractorBuilder, FieldExtractor, Format, Scraper};

use crate::config::{deserialize_env_var, Config};

/// Top-level job file
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub urls: Vec<String>,
    /// html, xml, json or csv; sniffed per response when absent
    pub format: Option<String>,
    #[serde(default, rename = "async")]
    pub async_mode: bool,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, HeaderValue>,
    #[serde(default)]
    pub vars: Map<String, Value>,
    #[serde(rename = "loop")]
    pub loop_on: LoopSpec,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    pub iteration: Option<IterationSpec>,
}

/// Header value, `${VAR}` expanded at load time
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderValue(#[serde(deserialize_with = "deserialize_env_var")] pub Option<String>);

#[derive(Debug, Clone, Deserialize)]
pub struct LoopSpec {
    pub selector: Option<String>,
    /// `parent`: replace every matched node by its parent element
    pub map: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub selector: Option<String>,
    pub attribute: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IterationSpec {
    pub param: String,
    pub default: Option<String>,
    pub values: Option<Vec<Value>>,
    pub range: Option<RangeSpec>,
    pub extract: Option<ExtractSpec>,
    #[serde(rename = "continue")]
    pub continuation: Option<ContinueSpec>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RangeSpec {
    pub start: i64,
    /// Inclusive
    pub end: i64,
    #[serde(default = "default_step")]
    pub step: i64,
}

fn default_step() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractSpec {
    pub selector: String,
    pub attribute: Option<String>,
    /// Read this query parameter from each node's href
    pub values_for_param: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContinueSpec {
    pub selector: Option<String>,
    pub attribute: Option<String>,
}

impl Job {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read job file: {}", path.display()))?;
        let job: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse job file: {}", path.display()))?;
        Ok(job)
    }

    /// Structural checks the TOML schema cannot express
    pub fn validate(&self) -> Result<()> {
        if self.urls.is_empty() {
            anyhow::bail!("job has no urls");
        }
        if let Some(format) = &self.format {
            if Format::from_name(format).is_none() {
                anyhow::bail!("unknown format {format:?} (expected html, xml, json or csv)");
            }
        }
        if let Some(map) = &self.loop_on.map {
            if map != "parent" {
                anyhow::bail!("unknown loop map {map:?} (only \"parent\" is supported)");
            }
        }
        if let Some(iteration) = &self.iteration {
            let sources = [
                iteration.values.is_some(),
                iteration.range.is_some(),
                iteration.extract.is_some(),
                iteration.continuation.is_some(),
            ]
            .iter()
            .filter(|set| **set)
            .count();
            if sources != 1 {
                anyhow::bail!(
                    "[iteration] needs exactly one of values, range, extract, continue (found {sources})"
                );
            }
            if let Some(range) = iteration.range {
                if range.step <= 0 {
                    anyhow::bail!("[iteration] range step must be positive");
                }
            }
        }
        Ok(())
    }

    /// Build the scraper; HTTP settings from `config`, job headers win
    pub fn into_scraper(self, config: &Config) -> Result<Scraper> {
        self.validate()?;

        let mut scraper = Scraper::new(self.urls).async_mode(self.async_mode);
        if let Some(format) = self.format.as_deref().and_then(Format::from_name) {
            scraper = scraper.format(format);
        }
        if let Some(agent) = &config.http.user_agent {
            scraper = scraper.header("User-Agent", agent.clone());
        }
        for (name, value) in self.headers {
            match value.0 {
                Some(value) => scraper = scraper.header(name, value),
                None => log::warn!("header {name} skipped: environment variable not set"),
            }
        }
        for (key, value) in self.params {
            scraper = scraper.param(key, value);
        }
        for (name, value) in self.vars {
            scraper = scraper.var(name, value);
        }

        scraper = scraper.loop_on(loop_extractor(&self.loop_on).context("invalid [loop]")?);
        for field in &self.fields {
            let extractor = steps(FieldExtractor::field(&field.name), &field.selector, &field.attribute)
                .build()
                .with_context(|| format!("invalid field {:?}", field.name))?;
            scraper = scraper.extract(extractor);
        }

        if let Some(iteration) = self.iteration {
            scraper = apply_iteration(scraper, iteration)?;
        }
        Ok(scraper)
    }
}

fn steps(
    builder: ExtractorBuilder,
    selector: &Option<String>,
    attribute: &Option<String>,
) -> ExtractorBuilder {
    let builder = match selector {
        Some(selector) => builder.selector(selector.clone()),
        None => builder,
    };
    match attribute {
        Some(attribute) => builder.attribute(attribute.clone()),
        None => builder,
    }
}

fn loop_extractor(spec: &LoopSpec) -> Result<FieldExtractor> {
    let builder = steps(FieldExtractor::list(), &spec.selector, &None);
    let builder = match spec.map.as_deref() {
        Some("parent") => builder.list_callback_with(helpers::parents()),
        _ => builder,
    };
    Ok(builder.build()?)
}

fn apply_iteration(scraper: Scraper, spec: IterationSpec) -> Result<Scraper> {
    let param = spec.param;
    let scraper = if let Some(values) = spec.values {
        scraper.set_iteration(param, values.iter().filter_map(param_value))
    } else if let Some(range) = spec.range {
        let values = (range.start..=range.end).step_by(range.step as usize);
        scraper.set_iteration(param, values)
    } else if let Some(extract) = spec.extract {
        let builder = FieldExtractor::list().selector(extract.selector);
        let builder = match (extract.values_for_param, extract.attribute) {
            (Some(query_param), _) => {
                builder.list_callback_with(helpers::values_for_param(&query_param))
            }
            (None, Some(attribute)) => builder.list_callback(move |_env, nodes| {
                Ok(nodes.iter().map(|node| node.key(&attribute)).collect())
            }),
            (None, None) => builder,
        };
        let extractor = builder.build().context("invalid [iteration.extract]")?;
        scraper.set_iteration_extractor(param, extractor)
    } else if let Some(cont) = spec.continuation {
        let extractor = steps(FieldExtractor::list(), &cont.selector, &cont.attribute)
            .build()
            .context("invalid [iteration.continue]")?;
        scraper.continue_with(param, extractor)
    } else {
        anyhow::bail!("[iteration] has no value source");
    };
    Ok(match spec.default {
        Some(default) => scraper.iteration_default(default),
        None => scraper,
    })
}
