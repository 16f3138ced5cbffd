//! Ready-made list callbacks

use reqwest::Url;

use crate::document::Node;
use crate::extractor::{list_fn, ListFn};

/// Collect distinct values of query parameter `param` from the `href` of
/// each node, in first-seen order.
///
/// Relative links are resolved against a dummy base so their query still parses.
pub fn values_for_param(param: &str) -> ListFn {
    let param = param.to_string();
    list_fn(move |_env, nodes| {
        let base = Url::parse("http://localhost/")?;
        let mut values: Vec<String> = Vec::new();
        for node in &nodes {
            let Some(href) = node.attr("href").filter(|n| !n.is_null()) else {
                continue;
            };
            let Ok(url) = base.join(&href.text()) else {
                log::debug!("skipping unparsable href {:?}", href.text());
                continue;
            };
            for (key, value) in url.query_pairs() {
                if key == param.as_str() && !values.iter().any(|v| *v == value) {
                    values.push(value.into_owned());
                }
            }
        }
        Ok(values.into_iter().map(Node::from).collect())
    })
}

/// Replace each node by its parent element, dropping nodes without one
pub fn parents() -> ListFn {
    list_fn(|_env, nodes| Ok(nodes.iter().filter_map(Node::parent).collect()))
}
