//! XML into the `scraper` DOM.
//!
//! quick-xml does the parsing, so element names never pick up HTML
//! semantics (`<link>` in a feed keeps its text). The resulting tree is a
//! plain `Html` value and takes the same CSS selectors as HTML documents.
//! Element names are local names (`dc:creator` → `creator`); attribute
//! names are kept as written.

use html5ever::tendril::StrTendril;
use html5ever::tree_builder::{ElementFlags, NodeOrText, TreeSink};
use html5ever::{Attribute, LocalName, Namespace, QualName};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use scraper::Html;

use crate::error::ExtractError;

fn xml_error(err: impl std::fmt::Display) -> ExtractError {
    ExtractError::parse("xml", err)
}

fn qual_name(local: &str) -> QualName {
    QualName::new(None, Namespace::from(""), LocalName::from(local))
}

fn create_element(html: &mut Html, start: &BytesStart<'_>) -> Result<<Html as TreeSink>::Handle, ExtractError> {
    let name = std::str::from_utf8(start.local_name().as_ref())
        .map_err(xml_error)?
        .to_string();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(xml_error)?;
        let key = std::str::from_utf8(attr.key.as_ref()).map_err(xml_error)?;
        let value = attr.unescape_value().map_err(xml_error)?;
        attrs.push(Attribute {
            name: qual_name(key),
            value: StrTendril::from_slice(&value),
        });
    }
    Ok(html.create_element(qual_name(&name), attrs, ElementFlags::default()))
}

/// Parse an XML document; text is kept exactly as written
pub(crate) fn parse(raw: &str) -> Result<Html, ExtractError> {
    let mut reader = Reader::from_str(raw);
    reader.config_mut().trim_text(false);

    let mut html = Html::new_document();
    let document = html.get_document();
    let mut open = vec![document];
    let mut has_root = false;

    loop {
        let parent = open.last().copied().unwrap_or(document);
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => {
                let element = create_element(&mut html, &e)?;
                html.append(&parent, NodeOrText::AppendNode(element));
                open.push(element);
                has_root = true;
            }
            Event::Empty(e) => {
                let element = create_element(&mut html, &e)?;
                html.append(&parent, NodeOrText::AppendNode(element));
                has_root = true;
            }
            Event::End(_) => {
                if open.len() > 1 {
                    open.pop();
                }
            }
            // Text outside the root element is ignored
            Event::Text(e) if open.len() > 1 => {
                let text = e.unescape().map_err(xml_error)?;
                if !text.is_empty() {
                    html.append(&parent, NodeOrText::AppendText(StrTendril::from_slice(&text)));
                }
            }
            Event::CData(e) if open.len() > 1 => {
                let text = std::str::from_utf8(&e).map_err(xml_error)?;
                html.append(&parent, NodeOrText::AppendText(StrTendril::from_slice(text)));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !has_root {
        return Err(xml_error("no root element"));
    }
    if open.len() > 1 {
        return Err(xml_error("unexpected end of document"));
    }
    Ok(html)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Selector;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Example feed</title>
    <item>
      <title>First &amp; foremost</title>
      <link>http://a.example/1</link>
      <dc:creator>Ann</dc:creator>
      <enclosure url="http://a.example/1.mp3" length="12"/>
    </item>
    <item>
      <title><![CDATA[Second <b>bold</b>]]></title>
      <link>http://a.example/2</link>
    </item>
  </channel>
</rss>"#;

    fn texts(html: &Html, css: &str) -> Vec<String> {
        let selector = Selector::parse(css).unwrap();
        html.select(&selector)
            .map(|el| el.text().collect::<String>())
            .collect()
    }

    #[test]
    fn link_elements_keep_their_text() {
        let html = parse(FEED).unwrap();
        assert_eq!(texts(&html, "item link"), vec!["http://a.example/1", "http://a.example/2"]);
    }

    #[test]
    fn entities_and_cdata_become_text() {
        let html = parse(FEED).unwrap();
        assert_eq!(
            texts(&html, "item title"),
            vec!["First & foremost", "Second <b>bold</b>"]
        );
    }

    #[test]
    fn prefixed_elements_match_by_local_name() {
        let html = parse(FEED).unwrap();
        assert_eq!(texts(&html, "creator"), vec!["Ann"]);
    }

    #[test]
    fn empty_element_attributes() {
        let html = parse(FEED).unwrap();
        let selector = Selector::parse("enclosure").unwrap();
        let enclosure = html.select(&selector).next().unwrap();
        assert_eq!(enclosure.value().attr("url"), Some("http://a.example/1.mp3"));
        assert_eq!(html.root_element().value().name(), "rss");
        assert_eq!(html.root_element().value().attr("xmlns:dc"), Some("http://purl.org/dc/elements/1.1/"));
    }

    #[test]
    fn mismatched_tags_are_rejected() {
        let err = parse("<a><b></a>").unwrap_err();
        assert!(format!("{err}").starts_with("cannot parse xml document"));
    }

    #[test]
    fn missing_root_is_rejected() {
        assert!(parse("<?xml version=\"1.0\"?>").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn unclosed_root_is_rejected() {
        assert!(parse("<feed><entry>x</entry>").is_err());
    }
}
