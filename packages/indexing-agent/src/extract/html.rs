//! HTML decoding and cleaning.

use std::io::Read;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::GzDecoder;
use scraper::{Html, Node, Selector};

use crate::error::ExtractError;
use crate::types::{ENCODING_GZIP_BASE64, ENCODING_PLAIN};

/// Elements whose text is never part of the document body.
const SKIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "template", "nav", "footer", "header", "aside",
];

/// Decode an HTML blob according to its transport encoding.
///
/// `plain` (or an empty encoding) passes the blob through; `gzip+base64`
/// is base64-decoded then gunzipped. Anything else is rejected.
pub fn decompress(blob: &str, encoding: &str) -> Result<String, ExtractError> {
    if blob.is_empty() || encoding.is_empty() || encoding.eq_ignore_ascii_case(ENCODING_PLAIN) {
        return Ok(blob.to_string());
    }

    if !encoding.eq_ignore_ascii_case(ENCODING_GZIP_BASE64) {
        return Err(ExtractError::UnknownEncoding(encoding.to_string()));
    }

    let compressed = STANDARD.decode(blob.trim())?;
    let mut html = String::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_string(&mut html)
        .map_err(ExtractError::Decompress)?;

    Ok(html)
}

/// Extract readable text from HTML.
///
/// Drops scripts, styles and page chrome (nav, header, footer, aside), then
/// joins the remaining text nodes with single spaces.
pub fn clean_to_plain_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let document = Html::parse_document(html);
    let mut words: Vec<&str> = Vec::new();

    for node in document.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };

        let skipped = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| SKIPPED_ELEMENTS.contains(&el.name()))
        });
        if skipped {
            continue;
        }

        words.extend(text.split_whitespace());
    }

    words.join(" ")
}

/// Extract the page title, if any.
pub fn extract_title(html: &str) -> Option<String> {
    if html.trim().is_empty() {
        return None;
    }

    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}
