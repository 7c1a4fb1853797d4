use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_8};
use html_escape::decode_html_entities;
use quick_xml::encoding::Decoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use super::types::{Article, FeedFormat, FeedSource};
use super::{atom, rdf, rss};

/// Namespace of Atom elements, including `atom:link` inside RSS items.
pub(crate) const ATOM_NS: &[u8] = b"http://www.w3.org/2005/Atom";

/// Errors that end processing of a single feed body.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The declared charset is unknown or the body is not valid in it
    #[error("Encoding error: {0}")]
    Encoding(String),
    /// The body is not well-formed XML
    #[error("Malformed XML: {0}")]
    Xml(String),
    /// Parsing succeeded but no item had both a title and a link
    #[error("No articles found in feed")]
    NoArticles,
}

impl From<quick_xml::Error> for ParseError {
    fn from(e: quick_xml::Error) -> Self {
        ParseError::Xml(e.to_string())
    }
}

/// Parses a feed body into canonical articles using the parser variant
/// selected by the source's format.
///
/// Items missing a title or link are skipped. A body that yields no
/// articles at all is an error ([`ParseError::NoArticles`]), which keeps
/// "fetched but empty" apart from "nothing new since last run".
pub fn parse(body: &[u8], source: &FeedSource) -> Result<Vec<Article>, ParseError> {
    let xml = decode_body(body)?;

    let articles = match source.format() {
        FeedFormat::Rss => rss::parse_rss(&xml, source)?,
        FeedFormat::AtomReddit => atom::parse_atom(&xml, source)?,
        FeedFormat::SlashdotRdf => rdf::parse_rdf(&xml, source)?,
    };

    if articles.is_empty() {
        return Err(ParseError::NoArticles);
    }

    Ok(articles)
}

// ============================================================================
// Identity
// ============================================================================

/// Builds the canonical GUID for an item.
///
/// A stable identifier is namespaced by the header prefix (when there is
/// one). Without an identifier the link itself is the GUID, deliberately
/// unprefixed so it survives header renames. Returns `None` when neither
/// is available.
pub(crate) fn canonical_guid(prefix: &str, identifier: &str, link: &str) -> Option<String> {
    let identifier = identifier.trim();
    if !identifier.is_empty() {
        return Some(if prefix.is_empty() {
            identifier.to_owned()
        } else {
            format!("{prefix}:{identifier}")
        });
    }

    let link = link.trim();
    (!link.is_empty()).then(|| link.to_owned())
}

// ============================================================================
// Charset Handling
// ============================================================================

/// Decodes a feed body to UTF-8.
///
/// A byte-order mark wins; otherwise the charset named in the XML
/// declaration is used, defaulting to UTF-8. Unknown charsets and bytes
/// that are invalid in the chosen charset are errors.
pub(crate) fn decode_body(body: &[u8]) -> Result<Cow<'_, str>, ParseError> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(body) {
        return decode_with(encoding, &body[bom_len..]);
    }

    let encoding = match declared_encoding(body) {
        Some(label) => Encoding::for_label(label.as_bytes())
            // A UTF-16 label without a BOM on an ASCII-readable declaration
            // means the body is really UTF-8
            .map(Encoding::output_encoding)
            .ok_or_else(|| ParseError::Encoding(format!("unsupported charset {label:?}")))?,
        None => UTF_8,
    };

    decode_with(encoding, body)
}

fn decode_with<'a>(
    encoding: &'static Encoding,
    bytes: &'a [u8],
) -> Result<Cow<'a, str>, ParseError> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .ok_or_else(|| ParseError::Encoding(format!("body is not valid {}", encoding.name())))
}

/// Reads the `encoding` pseudo-attribute of a leading `<?xml ...?>`.
///
/// Only whitespace may precede the declaration; any other first event
/// means there is none.
fn declared_encoding(body: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(body);
    loop {
        match reader.read_event().ok()? {
            Event::Decl(decl) => {
                let label = decl.encoding()?.ok()?;
                return Some(String::from_utf8_lossy(&label).trim().to_owned());
            }
            Event::Text(text) if text.iter().all(|b| b.is_ascii_whitespace()) => {}
            _ => return None,
        }
    }
}

// ============================================================================
// XML Helpers
// ============================================================================

/// Local (namespace-stripped) name of an element.
pub(crate) fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Value of the attribute whose local name is `key`.
pub(crate) fn attribute(e: &BytesStart<'_>, decoder: Decoder, key: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(|attr| match attr {
            Ok(attr) => Some(attr),
            Err(err) => {
                tracing::debug!(error = %err, "Skipping malformed feed attribute");
                None
            }
        })
        .find(|attr| attr.key.local_name().as_ref() == key)
        .and_then(|attr| attr.decode_and_unescape_value(decoder).ok())
        .map(Cow::into_owned)
}

/// Character data carried by a text or CDATA event.
///
/// Entities outside the XML builtins (`&nbsp;` and friends are common in
/// feeds) are decoded as HTML instead of failing the feed.
pub(crate) fn event_text(event: &Event<'_>) -> Option<String> {
    match event {
        Event::Text(e) => Some(match e.unescape() {
            Ok(text) => text.into_owned(),
            Err(_) => decode_html_entities(&String::from_utf8_lossy(e)).into_owned(),
        }),
        Event::CData(e) => Some(String::from_utf8_lossy(e).into_owned()),
        _ => None,
    }
}
