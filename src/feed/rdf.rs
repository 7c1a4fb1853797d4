use html_escape::decode_html_entities;
use quick_xml::events::Event;
use quick_xml::Reader;

use super::parser::{event_text, local_name, ParseError};
use super::types::{Article, FeedSource};

#[derive(Debug, Clone, Copy)]
enum Field {
    Title,
    Link,
}

#[derive(Debug, Default)]
struct RawItem {
    title: String,
    link: String,
}

impl RawItem {
    fn field_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
        }
    }

    /// Legacy RDF items carry no identifier: the link is the GUID, unprefixed.
    fn into_article(self, source: &FeedSource) -> Option<Article> {
        let title = decode_html_entities(self.title.trim()).trim().to_owned();
        let link = self.link.trim();
        if title.is_empty() || link.is_empty() {
            return None;
        }

        Some(Article {
            guid: link.to_owned(),
            title,
            header: source.header.clone(),
            link: link.to_owned(),
        })
    }
}

/// Parses a Slashdot-style RSS 1.0 document, where `item` elements are
/// direct children of `rdf:RDF`.
pub(super) fn parse_rdf(xml: &str, source: &FeedSource) -> Result<Vec<Article>, ParseError> {
    let mut reader = Reader::from_str(xml);

    let mut depth = 0usize;
    let mut item: Option<RawItem> = None;
    let mut field: Option<Field> = None;
    let mut articles = Vec::new();

    loop {
        let event = reader.read_event()?;

        match &event {
            Event::Start(e) => {
                let unprefixed = e.name().prefix().is_none();
                match (depth, local_name(e).as_str()) {
                    (1, "item") => item = Some(RawItem::default()),
                    (2, name) if unprefixed => {
                        field = match name {
                            "title" => Some(Field::Title),
                            "link" => Some(Field::Link),
                            _ => None,
                        };
                        // A repeated element replaces the earlier value
                        if let (Some(raw), Some(field)) = (item.as_mut(), field) {
                            raw.field_mut(field).clear();
                        }
                    }
                    _ => {}
                }
                depth += 1;
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                match depth {
                    2 => field = None,
                    1 => {
                        if let Some(article) = item.take().and_then(|raw| raw.into_article(source)) {
                            articles.push(article);
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            other => {
                if depth == 3 {
                    if let (Some(raw), Some(field), Some(text)) =
                        (item.as_mut(), field, event_text(other))
                    {
                        raw.field_mut(field).push_str(&text);
                    }
                }
            }
        }
    }

    Ok(articles)
}
