use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;

use super::parser::{attribute, canonical_guid, event_text, local_name, ParseError, ATOM_NS};
use super::types::{Article, FeedSource};

/// Namespace class of an element inside an RSS item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ns {
    None,
    Atom,
    Other,
}

impl Ns {
    fn classify(resolved: &ResolveResult<'_>) -> Self {
        match resolved {
            ResolveResult::Bound(Namespace(ns)) if *ns == ATOM_NS => Ns::Atom,
            ResolveResult::Bound(_) => Ns::Other,
            _ => Ns::None,
        }
    }

    /// Unprefixed elements count as plain RSS even under a default namespace.
    fn of_element(self, e: &BytesStart<'_>) -> Self {
        if e.name().prefix().is_none() {
            Ns::None
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Title,
    Link,
    Guid,
    ItemId,
}

#[derive(Debug, Default)]
struct RawItem {
    title: String,
    link: String,
    atom_link: String,
    guid: String,
    item_id: String,
}

impl RawItem {
    fn field_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::Guid => &mut self.guid,
            Field::ItemId => &mut self.item_id,
        }
    }

    /// Resolves link and GUID. Items without a title or any link are dropped.
    fn into_article(self, source: &FeedSource, prefix: &str) -> Option<Article> {
        let title = self.title.trim();

        // Link priority: <link>, then <atom:link href>, then <guid>
        let link = [&self.link, &self.atom_link, &self.guid]
            .into_iter()
            .map(|candidate| candidate.trim())
            .find(|candidate| !candidate.is_empty())?;

        if title.is_empty() {
            return None;
        }

        let identifier = [&self.guid, &self.item_id]
            .into_iter()
            .map(|candidate| candidate.trim())
            .find(|candidate| !candidate.is_empty())
            .unwrap_or_default();

        Some(Article {
            guid: canonical_guid(prefix, identifier, link)?,
            title: title.to_owned(),
            header: source.header.clone(),
            link: link.to_owned(),
        })
    }
}

/// Maps a child element of `<item>` to the field it fills.
fn item_field(name: &str, ns: Ns) -> Option<Field> {
    match (name, ns) {
        ("title", Ns::None) => Some(Field::Title),
        ("link", Ns::None) => Some(Field::Link),
        ("guid", Ns::None) => Some(Field::Guid),
        ("itemID", _) => Some(Field::ItemId),
        _ => None,
    }
}

/// Parses an RSS 2.0 document (`rss/channel/item`).
pub(super) fn parse_rss(xml: &str, source: &FeedSource) -> Result<Vec<Article>, ParseError> {
    let mut reader = NsReader::from_str(xml);
    let prefix = source.guid_prefix();

    let mut path: Vec<String> = Vec::new();
    let mut item: Option<RawItem> = None;
    let mut field: Option<Field> = None;
    let mut articles = Vec::new();
    let mut skipped = 0usize;

    loop {
        let (ns, event) = match reader.read_resolved_event() {
            Ok((resolved, event)) => (Ns::classify(&resolved), event),
            Err(e) => return Err(e.into()),
        };

        match &event {
            Event::Start(e) => {
                let name = local_name(e);
                let ns = ns.of_element(e);
                if path.len() == 2 && path[1] == "channel" && name == "item" {
                    item = Some(RawItem::default());
                } else if path.len() == 3 {
                    if let Some(raw) = item.as_mut() {
                        field = item_field(&name, ns);
                        // A repeated element replaces the earlier value
                        if let Some(field) = field {
                            raw.field_mut(field).clear();
                        }
                        if name == "link" && ns == Ns::Atom && raw.atom_link.is_empty() {
                            raw.atom_link = attribute(e, reader.decoder(), b"href").unwrap_or_default();
                        }
                    }
                }
                path.push(name);
            }
            Event::Empty(e) => {
                if path.len() == 3 && ns.of_element(e) == Ns::Atom && local_name(e) == "link" {
                    if let Some(raw) = item.as_mut().filter(|raw| raw.atom_link.is_empty()) {
                        raw.atom_link = attribute(e, reader.decoder(), b"href").unwrap_or_default();
                    }
                }
            }
            Event::End(_) => {
                path.pop();
                match path.len() {
                    3 => field = None,
                    2 => {
                        if let Some(raw) = item.take() {
                            match raw.into_article(source, &prefix) {
                                Some(article) => articles.push(article),
                                None => skipped += 1,
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            other => {
                if path.len() == 4 {
                    if let (Some(raw), Some(field), Some(text)) =
                        (item.as_mut(), field, event_text(other))
                    {
                        raw.field_mut(field).push_str(&text);
                    }
                }
            }
        }
    }

    if skipped > 0 {
        tracing::debug!(feed = %source.url, skipped, "RSS items without title or link skipped");
    }

    Ok(articles)
}
