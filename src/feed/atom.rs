use quick_xml::encoding::Decoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;

use super::links::resolve_outbound_link;
use super::parser::{attribute, canonical_guid, event_text, local_name, ParseError, ATOM_NS};
use super::types::{Article, FeedSource};

#[derive(Debug, Clone, Copy)]
enum Field {
    Title,
    Id,
    Content,
}

#[derive(Debug)]
struct EntryLink {
    rel: Option<String>,
    href: String,
}

#[derive(Debug, Default)]
struct RawEntry {
    title: String,
    id: String,
    content: String,
    links: Vec<EntryLink>,
}

impl RawEntry {
    fn field_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::Title => &mut self.title,
            Field::Id => &mut self.id,
            Field::Content => &mut self.content,
        }
    }

    /// The entry's own link: the first `alternate` (or rel-less) link,
    /// else the first link of any kind.
    fn own_link(&self) -> &str {
        self.links
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or_else(|| self.links.first())
            .map(|l| l.href.trim())
            .unwrap_or_default()
    }

    fn into_article(self, source: &FeedSource, prefix: &str) -> Option<Article> {
        let title = self.title.trim();
        if title.is_empty() {
            return None;
        }

        // An outbound link in the post body replaces the thread link
        let link = resolve_outbound_link(&self.content).unwrap_or_else(|| self.own_link().to_owned());
        if link.trim().is_empty() {
            return None;
        }

        Some(Article {
            guid: canonical_guid(prefix, &self.id, &link)?,
            title: title.to_owned(),
            header: source.header.clone(),
            link,
        })
    }
}

fn entry_link(e: &BytesStart<'_>, decoder: Decoder) -> Option<EntryLink> {
    let href = attribute(e, decoder, b"href")?;
    Some(EntryLink {
        rel: attribute(e, decoder, b"rel"),
        href,
    })
}

/// Whether an element belongs to the Atom vocabulary: unprefixed, or with a
/// prefix bound to the Atom namespace. `media:title` and friends are not.
fn is_atom_element(in_atom_ns: bool, e: &BytesStart<'_>) -> bool {
    in_atom_ns || e.name().prefix().is_none()
}

/// Parses a Reddit-flavored Atom document (`feed/entry`).
pub(super) fn parse_atom(xml: &str, source: &FeedSource) -> Result<Vec<Article>, ParseError> {
    let mut reader = NsReader::from_str(xml);
    let prefix = source.guid_prefix();

    let mut path: Vec<String> = Vec::new();
    let mut entry: Option<RawEntry> = None;
    let mut field: Option<Field> = None;
    let mut articles = Vec::new();
    let mut skipped = 0usize;

    loop {
        let (in_atom_ns, event) = match reader.read_resolved_event() {
            Ok((resolved, event)) => (
                matches!(resolved, ResolveResult::Bound(Namespace(ns)) if ns == ATOM_NS),
                event,
            ),
            Err(e) => return Err(e.into()),
        };

        match &event {
            Event::Start(e) => {
                let name = local_name(e);
                if path.len() == 1 && name == "entry" {
                    entry = Some(RawEntry::default());
                } else if path.len() == 2 && is_atom_element(in_atom_ns, e) {
                    if let Some(raw) = entry.as_mut() {
                        field = match name.as_str() {
                            "title" => Some(Field::Title),
                            "id" => Some(Field::Id),
                            "content" => Some(Field::Content),
                            "link" => {
                                if let Some(link) = entry_link(e, reader.decoder()) {
                                    raw.links.push(link);
                                }
                                None
                            }
                            _ => None,
                        };
                        // A repeated element replaces the earlier value
                        if let Some(field) = field {
                            raw.field_mut(field).clear();
                        }
                    }
                } else if path.len() == 2 {
                    field = None;
                }
                path.push(name);
            }
            Event::Empty(e) => {
                if path.len() == 2 && is_atom_element(in_atom_ns, e) && local_name(e) == "link" {
                    if let (Some(raw), Some(link)) = (entry.as_mut(), entry_link(e, reader.decoder())) {
                        raw.links.push(link);
                    }
                }
            }
            Event::End(_) => {
                path.pop();
                match path.len() {
                    2 => field = None,
                    1 => {
                        if let Some(raw) = entry.take() {
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
                if path.len() == 3 {
                    if let (Some(raw), Some(field), Some(text)) =
                        (entry.as_mut(), field, event_text(other))
                    {
                        raw.field_mut(field).push_str(&text);
                    }
                }
            }
        }
    }

    if skipped > 0 {
        tracing::debug!(feed = %source.url, skipped, "Atom entries without title or link skipped");
    }

    Ok(articles)
}
