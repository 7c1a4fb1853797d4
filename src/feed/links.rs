//! Outbound link extraction from escaped HTML embedded in feed entries.
//!
//! Reddit Atom entries link to the Reddit thread; the submitted URL only
//! appears as an anchor inside the entry's HTML content. The content is
//! parsed as an HTML fragment and anchors are visited in document order
//! until one leaves the Reddit domains.

use html_escape::decode_html_entities;
use scraper::{Html, Selector};
use url::Url;

/// Hosts (and their subdomains) treated as part of the aggregator itself.
const SELF_DOMAINS: &[&str] = &["reddit.com", "redditmedia.com"];

/// Reddit's short-link domain, matched exactly.
const SHORT_LINK_DOMAIN: &str = "redd.it";

/// Returns the first absolute `http(s)` anchor href in `escaped` whose host
/// is not a self-domain.
///
/// `None` is not an error: it means no qualifying link was present.
/// Markup inside comments and raw-text elements (`script`, `xmp`,
/// `iframe`, ...) is never treated as an anchor.
///
/// # Examples
///
/// ```
/// use headlines::feed::resolve_outbound_link;
///
/// let content = "&lt;a href=\"https://www.reddit.com/r/rust\"&gt;thread&lt;/a&gt; \
///                &lt;a href=\"https://blog.example.com/post\"&gt;[link]&lt;/a&gt;";
/// assert_eq!(
///     resolve_outbound_link(content).as_deref(),
///     Some("https://blog.example.com/post")
/// );
/// assert_eq!(resolve_outbound_link("   "), None);
/// ```
pub fn resolve_outbound_link(escaped: &str) -> Option<String> {
    if escaped.trim().is_empty() {
        return None;
    }

    let fragment = Html::parse_fragment(&decode_html_entities(escaped));
    let anchors = Selector::parse("a[href]").ok()?;

    fragment
        .select(&anchors)
        .filter_map(|a| a.value().attr("href"))
        .find_map(qualify_href)
}

/// Accepts an href only if it is an absolute http(s) URL on a foreign host.
fn qualify_href(href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    let url = Url::parse(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }

    let host = url.host_str()?.to_ascii_lowercase();
    if is_self_host(&host) {
        return None;
    }

    Some(href.to_owned())
}

/// Whether `host` belongs to the aggregator platform.
pub fn is_self_host(host: &str) -> bool {
    if host == SHORT_LINK_DOMAIN {
        return true;
    }
    SELF_DOMAINS.iter().any(|domain| {
        host == *domain
            || host
                .strip_suffix(domain)
                .is_some_and(|rest| rest.ends_with('.'))
    })
}
