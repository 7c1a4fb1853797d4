use serde::Deserialize;

/// Header label that selects the Slashdot RDF dialect when no explicit
/// format is configured.
pub const LEGACY_RDF_HEADER: &str = "Slashdot";

/// Header prefix that selects the Reddit Atom dialect when no explicit
/// format is configured.
pub const REDDIT_HEADER_PREFIX: &str = "r/";

// ============================================================================
// Feed Configuration
// ============================================================================

/// Wire schema of a feed. Decided once from configuration, never sniffed
/// from the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedFormat {
    Rss,
    AtomReddit,
    SlashdotRdf,
}

impl FeedFormat {
    /// Derives the format from a header label, for sources that do not
    /// declare one.
    pub fn from_header(header: &str) -> Self {
        if header == LEGACY_RDF_HEADER {
            FeedFormat::SlashdotRdf
        } else if header.starts_with(REDDIT_HEADER_PREFIX) {
            FeedFormat::AtomReddit
        } else {
            FeedFormat::Rss
        }
    }
}

/// Which outbound identity a source is fetched with.
///
/// Unknown or empty selectors fall back to [`AgentClass::Bot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum AgentClass {
    Chrome,
    Reader,
    #[default]
    Bot,
}

impl AgentClass {
    pub fn from_selector(selector: &str) -> Self {
        match selector.trim().to_ascii_lowercase().as_str() {
            "chrome" => AgentClass::Chrome,
            "reader" => AgentClass::Reader,
            _ => AgentClass::Bot,
        }
    }
}

impl From<String> for AgentClass {
    fn from(selector: String) -> Self {
        Self::from_selector(&selector)
    }
}

/// Static configuration of one feed. Loaded once per run and never
/// mutated by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedSource {
    pub url: String,
    /// Display label; also the namespace used when prefixing GUIDs.
    #[serde(default)]
    pub header: String,
    /// Explicit format. `None` means "derive from the header".
    #[serde(default)]
    pub format: Option<FeedFormat>,
    #[serde(default)]
    pub agent: AgentClass,
    /// Send browser navigation headers (`Sec-Fetch-*`) with the request.
    #[serde(default)]
    pub enhanced_headers: bool,
}

impl FeedSource {
    pub fn new(url: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            header: header.into(),
            format: None,
            agent: AgentClass::default(),
            enhanced_headers: false,
        }
    }

    pub fn with_format(mut self, format: FeedFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_agent(mut self, agent: AgentClass) -> Self {
        self.agent = agent;
        self
    }

    pub fn with_enhanced_headers(mut self, enabled: bool) -> Self {
        self.enhanced_headers = enabled;
        self
    }

    /// The parser variant this source is decoded with.
    pub fn format(&self) -> FeedFormat {
        self.format
            .unwrap_or_else(|| FeedFormat::from_header(&self.header))
    }

    /// Header with spaces stripped, used as the GUID namespace.
    pub fn guid_prefix(&self) -> String {
        self.header.replace(' ', "")
    }
}

// ============================================================================
// User Agents
// ============================================================================

const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36";

/// The three `User-Agent` strings a source can be fetched with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgents {
    pub chrome: String,
    pub reader: String,
    pub bot: String,
}

impl UserAgents {
    /// Builds the default identities, embedding `contact` in the
    /// self-identifying agents so feed operators can reach the owner.
    pub fn for_contact(contact: &str) -> Self {
        Self {
            chrome: CHROME_USER_AGENT.to_string(),
            reader: format!("RSSReader/1.0 (+https://github.com/vctrla; {contact})"),
            bot: format!("headlines_bot/1.0 (+https://github.com/vctrla; {contact})"),
        }
    }

    pub fn select(&self, class: AgentClass) -> &str {
        match class {
            AgentClass::Chrome => &self.chrome,
            AgentClass::Reader => &self.reader,
            AgentClass::Bot => &self.bot,
        }
    }
}

// ============================================================================
// Canonical Article
// ============================================================================

/// A feed item normalized across all wire schemas.
///
/// `guid` is stable across runs for the same logical item; `title` and
/// `link` are never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub guid: String,
    pub title: String,
    pub header: String,
    pub link: String,
}
