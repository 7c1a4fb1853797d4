//! Configuration file parser for `headlines.toml`.
//!
//! The file is required: it carries the ordered feed list. Every other
//! section is optional and falls back to its default. Unknown keys are
//! accepted but logged, since they are usually typos.
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::feed::{FeedSource, UserAgents};

pub const DEFAULT_CONFIG_PATH: &str = "headlines.toml";

pub const TELEGRAM_BOT_ENV: &str = "TELEGRAM_BOT";
pub const TELEGRAM_CHANNEL_ENV: &str = "TELEGRAM_CHANNEL";

const KNOWN_KEYS: [&str; 7] = [
    "contact",
    "target",
    "database",
    "user_agents",
    "telegram",
    "digest",
    "feeds",
];

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("No feeds configured")]
    NoFeeds,

    #[error("Invalid feed URL {url:?}: {reason}")]
    InvalidFeedUrl { url: String, reason: String },

    #[error("Telegram target requires {0} (config or environment)")]
    MissingTelegram(&'static str),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Where a run's new articles are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Telegram,
    Digest,
    #[default]
    Stdout,
}

/// Telegram credentials. The token never appears in `Debug` output.
#[derive(Default)]
pub struct TelegramConfig {
    pub bot_token: Option<SecretString>,
    pub channel: Option<String>,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "[REDACTED]"))
            .field("channel", &self.channel)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    pub path: PathBuf,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("headlines.html"),
        }
    }
}

/// Validated run configuration.
#[derive(Debug)]
pub struct Config {
    pub contact: String,
    pub target: Target,
    /// SQLite file of published GUIDs.
    pub database: PathBuf,
    pub user_agents: UserAgents,
    pub telegram: TelegramConfig,
    pub digest: DigestConfig,
    /// Sources in declaration order.
    pub feeds: Vec<FeedSource>,
}

/// On-disk layout, before validation and environment overrides.
#[derive(Deserialize)]
#[serde(default)]
struct FileConfig {
    contact: String,
    target: Target,
    database: PathBuf,
    user_agents: AgentOverrides,
    telegram: TelegramSection,
    digest: DigestConfig,
    feeds: Vec<FeedSource>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            contact: String::new(),
            target: Target::default(),
            database: PathBuf::from("headlines.db"),
            user_agents: AgentOverrides::default(),
            telegram: TelegramSection::default(),
            digest: DigestConfig::default(),
            feeds: Vec::new(),
        }
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct AgentOverrides {
    chrome: Option<String>,
    reader: Option<String>,
    bot: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct TelegramSection {
    bot_token: Option<String>,
    channel: Option<String>,
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load and validate the config at `path`, applying environment
    /// overrides for the Telegram credentials.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::from_toml(&content, |key| std::env::var(key).ok())?;
        tracing::info!(
            path = %path.display(),
            feeds = config.feeds.len(),
            target = ?config.target,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate TOML content. `env` looks up override variables.
    pub fn from_toml(
        content: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let file: FileConfig = toml::from_str(content)?;

        if file.feeds.is_empty() {
            return Err(ConfigError::NoFeeds);
        }
        for feed in &file.feeds {
            validate_feed_url(&feed.url)?;
        }

        let mut user_agents = UserAgents::for_contact(&file.contact);
        let overrides = file.user_agents;
        if let Some(chrome) = overrides.chrome {
            user_agents.chrome = chrome;
        }
        if let Some(reader) = overrides.reader {
            user_agents.reader = reader;
        }
        if let Some(bot) = overrides.bot {
            user_agents.bot = bot;
        }

        // Environment wins over the file
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        let telegram = TelegramConfig {
            bot_token: non_empty(env(TELEGRAM_BOT_ENV))
                .or(non_empty(file.telegram.bot_token))
                .map(SecretString::from),
            channel: non_empty(env(TELEGRAM_CHANNEL_ENV)).or(non_empty(file.telegram.channel)),
        };

        if file.target == Target::Telegram {
            if telegram.bot_token.is_none() {
                return Err(ConfigError::MissingTelegram("a bot token"));
            }
            if telegram.channel.is_none() {
                return Err(ConfigError::MissingTelegram("a channel"));
            }
        }

        Ok(Self {
            contact: file.contact,
            target: file.target,
            database: file.database,
            user_agents,
            telegram,
            digest: file.digest,
            feeds: file.feeds,
        })
    }
}

fn validate_feed_url(raw: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidFeedUrl {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(invalid(format!("unsupported scheme {scheme:?}"))),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{AgentClass, FeedFormat};
    use secrecy::ExposeSecret;

    const MINIMAL: &str = r#"
[[feeds]]
url = "https://example.com/feed.xml"
header = "Example"
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_toml(MINIMAL, no_env).unwrap();
        assert_eq!(config.target, Target::Stdout);
        assert_eq!(config.database, PathBuf::from("headlines.db"));
        assert_eq!(config.digest.path, PathBuf::from("headlines.html"));
        assert_eq!(config.feeds.len(), 1);
        assert_eq!(config.feeds[0].agent, AgentClass::Bot);
        assert!(!config.feeds[0].enhanced_headers);
    }

    #[test]
    fn test_full_config() {
        let content = r#"
contact = "ops@example.com"
target = "telegram"
database = "/var/lib/headlines/published.db"

[user_agents]
bot = "custom_bot/2.0"

[telegram]
bot_token = "123:abc"
channel = "@news"

[[feeds]]
url = "https://www.reddit.com/r/rust/.rss"
header = "r/rust"
agent = "chrome"
enhanced_headers = true

[[feeds]]
url = "https://rss.slashdot.org/Slashdot/slashdotMain"
header = "Slashdot"

[[feeds]]
url = "https://example.com/atom"
header = "Odd"
format = "atom-reddit"
agent = "unknown"
"#;
        let config = Config::from_toml(content, no_env).unwrap();

        assert_eq!(config.target, Target::Telegram);
        assert_eq!(config.user_agents.bot, "custom_bot/2.0");
        assert!(config.user_agents.reader.contains("ops@example.com"));
        assert_eq!(
            config.telegram.bot_token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("123:abc".to_string())
        );

        let formats: Vec<_> = config.feeds.iter().map(FeedSource::format).collect();
        assert_eq!(
            formats,
            vec![FeedFormat::AtomReddit, FeedFormat::SlashdotRdf, FeedFormat::AtomReddit]
        );
        assert_eq!(config.feeds[0].agent, AgentClass::Chrome);
        assert!(config.feeds[0].enhanced_headers);
        assert_eq!(config.feeds[2].agent, AgentClass::Bot);
    }

    #[test]
    fn test_environment_overrides_telegram() {
        let content = format!("target = \"telegram\"\n[telegram]\nbot_token = \"file\"\nchannel = \"@file\"\n{MINIMAL}");
        let env = |key: &str| match key {
            TELEGRAM_BOT_ENV => Some("env-token".to_string()),
            _ => None,
        };
        let config = Config::from_toml(&content, env).unwrap();

        assert_eq!(
            config.telegram.bot_token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("env-token".to_string())
        );
        assert_eq!(config.telegram.channel.as_deref(), Some("@file"));
    }

    #[test]
    fn test_telegram_target_requires_credentials() {
        let content = format!("target = \"telegram\"\n{MINIMAL}");
        assert!(matches!(
            Config::from_toml(&content, no_env),
            Err(ConfigError::MissingTelegram(_))
        ));
    }

    #[test]
    fn test_debug_redacts_token() {
        let content = format!("[telegram]\nbot_token = \"super-secret\"\n{MINIMAL}");
        let config = Config::from_toml(&content, no_env).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_empty_feed_list_is_error() {
        assert!(matches!(
            Config::from_toml("contact = \"x\"", no_env),
            Err(ConfigError::NoFeeds)
        ));
    }

    #[test]
    fn test_non_http_feed_rejected() {
        let content = "[[feeds]]\nurl = \"file:///etc/passwd\"\nheader = \"x\"\n";
        assert!(matches!(
            Config::from_toml(content, no_env),
            Err(ConfigError::InvalidFeedUrl { .. })
        ));
    }

    #[test]
    fn test_unknown_format_is_parse_error() {
        let content = "[[feeds]]\nurl = \"https://x.test/\"\nheader = \"x\"\nformat = \"json\"\n";
        assert!(matches!(
            Config::from_toml(content, no_env),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_unknown_keys_are_accepted() {
        let content = format!("refresh = 5\n{MINIMAL}");
        assert!(Config::from_toml(&content, no_env).is_ok());
    }

    #[test]
    fn test_missing_file_is_error() {
        let path = Path::new("/tmp/headlines_test_nonexistent_config.toml");
        assert!(matches!(Config::load(path), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join("headlines_config_test_load");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("headlines.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.feeds[0].header, "Example");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_oversized_file_rejected() {
        let dir = std::env::temp_dir().join("headlines_config_test_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("headlines.toml");
        let padding = "# padding\n".repeat(120_000);
        std::fs::write(&path, format!("{MINIMAL}{padding}")).unwrap();

        assert!(matches!(Config::load(&path), Err(ConfigError::TooLarge(_))));

        std::fs::remove_dir_all(&dir).ok();
    }
}
