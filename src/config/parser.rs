use std::collections::HashMap;
use std::path::Path;

use secrecy::SecretString;
use serde::Deserialize;

use super::ConfigError;
use crate::db::ChannelType;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub discord: DiscordConfig,
    pub linear: LinearConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Deserialize)]
pub struct DiscordConfig {
    #[serde(default = "empty_secret")]
    pub bot_token: SecretString,
}

#[derive(Debug, Deserialize)]
pub struct LinearConfig {
    #[serde(default = "empty_secret")]
    pub api_key: SecretString,
    #[serde(default = "default_linear_api_url")]
    pub api_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl DatabaseConfig {
    pub fn connection_string(&self) -> String {
        if let Some(ref url) = self.url {
            url.clone()
        } else if let Some(ref file) = self.filename {
            format!("sqlite://{}", file)
        } else {
            default_database_url()
        }
    }

    /// Filesystem path of the SQLite database, accepting `sqlite://`, `sqlite:` or a bare path.
    pub fn sqlite_path(&self) -> Option<String> {
        let url = self.connection_string();
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(&url);
        if path.is_empty() {
            None
        } else {
            Some(path.to_string())
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_true")]
    pub backfill_on_start: bool,
    #[serde(default = "default_backfill_delay_ms")]
    pub backfill_delay_ms: u64,
    #[serde(default = "default_first_message_retries")]
    pub first_message_retries: u32,
    #[serde(default = "default_first_message_retry_delay_ms")]
    pub first_message_retry_delay_ms: u64,
    #[serde(default = "default_true")]
    pub relay_comments: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            backfill_on_start: true,
            backfill_delay_ms: default_backfill_delay_ms(),
            first_message_retries: default_first_message_retries(),
            first_message_retry_delay_ms: default_first_message_retry_delay_ms(),
            relay_comments: true,
        }
    }
}

/// One monitored Discord forum channel and where its threads land in Linear.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub discord_channel_id: u64,
    pub guild_id: u64,
    pub channel_type: ChannelType,
    pub linear_team_id: String,
    pub linear_label_id: String,
    /// Discord forum tag id -> Linear label id.
    #[serde(default)]
    pub tag_label_map: HashMap<String, String>,
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Self::from_yaml_with(content, |name| std::env::var(name).ok())
    }

    /// Like [`Config::from_yaml`], reading overrides through `lookup` instead of the process env.
    pub fn from_yaml_with(
        content: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(content)?;
        config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Secrets and the database url may come from the environment instead of the file.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("DISCORD_TOKEN") {
            self.discord.bot_token = SecretString::from(value);
        }
        if let Some(value) = lookup("LINEAR_API_KEY") {
            self.linear.api_key = SecretString::from(value);
        }
        if let Some(value) = lookup("DATABASE_URL") {
            self.database.url = Some(value);
        }
    }
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

fn default_linear_api_url() -> String {
    "https://api.linear.app/graphql".to_string()
}

fn default_database_url() -> String {
    "sqlite://bot.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_backfill_delay_ms() -> u64 {
    500
}

fn default_first_message_retries() -> u32 {
    3
}

fn default_first_message_retry_delay_ms() -> u64 {
    2000
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::{Config, DatabaseConfig};
    use crate::config::ConfigError;
    use crate::db::ChannelType;

    const SAMPLE: &str = r#"
discord:
  bot_token: "discord-token"
linear:
  api_key: "lin_api_key"
database:
  filename: "data/bot.db"
sync:
  poll_interval_secs: 10
channels:
  - discord_channel_id: 111
    guild_id: 900
    channel_type: feature
    linear_team_id: "team-a"
    linear_label_id: "label-feature"
    tag_label_map:
      "5001": "label-ui"
  - discord_channel_id: 222
    guild_id: 900
    channel_type: bug
    linear_team_id: "team-a"
    linear_label_id: "label-bug"
"#;

    #[test]
    fn parses_sample_with_defaults() {
        let config = Config::from_yaml_with(SAMPLE, |_| None).expect("valid config");

        assert_eq!(config.discord.bot_token.expose_secret(), "discord-token");
        assert_eq!(config.linear.api_url, "https://api.linear.app/graphql");
        assert_eq!(config.sync.poll_interval_secs, 10);
        assert_eq!(config.sync.first_message_retries, 3);
        assert!(config.sync.backfill_on_start);
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.database.sqlite_path().as_deref(), Some("data/bot.db"));

        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[0].tag_label_map["5001"], "label-ui");
        let bugs = &config.channels[1];
        assert_eq!(bugs.channel_type, ChannelType::Bug);
        assert!(bugs.tag_label_map.is_empty());
    }

    #[test]
    fn overrides_replace_secrets_and_database() {
        let mut config: Config = serde_yaml::from_str(SAMPLE).expect("yaml");
        config.apply_overrides(|name| match name {
            "DISCORD_TOKEN" => Some("from-env".to_string()),
            "DATABASE_URL" => Some("sqlite:///tmp/override.db".to_string()),
            _ => None,
        });

        assert_eq!(config.discord.bot_token.expose_secret(), "from-env");
        assert_eq!(config.linear.api_key.expose_secret(), "lin_api_key");
        assert_eq!(
            config.database.sqlite_path().as_deref(),
            Some("/tmp/override.db")
        );
    }

    #[test]
    fn rejects_unknown_channel_type() {
        let yaml = SAMPLE.replace("channel_type: bug", "channel_type: task");
        assert!(matches!(
            Config::from_yaml_with(&yaml, |_| None),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn database_path_accepts_url_forms() {
        let from_url = |url: &str| DatabaseConfig {
            url: Some(url.to_string()),
            filename: None,
        };

        assert_eq!(from_url("sqlite://a.db").sqlite_path().as_deref(), Some("a.db"));
        assert_eq!(from_url("sqlite:b.db").sqlite_path().as_deref(), Some("b.db"));
        assert_eq!(from_url("/var/lib/c.db").sqlite_path().as_deref(), Some("/var/lib/c.db"));
        assert_eq!(from_url("sqlite://").sqlite_path(), None);
        assert_eq!(
            DatabaseConfig::default().sqlite_path().as_deref(),
            Some("bot.db")
        );
    }
}
