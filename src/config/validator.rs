use std::collections::HashSet;

use secrecy::ExposeSecret;
use thiserror::Error;

use super::parser::Config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord.bot_token.expose_secret().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "discord.bot_token cannot be empty".to_string(),
            ));
        }

        if self.linear.api_key.expose_secret().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "linear.api_key cannot be empty".to_string(),
            ));
        }

        if let Err(err) = url::Url::parse(&self.linear.api_url) {
            return Err(ConfigError::InvalidConfig(format!(
                "linear.api_url is not a valid url: {err}"
            )));
        }

        if self.database.sqlite_path().is_none() {
            return Err(ConfigError::InvalidConfig(
                "database connection string cannot be empty".to_string(),
            ));
        }

        if self.sync.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "sync.poll_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.channels.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "at least one channel must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.discord_channel_id) {
                return Err(ConfigError::InvalidConfig(format!(
                    "channel {} is configured more than once",
                    channel.discord_channel_id
                )));
            }

            if channel.linear_team_id.is_empty() || channel.linear_label_id.is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "channel {} needs linear_team_id and linear_label_id",
                    channel.discord_channel_id
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use crate::config::{Config, ConfigError};

    fn config_with_channels(channels: &str) -> String {
        format!(
            r#"
discord:
  bot_token: "token"
linear:
  api_key: "key"
channels:
{channels}
"#
        )
    }

    const CHANNEL: &str = r#"  - discord_channel_id: 10
    guild_id: 1
    channel_type: feature
    linear_team_id: "team"
    linear_label_id: "label""#;

    fn invalid_message(yaml: &str) -> String {
        match Config::from_yaml_with(yaml, |_| None) {
            Err(ConfigError::InvalidConfig(message)) => message,
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn accepts_minimal_config() {
        Config::from_yaml_with(&config_with_channels(CHANNEL), |_| None).expect("valid");
    }

    #[test]
    fn rejects_empty_discord_token() {
        let yaml = config_with_channels(CHANNEL).replace("bot_token: \"token\"", "bot_token: \"\"");
        assert!(invalid_message(&yaml).contains("discord.bot_token"));
    }

    #[test]
    fn rejects_empty_linear_key() {
        let yaml = config_with_channels(CHANNEL).replace("api_key: \"key\"", "api_key: \"\"");
        assert!(invalid_message(&yaml).contains("linear.api_key"));
    }

    #[test]
    fn env_token_fills_missing_file_token() {
        let yaml = config_with_channels(CHANNEL).replace("bot_token: \"token\"", "bot_token: \"\"");
        let config = Config::from_yaml_with(&yaml, |name| {
            (name == "DISCORD_TOKEN").then(|| "from-env".to_string())
        })
        .expect("valid with env token");
        assert_eq!(config.discord.bot_token.expose_secret(), "from-env");
    }

    #[test]
    fn rejects_empty_channel_list() {
        let yaml = config_with_channels("  []");
        assert!(invalid_message(&yaml).contains("at least one channel"));
    }

    #[test]
    fn rejects_duplicate_channel() {
        let yaml = config_with_channels(&format!("{CHANNEL}\n{CHANNEL}"));
        assert!(invalid_message(&yaml).contains("more than once"));
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let yaml = format!(
            "{}sync:\n  poll_interval_secs: 0\n",
            config_with_channels(CHANNEL)
        );
        assert!(invalid_message(&yaml).contains("poll_interval_secs"));
    }

    #[test]
    fn rejects_bad_linear_url() {
        let yaml = config_with_channels(CHANNEL).replace(
            "api_key: \"key\"",
            "api_key: \"key\"\n  api_url: \"not a url\"",
        );
        assert!(invalid_message(&yaml).contains("linear.api_url"));
    }
}
