use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of forum a mapped thread came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Feature,
    Bug,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Feature => "feature",
            ChannelType::Bug => "bug",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feature" => Ok(ChannelType::Feature),
            "bug" => Ok(ChannelType::Bug),
            other => Err(format!("unknown channel type: {other}")),
        }
    }
}

/// Durable link between one Discord thread and one Linear issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMapping {
    pub id: i64,
    pub discord_thread_id: String,
    pub linear_issue_id: String,
    pub linear_identifier: String,
    pub channel_type: ChannelType,
    pub created_at: DateTime<Utc>,
}

impl SyncMapping {
    /// Builds an unsaved mapping; `id` is assigned by the store.
    pub fn new(
        discord_thread_id: impl Into<String>,
        linear_issue_id: impl Into<String>,
        linear_identifier: impl Into<String>,
        channel_type: ChannelType,
    ) -> Self {
        Self {
            id: 0,
            discord_thread_id: discord_thread_id.into(),
            linear_issue_id: linear_issue_id.into(),
            linear_identifier: linear_identifier.into(),
            channel_type,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCacheEntry {
    pub linear_issue_id: String,
    pub status_name: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillState {
    pub channel_id: String,
    pub completed: bool,
    pub last_thread_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedComment {
    pub linear_comment_id: String,
    pub linear_issue_id: String,
    pub discord_message_id: String,
    pub created_at: DateTime<Utc>,
}

impl SyncedComment {
    pub fn new(
        linear_comment_id: impl Into<String>,
        linear_issue_id: impl Into<String>,
        discord_message_id: impl Into<String>,
    ) -> Self {
        Self {
            linear_comment_id: linear_comment_id.into(),
            linear_issue_id: linear_issue_id.into(),
            discord_message_id: discord_message_id.into(),
            created_at: Utc::now(),
        }
    }
}
