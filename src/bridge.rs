use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ChannelConfig, SyncConfig};
use crate::db::{DatabaseError, DatabaseManager, SyncMapping, SyncedComment};
use crate::linear::{IssueUpdate, LinearError, LinearIssue};
use crate::utils::locks::KeyedLocks;

pub mod backfill;
pub mod logic;
pub mod poller;

use self::logic::{
    MISSING_BODY, attachment_link, build_issue_description, build_label_ids, comment_message,
    status_change_message, thread_url, tracked_reply,
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Linear(#[from] LinearError),

    #[error("discord error: {0}")]
    Discord(String),

    #[error("{0}")]
    Internal(String),
}

/// A forum post as seen by the sync core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForumThread {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub name: String,
    pub applied_tags: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForumMessage {
    pub id: u64,
    pub content: String,
    pub attachments: Vec<ForumAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForumAttachment {
    pub url: String,
    pub filename: String,
}

#[async_trait]
pub trait ForumGateway: Send + Sync {
    /// The opening message of a forum thread, `None` while Discord has not delivered it yet.
    async fn starter_message(&self, thread_id: u64) -> Result<Option<ForumMessage>, SyncError>;
    /// Posts into a channel or thread and returns the new message id.
    async fn post_message(&self, channel_id: u64, content: &str) -> Result<u64, SyncError>;
    async fn active_threads(
        &self,
        guild_id: u64,
        parent_id: u64,
    ) -> Result<Vec<ForumThread>, SyncError>;
}

#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn create_issue(
        &self,
        team_id: &str,
        title: &str,
        description: &str,
        label_ids: &[String],
    ) -> Result<LinearIssue, LinearError>;
    /// Issues of a team updated strictly after `since` (RFC 3339).
    async fn updated_issues(
        &self,
        team_id: &str,
        since: &str,
    ) -> Result<Vec<IssueUpdate>, LinearError>;
    /// Re-hosts a file and returns the asset url.
    async fn upload_attachment(&self, url: &str, filename: &str) -> Result<String, LinearError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadSyncOutcome {
    /// The thread's parent is not a monitored forum channel.
    Ignored,
    AlreadySynced,
    Created(SyncMapping),
}

pub struct SyncCore {
    sync: SyncConfig,
    channels: Vec<ChannelConfig>,
    db: Arc<DatabaseManager>,
    forum: Arc<dyn ForumGateway>,
    tracker: Arc<dyn IssueTracker>,
    thread_locks: KeyedLocks,
    issue_locks: KeyedLocks,
}

impl SyncCore {
    pub fn new(
        sync: SyncConfig,
        channels: Vec<ChannelConfig>,
        db: Arc<DatabaseManager>,
        forum: Arc<dyn ForumGateway>,
        tracker: Arc<dyn IssueTracker>,
    ) -> Self {
        Self {
            sync,
            channels,
            db,
            forum,
            tracker,
            thread_locks: KeyedLocks::new(),
            issue_locks: KeyedLocks::new(),
        }
    }

    pub fn channel_config(&self, channel_id: u64) -> Option<&ChannelConfig> {
        self.channels
            .iter()
            .find(|channel| channel.discord_channel_id == channel_id)
    }

    /// Entry point for gateway thread-create events.
    pub async fn handle_thread_created(
        &self,
        thread: &ForumThread,
    ) -> Result<ThreadSyncOutcome, SyncError> {
        let Some(parent_id) = thread.parent_id else {
            debug!(thread_id = thread.id, "ignoring thread without parent channel");
            return Ok(ThreadSyncOutcome::Ignored);
        };
        let Some(channel) = self.channel_config(parent_id) else {
            debug!(
                thread_id = thread.id,
                parent_id, "ignoring thread in unmonitored channel"
            );
            return Ok(ThreadSyncOutcome::Ignored);
        };

        self.sync_thread(channel, thread).await
    }

    pub async fn sync_thread(
        &self,
        channel: &ChannelConfig,
        thread: &ForumThread,
    ) -> Result<ThreadSyncOutcome, SyncError> {
        let thread_key = thread.id.to_string();
        let _guard = self.thread_locks.lock(&thread_key).await;

        let mappings = self.db.mapping_store();
        if mappings.get_by_discord_thread(&thread_key).await?.is_some() {
            debug!(thread_id = thread.id, "thread already synced");
            return Ok(ThreadSyncOutcome::AlreadySynced);
        }

        let starter = self.fetch_starter_message(thread.id).await;
        let body = starter
            .as_ref()
            .map(|message| message.content.as_str())
            .unwrap_or(MISSING_BODY);

        let mut attachment_links = Vec::new();
        if let Some(message) = &starter {
            for attachment in &message.attachments {
                match self
                    .tracker
                    .upload_attachment(&attachment.url, &attachment.filename)
                    .await
                {
                    Ok(asset_url) => {
                        attachment_links.push(attachment_link(&attachment.filename, &asset_url))
                    }
                    Err(err) => warn!(
                        thread_id = thread.id,
                        filename = %attachment.filename,
                        "failed to upload attachment: {err}"
                    ),
                }
            }
        }

        let description = build_issue_description(
            body,
            &thread_url(channel.guild_id, channel.discord_channel_id, thread.id),
            &attachment_links,
        );
        let label_ids = build_label_ids(channel, &thread.applied_tags);

        let issue = self
            .tracker
            .create_issue(
                &channel.linear_team_id,
                &thread.name,
                &description,
                &label_ids,
            )
            .await?;

        let mapping = SyncMapping::new(
            thread_key.clone(),
            issue.id.clone(),
            issue.identifier.clone(),
            channel.channel_type,
        );
        match mappings.create_mapping(&mapping).await {
            Ok(()) => {}
            Err(err) if err.is_unique_violation() => {
                warn!(
                    thread_id = thread.id,
                    issue = %issue.identifier,
                    "mapping already stored for thread, issue left unmapped"
                );
                return Ok(ThreadSyncOutcome::AlreadySynced);
            }
            Err(err) => return Err(err.into()),
        }

        info!(
            thread_id = thread.id,
            issue = %issue.identifier,
            channel_type = %channel.channel_type,
            "created linear issue for discord thread"
        );

        if let Err(err) = self
            .forum
            .post_message(thread.id, &tracked_reply(&issue.identifier, &issue.url))
            .await
        {
            warn!(thread_id = thread.id, "failed to post tracking reply: {err}");
        }

        Ok(ThreadSyncOutcome::Created(mapping))
    }

    async fn fetch_starter_message(&self, thread_id: u64) -> Option<ForumMessage> {
        let attempts = self.sync.first_message_retries.max(1);
        for attempt in 1..=attempts {
            match self.forum.starter_message(thread_id).await {
                Ok(Some(message)) => return Some(message),
                Ok(None) => debug!(thread_id, attempt, "starter message not available yet"),
                Err(err) => debug!(thread_id, attempt, "failed to fetch starter message: {err}"),
            }
            if attempt < attempts {
                tokio::time::sleep(Duration::from_millis(self.sync.first_message_retry_delay_ms))
                    .await;
            }
        }

        warn!(thread_id, "starter message unavailable, using placeholder body");
        None
    }

    /// Posts a status change into the mapped thread. Returns whether a message was sent.
    pub async fn relay_status(&self, update: &IssueUpdate) -> Result<bool, SyncError> {
        if update.status_name.is_empty() {
            debug!(issue = %update.identifier, "update carries no workflow state");
            return Ok(false);
        }
        let Some(mapping) = self
            .db
            .mapping_store()
            .get_by_linear_issue(&update.id)
            .await?
        else {
            return Ok(false);
        };

        let statuses = self.db.status_store();
        let cached = statuses.get_cached_status(&update.id).await?;
        if cached.is_some_and(|entry| entry.status_name == update.status_name) {
            return Ok(false);
        }

        let thread_id = parse_thread_id(&mapping)?;
        self.forum
            .post_message(
                thread_id,
                &status_change_message(&update.identifier, &update.status_name),
            )
            .await?;
        statuses
            .upsert_cached_status(&update.id, &update.status_name)
            .await?;

        info!(
            issue = %update.identifier,
            status = %update.status_name,
            thread_id,
            "relayed status change to discord"
        );
        Ok(true)
    }

    /// Mirrors comments not yet in the comment log. Returns how many were posted.
    pub async fn relay_comments(&self, update: &IssueUpdate) -> Result<usize, SyncError> {
        if update.comments.is_empty() {
            return Ok(0);
        }
        let Some(mapping) = self
            .db
            .mapping_store()
            .get_by_linear_issue(&update.id)
            .await?
        else {
            return Ok(0);
        };
        let thread_id = parse_thread_id(&mapping)?;

        let _guard = self.issue_locks.lock(&update.id).await;
        let comments = self.db.comment_store();
        let mut relayed = 0;
        for comment in &update.comments {
            if comments.is_comment_synced(&comment.id).await? {
                continue;
            }

            let message_id = self
                .forum
                .post_message(
                    thread_id,
                    &comment_message(&comment.author, &update.identifier, &comment.body),
                )
                .await?;
            comments
                .record_synced_comment(&SyncedComment::new(
                    comment.id.clone(),
                    update.id.clone(),
                    message_id.to_string(),
                ))
                .await?;
            relayed += 1;
        }

        if relayed > 0 {
            info!(issue = %update.identifier, relayed, "relayed linear comments to discord");
        }
        Ok(relayed)
    }
}

fn parse_thread_id(mapping: &SyncMapping) -> Result<u64, SyncError> {
    mapping.discord_thread_id.parse().map_err(|_| {
        SyncError::Internal(format!(
            "invalid discord thread id {} for issue {}",
            mapping.discord_thread_id, mapping.linear_identifier
        ))
    })
}
