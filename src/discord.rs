use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serenity::all::{
    ChannelId, Client as SerenityClient, Context as SerenityContext,
    EventHandler as SerenityEventHandler, GatewayIntents, GuildChannel, GuildId, Http, Message,
    MessageId, Ready,
};
use serenity::http::HttpError;
use tracing::{debug, error, info, warn};

use crate::bridge::{
    ForumAttachment, ForumGateway, ForumMessage, ForumThread, SyncCore, SyncError,
    ThreadSyncOutcome,
};

const INITIAL_LOGIN_RETRY_SECONDS: u64 = 2;
const MAX_LOGIN_RETRY_SECONDS: u64 = 300;

/// REST side of the Discord connection.
#[derive(Clone)]
pub struct DiscordClient {
    token: SecretString,
    http: Arc<Http>,
}

impl DiscordClient {
    pub fn new(token: SecretString) -> Self {
        let http = Arc::new(Http::new(token.expose_secret()));
        Self { token, http }
    }

    fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT
    }

    /// Keeps a gateway session alive, reconnecting with exponential backoff.
    pub async fn run_gateway(&self, handler: ThreadEventHandler) {
        let mut retry_seconds = INITIAL_LOGIN_RETRY_SECONDS;

        loop {
            match self.connect_once(handler.clone()).await {
                Ok(()) => {
                    warn!("discord gateway closed, reconnecting");
                    retry_seconds = INITIAL_LOGIN_RETRY_SECONDS;
                }
                Err(err) => {
                    error!(
                        "discord gateway failed: {err}. retrying in {} seconds",
                        retry_seconds
                    );
                    tokio::time::sleep(Duration::from_secs(retry_seconds)).await;
                    retry_seconds = (retry_seconds * 2).min(MAX_LOGIN_RETRY_SECONDS);
                }
            }
        }
    }

    async fn connect_once(&self, handler: ThreadEventHandler) -> Result<(), serenity::Error> {
        let mut client = SerenityClient::builder(self.token.expose_secret(), Self::intents())
            .event_handler(handler)
            .await?;
        client.start_autosharded().await
    }
}

fn discord_error(err: serenity::Error) -> SyncError {
    SyncError::Discord(err.to_string())
}

fn is_not_found(err: &serenity::Error) -> bool {
    matches!(
        err,
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response))
            if response.status_code.as_u16() == 404
    )
}

impl From<&Message> for ForumMessage {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.get(),
            content: message.content.clone(),
            attachments: message
                .attachments
                .iter()
                .map(|attachment| ForumAttachment {
                    url: attachment.url.clone(),
                    filename: attachment.filename.clone(),
                })
                .collect(),
        }
    }
}

impl From<&GuildChannel> for ForumThread {
    fn from(channel: &GuildChannel) -> Self {
        Self {
            id: channel.id.get(),
            parent_id: channel.parent_id.map(|id| id.get()),
            name: channel.name.clone(),
            applied_tags: channel.applied_tags.iter().map(|tag| tag.get()).collect(),
        }
    }
}

#[async_trait]
impl ForumGateway for DiscordClient {
    async fn starter_message(&self, thread_id: u64) -> Result<Option<ForumMessage>, SyncError> {
        // a forum post's starter message shares the thread's id
        match ChannelId::new(thread_id)
            .message(self.http.as_ref(), MessageId::new(thread_id))
            .await
        {
            Ok(message) => Ok(Some(ForumMessage::from(&message))),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(discord_error(err)),
        }
    }

    async fn post_message(&self, channel_id: u64, content: &str) -> Result<u64, SyncError> {
        let message = ChannelId::new(channel_id)
            .say(self.http.as_ref(), content)
            .await
            .map_err(discord_error)?;
        Ok(message.id.get())
    }

    async fn active_threads(
        &self,
        guild_id: u64,
        parent_id: u64,
    ) -> Result<Vec<ForumThread>, SyncError> {
        let active = GuildId::new(guild_id)
            .get_active_threads(self.http.as_ref())
            .await
            .map_err(discord_error)?;

        Ok(active
            .threads
            .iter()
            .filter(|thread| thread.parent_id.map(|id| id.get()) == Some(parent_id))
            .map(ForumThread::from)
            .collect())
    }
}

/// Forwards gateway thread events into the sync core.
#[derive(Clone)]
pub struct ThreadEventHandler {
    core: Arc<SyncCore>,
}

impl ThreadEventHandler {
    pub fn new(core: Arc<SyncCore>) -> Self {
        Self { core }
    }
}

#[serenity::async_trait]
impl SerenityEventHandler for ThreadEventHandler {
    async fn ready(&self, _ctx: SerenityContext, ready: Ready) {
        info!(
            "discord gateway ready as {} ({})",
            ready.user.name, ready.user.id
        );
    }

    async fn thread_create(&self, _ctx: SerenityContext, thread: GuildChannel) {
        let forum_thread = ForumThread::from(&thread);

        match self.core.handle_thread_created(&forum_thread).await {
            Ok(ThreadSyncOutcome::Created(mapping)) => info!(
                thread_id = forum_thread.id,
                thread_name = %forum_thread.name,
                issue = %mapping.linear_identifier,
                "synced new forum post"
            ),
            Ok(ThreadSyncOutcome::AlreadySynced) => {
                debug!(thread_id = forum_thread.id, "thread event for synced thread")
            }
            Ok(ThreadSyncOutcome::Ignored) => {}
            Err(err) => error!(
                thread_id = forum_thread.id,
                thread_name = %forum_thread.name,
                "failed to sync forum post to linear: {err}"
            ),
        }
    }
}
