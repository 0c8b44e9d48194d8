#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use secrecy::{ExposeSecret, SecretString};
use tracing::{error, info};

mod bridge;
mod cli;
mod config;
mod db;
mod discord;
mod linear;
mod utils;

use bridge::SyncCore;
use cli::{Cli, Command};
use config::Config;
use db::DatabaseManager;
use discord::{DiscordClient, ThreadEventHandler};
use linear::LinearClient;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_from_file(&cli.config)?;
    utils::logging::init_tracing(&config.logging);

    let db_manager = Arc::new(DatabaseManager::new(&config.database).await?);
    db_manager.migrate().await?;

    match cli.command() {
        Command::Migrate => {
            info!(path = db_manager.sqlite_path(), "migrations applied, exiting");
            Ok(())
        }
        Command::Mappings { limit, offset } => {
            cli::print_mappings(&db_manager, *limit, *offset).await
        }
        Command::Run => run(config, db_manager).await,
    }
}

async fn run(config: Config, db_manager: Arc<DatabaseManager>) -> Result<()> {
    info!(
        channels = config.channels.len(),
        "discord-linear sync starting up"
    );

    let linear_client = Arc::new(LinearClient::new(
        SecretString::from(config.linear.api_key.expose_secret().to_string()),
        config.linear.api_url.clone(),
    ));
    let discord_client = Arc::new(DiscordClient::new(SecretString::from(
        config.discord.bot_token.expose_secret().to_string(),
    )));

    let core = Arc::new(SyncCore::new(
        config.sync.clone(),
        config.channels.clone(),
        db_manager,
        discord_client.clone(),
        linear_client,
    ));

    let gateway_client = discord_client.clone();
    let handler = ThreadEventHandler::new(core.clone());
    let gateway_handle = tokio::spawn(async move {
        gateway_client.run_gateway(handler).await;
    });

    let sync_core = core.clone();
    let backfill_on_start = config.sync.backfill_on_start;
    let poller_handle = tokio::spawn(async move {
        if backfill_on_start {
            let report = sync_core.run_backfill().await;
            info!(
                completed = report.channels_completed,
                skipped = report.channels_skipped,
                failed = report.channels_failed,
                synced = report.threads_synced,
                "startup backfill finished"
            );
        }
        sync_core.run_poller().await;
    });

    tokio::select! {
        result = gateway_handle => {
            if let Err(err) = result {
                error!("discord gateway task ended: {err}");
            }
        }
        result = poller_handle => {
            if let Err(err) = result {
                error!("linear poller task ended: {err}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    info!("discord-linear sync shutting down");
    Ok(())
}
