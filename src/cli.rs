use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::db::DatabaseManager;

#[derive(Debug, Parser)]
#[command(name = "discord-linear-sync")]
#[command(version, about = "Mirrors Discord forum posts into Linear issues")]
pub struct Cli {
    /// Path to the YAML config file
    #[arg(long, short = 'c', env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to Discord and Linear and keep them in sync (default)
    Run,
    /// Create or upgrade the database schema and exit
    Migrate,
    /// Print stored thread to issue mappings, newest first
    Mappings {
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
}

impl Cli {
    pub fn command(&self) -> &Command {
        self.command.as_ref().unwrap_or(&Command::Run)
    }
}

pub async fn print_mappings(db: &DatabaseManager, limit: i64, offset: i64) -> Result<()> {
    let store = db.mapping_store();
    let total = store.count_mappings().await?;
    let mappings = store.list_mappings(limit, offset).await?;

    println!("{total} mapping(s)");
    for mapping in mappings {
        println!(
            "{:<8} {:<22} {:<12} {} {}",
            mapping.channel_type.as_str(),
            mapping.discord_thread_id,
            mapping.linear_identifier,
            mapping.linear_issue_id,
            mapping.created_at.to_rfc3339(),
        );
    }
    Ok(())
}
