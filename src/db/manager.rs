use std::sync::Arc;

use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::db::{BackfillStore, CommentStore, DatabaseError, MappingStore, StatusCacheStore};

#[cfg(feature = "sqlite")]
use crate::db::sqlite::{
    SqliteBackfillStore, SqliteCommentStore, SqliteMappingStore, SqliteStatusCacheStore,
    establish_connection,
};
#[cfg(feature = "sqlite")]
use diesel::RunQueryDsl;

/// Schema statements, each idempotent so `migrate` can run on every start.
const SQLITE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sync_mappings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        discord_thread_id TEXT NOT NULL UNIQUE,
        linear_issue_id TEXT NOT NULL UNIQUE,
        linear_identifier TEXT NOT NULL,
        channel_type TEXT NOT NULL CHECK (channel_type IN ('feature', 'bug')),
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS linear_status_cache (
        linear_issue_id TEXT PRIMARY KEY,
        status_name TEXT NOT NULL,
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS backfill_state (
        channel_id TEXT PRIMARY KEY,
        completed BOOLEAN NOT NULL DEFAULT 0,
        last_thread_id TEXT,
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS synced_comments (
        linear_comment_id TEXT PRIMARY KEY,
        linear_issue_id TEXT NOT NULL,
        discord_message_id TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_synced_comments_issue ON synced_comments(linear_issue_id)",
];

#[derive(Clone)]
pub struct DatabaseManager {
    sqlite_path: String,
    mapping_store: Arc<dyn MappingStore>,
    status_store: Arc<dyn StatusCacheStore>,
    backfill_store: Arc<dyn BackfillStore>,
    comment_store: Arc<dyn CommentStore>,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let path = config
            .sqlite_path()
            .ok_or_else(|| DatabaseError::Connection("no sqlite database configured".to_string()))?;
        Self::open(path)
    }

    #[cfg(feature = "sqlite")]
    fn open(path: String) -> Result<Self, DatabaseError> {
        debug!(path = %path, "opening sqlite database");
        let path_arc = Arc::new(path.clone());

        Ok(Self {
            sqlite_path: path,
            mapping_store: Arc::new(SqliteMappingStore::new(path_arc.clone())),
            status_store: Arc::new(SqliteStatusCacheStore::new(path_arc.clone())),
            backfill_store: Arc::new(SqliteBackfillStore::new(path_arc.clone())),
            comment_store: Arc::new(SqliteCommentStore::new(path_arc)),
        })
    }

    #[cfg(not(feature = "sqlite"))]
    fn open(_path: String) -> Result<Self, DatabaseError> {
        Err(DatabaseError::Connection(
            "SQLite feature not enabled".to_string(),
        ))
    }

    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        #[cfg(feature = "sqlite")]
        {
            let path = self.sqlite_path.clone();
            tokio::task::spawn_blocking(move || {
                let mut conn = establish_connection(&path)?;

                for statement in SQLITE_SCHEMA {
                    diesel::sql_query(*statement)
                        .execute(&mut conn)
                        .map_err(|e| DatabaseError::Migration(e.to_string()))?;
                }

                Ok::<_, DatabaseError>(())
            })
            .await
            .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))??;

            info!(path = %self.sqlite_path, "database schema is up to date");
            Ok(())
        }

        #[cfg(not(feature = "sqlite"))]
        {
            Err(DatabaseError::Migration(
                "SQLite feature not enabled".to_string(),
            ))
        }
    }

    pub fn mapping_store(&self) -> Arc<dyn MappingStore> {
        self.mapping_store.clone()
    }

    pub fn status_store(&self) -> Arc<dyn StatusCacheStore> {
        self.status_store.clone()
    }

    pub fn backfill_store(&self) -> Arc<dyn BackfillStore> {
        self.backfill_store.clone()
    }

    pub fn comment_store(&self) -> Arc<dyn CommentStore> {
        self.comment_store.clone()
    }

    pub fn sqlite_path(&self) -> &str {
        &self.sqlite_path
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use diesel::RunQueryDsl;
    use tempfile::NamedTempFile;

    use super::DatabaseManager;
    use crate::config::DatabaseConfig;
    use crate::db::sqlite::establish_connection;
    use crate::db::{ChannelType, DatabaseError, SyncMapping, SyncedComment};

    /// Fresh migrated database; keep the file handle alive for the test's duration.
    pub(crate) async fn migrated_manager() -> (DatabaseManager, NamedTempFile) {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let config = DatabaseConfig {
            url: None,
            filename: Some(file.path().to_string_lossy().to_string()),
        };

        let manager = DatabaseManager::new(&config).await.expect("db manager");
        manager.migrate().await.expect("migrate");
        (manager, file)
    }

    #[tokio::test]
    async fn sqlite_mapping_roundtrip_and_reopen() {
        let (manager, file) = migrated_manager().await;

        manager
            .mapping_store()
            .create_mapping(&SyncMapping::new("1001", "lin-1", "ENG-1", ChannelType::Feature))
            .await
            .expect("insert mapping");

        let by_thread = manager
            .mapping_store()
            .get_by_discord_thread("1001")
            .await
            .expect("query by thread")
            .expect("mapping exists");
        assert_eq!(by_thread.linear_identifier, "ENG-1");
        assert_eq!(by_thread.channel_type, ChannelType::Feature);
        assert!(by_thread.id > 0);

        let by_issue = manager
            .mapping_store()
            .get_by_linear_issue("lin-1")
            .await
            .expect("query by issue")
            .expect("mapping exists");
        assert_eq!(by_issue, by_thread);

        let config = DatabaseConfig {
            url: Some(format!("sqlite://{}", file.path().display())),
            filename: None,
        };
        let reopened = DatabaseManager::new(&config).await.expect("reopen");
        reopened.migrate().await.expect("migrate is idempotent");

        assert_eq!(reopened.mapping_store().count_mappings().await.expect("count"), 1);
        assert!(
            reopened
                .mapping_store()
                .get_by_discord_thread("9999")
                .await
                .expect("query")
                .is_none()
        );
    }

    #[tokio::test]
    async fn duplicate_thread_or_issue_is_rejected() {
        let (manager, _file) = migrated_manager().await;
        let store = manager.mapping_store();

        store
            .create_mapping(&SyncMapping::new("1001", "lin-1", "ENG-1", ChannelType::Bug))
            .await
            .expect("first insert");

        let same_thread = store
            .create_mapping(&SyncMapping::new("1001", "lin-2", "ENG-2", ChannelType::Bug))
            .await
            .expect_err("duplicate thread");
        assert!(same_thread.is_unique_violation(), "{same_thread:?}");

        let same_issue = store
            .create_mapping(&SyncMapping::new("1002", "lin-1", "ENG-1", ChannelType::Feature))
            .await
            .expect_err("duplicate issue");
        assert!(same_issue.is_unique_violation(), "{same_issue:?}");

        assert_eq!(store.count_mappings().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn unknown_channel_type_is_rejected_by_check_constraint() {
        let (manager, _file) = migrated_manager().await;
        let mut conn = establish_connection(manager.sqlite_path()).expect("connection");

        let err = diesel::sql_query(
            "INSERT INTO sync_mappings (discord_thread_id, linear_issue_id, linear_identifier, channel_type) \
             VALUES ('2001', 'lin-9', 'ENG-9', 'task')",
        )
        .execute(&mut conn)
        .map_err(DatabaseError::from)
        .expect_err("check constraint");

        assert!(matches!(err, DatabaseError::CheckViolation(_)), "{err:?}");
    }

    #[tokio::test]
    async fn rows_written_with_column_defaults_are_readable() {
        let (manager, _file) = migrated_manager().await;
        let mut conn = establish_connection(manager.sqlite_path()).expect("connection");

        diesel::sql_query(
            "INSERT INTO sync_mappings (discord_thread_id, linear_issue_id, linear_identifier, channel_type) \
             VALUES ('3001', 'lin-3', 'ENG-3', 'bug')",
        )
        .execute(&mut conn)
        .expect("legacy insert");

        let mapping = manager
            .mapping_store()
            .get_by_discord_thread("3001")
            .await
            .expect("query")
            .expect("mapping exists");
        assert_eq!(mapping.channel_type, ChannelType::Bug);
    }

    #[tokio::test]
    async fn list_mappings_is_newest_first() {
        let (manager, _file) = migrated_manager().await;
        let store = manager.mapping_store();

        for n in 1..=3 {
            store
                .create_mapping(&SyncMapping::new(
                    format!("{n}"),
                    format!("lin-{n}"),
                    format!("ENG-{n}"),
                    ChannelType::Feature,
                ))
                .await
                .expect("insert");
        }

        let page = store.list_mappings(2, 0).await.expect("list");
        let identifiers: Vec<_> = page.iter().map(|m| m.linear_identifier.as_str()).collect();
        assert_eq!(identifiers, vec!["ENG-3", "ENG-2"]);

        let rest = store.list_mappings(2, 2).await.expect("list offset");
        assert_eq!(rest.len(), 1);
    }

    #[tokio::test]
    async fn status_cache_upsert_overwrites() {
        let (manager, _file) = migrated_manager().await;
        let store = manager.status_store();

        assert!(store.get_cached_status("lin-1").await.expect("get").is_none());

        store.upsert_cached_status("lin-1", "Todo").await.expect("insert");
        store
            .upsert_cached_status("lin-1", "In Progress")
            .await
            .expect("overwrite");

        let entry = store
            .get_cached_status("lin-1")
            .await
            .expect("get")
            .expect("entry exists");
        assert_eq!(entry.status_name, "In Progress");
    }

    #[tokio::test]
    async fn backfill_cursor_is_monotonic_and_completion_sticks() {
        let (manager, _file) = migrated_manager().await;
        let store = manager.backfill_store();

        assert!(store.get_backfill_state("500").await.expect("get").is_none());

        store
            .upsert_backfill_state("500", false, Some("900"))
            .await
            .expect("first progress");
        store
            .upsert_backfill_state("500", false, Some("850"))
            .await
            .expect("stale progress");

        let state = store
            .get_backfill_state("500")
            .await
            .expect("get")
            .expect("state exists");
        assert_eq!(state.last_thread_id.as_deref(), Some("900"));
        assert!(!state.completed);

        store
            .upsert_backfill_state("500", true, None)
            .await
            .expect("complete");
        store
            .upsert_backfill_state("500", false, Some("1000"))
            .await
            .expect("later progress");

        let state = store
            .get_backfill_state("500")
            .await
            .expect("get")
            .expect("state exists");
        assert!(state.completed);
        assert_eq!(state.last_thread_id.as_deref(), Some("1000"));
    }

    #[tokio::test]
    async fn comment_is_recorded_at_most_once() {
        let (manager, _file) = migrated_manager().await;
        let store = manager.comment_store();

        assert!(!store.is_comment_synced("c-1").await.expect("check"));

        store
            .record_synced_comment(&SyncedComment::new("c-1", "lin-1", "7001"))
            .await
            .expect("record");
        assert!(store.is_comment_synced("c-1").await.expect("check"));

        let err = store
            .record_synced_comment(&SyncedComment::new("c-1", "lin-1", "7002"))
            .await
            .expect_err("duplicate comment");
        assert!(err.is_unique_violation(), "{err:?}");
    }
}
