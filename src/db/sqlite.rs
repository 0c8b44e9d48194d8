use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel::upsert::excluded;

use crate::db::schema_sqlite::{backfill_state, linear_status_cache, sync_mappings, synced_comments};

use super::{
    DatabaseError,
    models::{BackfillState, ChannelType, StatusCacheEntry, SyncMapping, SyncedComment},
};

const BUSY_TIMEOUT_MS: u32 = 5000;

// Helper function to convert DateTime to ISO string for SQLite
fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

// Rows inserted through the column defaults carry SQLite's `datetime('now')` format.
fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| DatabaseError::Query(format!("invalid datetime format '{s}': {e}")))
}

/// Orders Discord snowflakes numerically, falling back to length-then-text for
/// values that don't parse.
pub fn compare_snowflakes(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
    }
}

/// Combines a stored backfill row with new progress so the cursor never regresses.
fn merge_backfill_progress(
    existing: Option<&DbBackfillState>,
    completed: bool,
    last_thread_id: Option<&str>,
) -> (bool, Option<String>) {
    let Some(existing) = existing else {
        return (completed, last_thread_id.map(str::to_string));
    };

    let cursor = match (existing.last_thread_id.as_deref(), last_thread_id) {
        (Some(current), Some(next)) if compare_snowflakes(next, current) == Ordering::Greater => {
            Some(next.to_string())
        }
        (Some(current), _) => Some(current.to_string()),
        (None, next) => next.map(str::to_string),
    };

    (existing.completed || completed, cursor)
}

pub(crate) fn establish_connection(path: &str) -> Result<SqliteConnection, DatabaseError> {
    let mut conn =
        SqliteConnection::establish(path).map_err(|e| DatabaseError::Connection(e.to_string()))?;
    conn.batch_execute(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};"))
        .map_err(|e| DatabaseError::Connection(e.to_string()))?;
    Ok(conn)
}

async fn with_connection<T, F>(db_path: &Arc<String>, f: F) -> Result<T, DatabaseError>
where
    T: Send + 'static,
    F: FnOnce(&mut SqliteConnection) -> Result<T, DatabaseError> + Send + 'static,
{
    let db_path = db_path.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = establish_connection(&db_path)?;
        f(&mut conn)
    })
    .await
    .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
}

// SQLite uses i32 for INTEGER (primary keys), but we want to keep i64 in our API
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = sync_mappings)]
struct DbSyncMapping {
    id: i32,
    discord_thread_id: String,
    linear_issue_id: String,
    linear_identifier: String,
    channel_type: String,
    created_at: String,
}

impl DbSyncMapping {
    fn to_sync_mapping(&self) -> Result<SyncMapping, DatabaseError> {
        let channel_type = self
            .channel_type
            .parse::<ChannelType>()
            .map_err(DatabaseError::Query)?;
        Ok(SyncMapping {
            id: self.id as i64,
            discord_thread_id: self.discord_thread_id.clone(),
            linear_issue_id: self.linear_issue_id.clone(),
            linear_identifier: self.linear_identifier.clone(),
            channel_type,
            created_at: string_to_datetime(&self.created_at)?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = sync_mappings)]
struct NewSyncMapping<'a> {
    discord_thread_id: &'a str,
    linear_issue_id: &'a str,
    linear_identifier: &'a str,
    channel_type: &'a str,
    created_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = linear_status_cache)]
struct DbStatusCacheEntry {
    linear_issue_id: String,
    status_name: String,
    updated_at: String,
}

impl DbStatusCacheEntry {
    fn to_entry(&self) -> Result<StatusCacheEntry, DatabaseError> {
        Ok(StatusCacheEntry {
            linear_issue_id: self.linear_issue_id.clone(),
            status_name: self.status_name.clone(),
            updated_at: string_to_datetime(&self.updated_at)?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = linear_status_cache)]
struct NewStatusCacheEntry<'a> {
    linear_issue_id: &'a str,
    status_name: &'a str,
    updated_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = backfill_state)]
struct DbBackfillState {
    channel_id: String,
    completed: bool,
    last_thread_id: Option<String>,
    updated_at: String,
}

impl DbBackfillState {
    fn to_backfill_state(&self) -> Result<BackfillState, DatabaseError> {
        Ok(BackfillState {
            channel_id: self.channel_id.clone(),
            completed: self.completed,
            last_thread_id: self.last_thread_id.clone(),
            updated_at: string_to_datetime(&self.updated_at)?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = backfill_state)]
struct NewBackfillState<'a> {
    channel_id: &'a str,
    completed: bool,
    last_thread_id: Option<&'a str>,
    updated_at: String,
}

#[derive(AsChangeset)]
#[diesel(table_name = backfill_state, treat_none_as_null = true)]
struct UpdateBackfillState<'a> {
    completed: bool,
    last_thread_id: Option<&'a str>,
    updated_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = synced_comments)]
struct NewSyncedComment<'a> {
    linear_comment_id: &'a str,
    linear_issue_id: &'a str,
    discord_message_id: &'a str,
    created_at: String,
}

pub struct SqliteMappingStore {
    db_path: Arc<String>,
}

impl SqliteMappingStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::MappingStore for SqliteMappingStore {
    async fn get_by_discord_thread(
        &self,
        discord_thread_id: &str,
    ) -> Result<Option<SyncMapping>, DatabaseError> {
        let discord_thread_id = discord_thread_id.to_string();
        with_connection(&self.db_path, move |conn| {
            sync_mappings::table
                .filter(sync_mappings::discord_thread_id.eq(discord_thread_id))
                .select(DbSyncMapping::as_select())
                .first::<DbSyncMapping>(conn)
                .optional()?
                .map(|m| m.to_sync_mapping())
                .transpose()
        })
        .await
    }

    async fn get_by_linear_issue(
        &self,
        linear_issue_id: &str,
    ) -> Result<Option<SyncMapping>, DatabaseError> {
        let linear_issue_id = linear_issue_id.to_string();
        with_connection(&self.db_path, move |conn| {
            sync_mappings::table
                .filter(sync_mappings::linear_issue_id.eq(linear_issue_id))
                .select(DbSyncMapping::as_select())
                .first::<DbSyncMapping>(conn)
                .optional()?
                .map(|m| m.to_sync_mapping())
                .transpose()
        })
        .await
    }

    async fn create_mapping(&self, mapping: &SyncMapping) -> Result<(), DatabaseError> {
        let mapping = mapping.clone();
        with_connection(&self.db_path, move |conn| {
            let new_mapping = NewSyncMapping {
                discord_thread_id: &mapping.discord_thread_id,
                linear_issue_id: &mapping.linear_issue_id,
                linear_identifier: &mapping.linear_identifier,
                channel_type: mapping.channel_type.as_str(),
                created_at: datetime_to_string(&mapping.created_at),
            };

            diesel::insert_into(sync_mappings::table)
                .values(&new_mapping)
                .execute(conn)
                .map(|_| ())
                .map_err(DatabaseError::from)
        })
        .await
    }

    async fn count_mappings(&self) -> Result<i64, DatabaseError> {
        with_connection(&self.db_path, |conn| {
            sync_mappings::table
                .count()
                .get_result(conn)
                .map_err(DatabaseError::from)
        })
        .await
    }

    async fn list_mappings(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SyncMapping>, DatabaseError> {
        with_connection(&self.db_path, move |conn| {
            let results = sync_mappings::table
                .order(sync_mappings::id.desc())
                .limit(limit)
                .offset(offset)
                .select(DbSyncMapping::as_select())
                .load::<DbSyncMapping>(conn)?;

            results.iter().map(|m| m.to_sync_mapping()).collect()
        })
        .await
    }
}

pub struct SqliteStatusCacheStore {
    db_path: Arc<String>,
}

impl SqliteStatusCacheStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::StatusCacheStore for SqliteStatusCacheStore {
    async fn get_cached_status(
        &self,
        linear_issue_id: &str,
    ) -> Result<Option<StatusCacheEntry>, DatabaseError> {
        let linear_issue_id = linear_issue_id.to_string();
        with_connection(&self.db_path, move |conn| {
            linear_status_cache::table
                .find(linear_issue_id)
                .select(DbStatusCacheEntry::as_select())
                .first::<DbStatusCacheEntry>(conn)
                .optional()?
                .map(|e| e.to_entry())
                .transpose()
        })
        .await
    }

    async fn upsert_cached_status(
        &self,
        linear_issue_id: &str,
        status_name: &str,
    ) -> Result<(), DatabaseError> {
        let linear_issue_id = linear_issue_id.to_string();
        let status_name = status_name.to_string();
        with_connection(&self.db_path, move |conn| {
            let entry = NewStatusCacheEntry {
                linear_issue_id: &linear_issue_id,
                status_name: &status_name,
                updated_at: datetime_to_string(&Utc::now()),
            };

            diesel::insert_into(linear_status_cache::table)
                .values(&entry)
                .on_conflict(linear_status_cache::linear_issue_id)
                .do_update()
                .set((
                    linear_status_cache::status_name
                        .eq(excluded(linear_status_cache::status_name)),
                    linear_status_cache::updated_at.eq(excluded(linear_status_cache::updated_at)),
                ))
                .execute(conn)
                .map(|_| ())
                .map_err(DatabaseError::from)
        })
        .await
    }
}

pub struct SqliteBackfillStore {
    db_path: Arc<String>,
}

impl SqliteBackfillStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::BackfillStore for SqliteBackfillStore {
    async fn get_backfill_state(
        &self,
        channel_id: &str,
    ) -> Result<Option<BackfillState>, DatabaseError> {
        let channel_id = channel_id.to_string();
        with_connection(&self.db_path, move |conn| {
            backfill_state::table
                .find(channel_id)
                .select(DbBackfillState::as_select())
                .first::<DbBackfillState>(conn)
                .optional()?
                .map(|s| s.to_backfill_state())
                .transpose()
        })
        .await
    }

    async fn upsert_backfill_state(
        &self,
        channel_id: &str,
        completed: bool,
        last_thread_id: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let channel_id = channel_id.to_string();
        let last_thread_id = last_thread_id.map(str::to_string);
        with_connection(&self.db_path, move |conn| {
            conn.immediate_transaction::<_, DatabaseError, _>(|conn| {
                let existing = backfill_state::table
                    .find(channel_id.as_str())
                    .select(DbBackfillState::as_select())
                    .first::<DbBackfillState>(conn)
                    .optional()?;

                let (completed, cursor) = merge_backfill_progress(
                    existing.as_ref(),
                    completed,
                    last_thread_id.as_deref(),
                );
                let now = datetime_to_string(&Utc::now());

                if existing.is_some() {
                    let changes = UpdateBackfillState {
                        completed,
                        last_thread_id: cursor.as_deref(),
                        updated_at: now,
                    };
                    diesel::update(backfill_state::table.find(channel_id.as_str()))
                        .set(changes)
                        .execute(conn)?;
                } else {
                    let row = NewBackfillState {
                        channel_id: &channel_id,
                        completed,
                        last_thread_id: cursor.as_deref(),
                        updated_at: now,
                    };
                    diesel::insert_into(backfill_state::table)
                        .values(&row)
                        .execute(conn)?;
                }

                Ok(())
            })
        })
        .await
    }
}

pub struct SqliteCommentStore {
    db_path: Arc<String>,
}

impl SqliteCommentStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::CommentStore for SqliteCommentStore {
    async fn is_comment_synced(&self, linear_comment_id: &str) -> Result<bool, DatabaseError> {
        let linear_comment_id = linear_comment_id.to_string();
        with_connection(&self.db_path, move |conn| {
            let count: i64 = synced_comments::table
                .filter(synced_comments::linear_comment_id.eq(linear_comment_id))
                .count()
                .get_result(conn)?;
            Ok(count > 0)
        })
        .await
    }

    async fn record_synced_comment(&self, comment: &SyncedComment) -> Result<(), DatabaseError> {
        let comment = comment.clone();
        with_connection(&self.db_path, move |conn| {
            let row = NewSyncedComment {
                linear_comment_id: &comment.linear_comment_id,
                linear_issue_id: &comment.linear_issue_id,
                discord_message_id: &comment.discord_message_id,
                created_at: datetime_to_string(&comment.created_at),
            };

            diesel::insert_into(synced_comments::table)
                .values(&row)
                .execute(conn)
                .map(|_| ())
                .map_err(DatabaseError::from)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::{DbBackfillState, compare_snowflakes, merge_backfill_progress, string_to_datetime};

    fn stored(completed: bool, cursor: Option<&str>) -> DbBackfillState {
        DbBackfillState {
            channel_id: "100".to_string(),
            completed,
            last_thread_id: cursor.map(str::to_string),
            updated_at: "2024-01-01 00:00:00".to_string(),
        }
    }

    #[test]
    fn snowflakes_compare_numerically() {
        assert_eq!(compare_snowflakes("9", "10"), Ordering::Less);
        assert_eq!(compare_snowflakes("1200", "1200"), Ordering::Equal);
        assert_eq!(compare_snowflakes("abc", "ab"), Ordering::Greater);
    }

    #[test]
    fn merge_keeps_furthest_cursor() {
        let row = stored(false, Some("500"));
        assert_eq!(
            merge_backfill_progress(Some(&row), false, Some("400")),
            (false, Some("500".to_string()))
        );
        assert_eq!(
            merge_backfill_progress(Some(&row), false, Some("600")),
            (false, Some("600".to_string()))
        );
        assert_eq!(
            merge_backfill_progress(Some(&row), true, None),
            (true, Some("500".to_string()))
        );
    }

    #[test]
    fn merge_never_clears_completed() {
        let row = stored(true, None);
        assert_eq!(
            merge_backfill_progress(Some(&row), false, Some("42")),
            (true, Some("42".to_string()))
        );
    }

    #[test]
    fn merge_without_row_takes_input() {
        assert_eq!(merge_backfill_progress(None, false, None), (false, None));
    }

    #[test]
    fn datetime_accepts_sqlite_default_format() {
        let parsed = string_to_datetime("2024-03-05 10:11:12").expect("sqlite format");
        assert_eq!(parsed.to_rfc3339(), "2024-03-05T10:11:12+00:00");
        assert!(string_to_datetime("yesterday").is_err());
    }
}
