use async_trait::async_trait;

use super::DatabaseError;
use super::models::{BackfillState, StatusCacheEntry, SyncMapping, SyncedComment};

#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn get_by_discord_thread(
        &self,
        discord_thread_id: &str,
    ) -> Result<Option<SyncMapping>, DatabaseError>;
    async fn get_by_linear_issue(
        &self,
        linear_issue_id: &str,
    ) -> Result<Option<SyncMapping>, DatabaseError>;
    /// Fails with `UniqueViolation` when either side is already mapped.
    async fn create_mapping(&self, mapping: &SyncMapping) -> Result<(), DatabaseError>;
    async fn count_mappings(&self) -> Result<i64, DatabaseError>;
    async fn list_mappings(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SyncMapping>, DatabaseError>;
}

#[async_trait]
pub trait StatusCacheStore: Send + Sync {
    async fn get_cached_status(
        &self,
        linear_issue_id: &str,
    ) -> Result<Option<StatusCacheEntry>, DatabaseError>;
    async fn upsert_cached_status(
        &self,
        linear_issue_id: &str,
        status_name: &str,
    ) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait BackfillStore: Send + Sync {
    async fn get_backfill_state(
        &self,
        channel_id: &str,
    ) -> Result<Option<BackfillState>, DatabaseError>;
    /// Merges into the stored row: `completed` is sticky and the cursor never moves back.
    async fn upsert_backfill_state(
        &self,
        channel_id: &str,
        completed: bool,
        last_thread_id: Option<&str>,
    ) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait CommentStore: Send + Sync {
    async fn is_comment_synced(&self, linear_comment_id: &str) -> Result<bool, DatabaseError>;
    /// Fails with `UniqueViolation` when the comment was already recorded.
    async fn record_synced_comment(&self, comment: &SyncedComment) -> Result<(), DatabaseError>;
}
