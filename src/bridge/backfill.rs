use std::time::Duration;

use tracing::{info, warn};

use super::logic::threads_after_cursor;
use super::{SyncCore, SyncError, ThreadSyncOutcome};
use crate::config::ChannelConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub channels_completed: usize,
    pub channels_skipped: usize,
    pub channels_failed: usize,
    pub threads_synced: usize,
}

impl SyncCore {
    /// One pass over every configured forum channel. Failed channels stay resumable.
    pub async fn run_backfill(&self) -> BackfillReport {
        let mut report = BackfillReport::default();

        for channel in &self.channels {
            let channel_id = channel.discord_channel_id.to_string();
            match self.db.backfill_store().get_backfill_state(&channel_id).await {
                Ok(Some(state)) if state.completed => {
                    info!(
                        channel_id = %channel_id,
                        channel_type = %channel.channel_type,
                        "backfill already completed, skipping"
                    );
                    report.channels_skipped += 1;
                    continue;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(channel_id = %channel_id, "failed to read backfill state: {err}");
                    report.channels_failed += 1;
                    continue;
                }
            }

            info!(
                channel_id = %channel_id,
                channel_type = %channel.channel_type,
                "starting backfill"
            );
            match self.backfill_channel(channel).await {
                Ok(synced) => {
                    report.channels_completed += 1;
                    report.threads_synced += synced;
                    info!(channel_id = %channel_id, synced, "backfill completed");
                }
                Err(err) => {
                    report.channels_failed += 1;
                    warn!(channel_id = %channel_id, "backfill failed: {err}");
                }
            }
        }

        report
    }

    /// Syncs the channel's unmapped active threads past the stored cursor and
    /// marks the channel completed. Returns how many issues were created.
    pub async fn backfill_channel(&self, channel: &ChannelConfig) -> Result<usize, SyncError> {
        let channel_id = channel.discord_channel_id.to_string();
        let backfill = self.db.backfill_store();
        let mappings = self.db.mapping_store();

        let cursor = backfill
            .get_backfill_state(&channel_id)
            .await?
            .and_then(|state| state.last_thread_id);

        let threads = self
            .forum
            .active_threads(channel.guild_id, channel.discord_channel_id)
            .await?;
        let threads = threads_after_cursor(threads, channel.discord_channel_id, cursor.as_deref());

        let delay = Duration::from_millis(self.sync.backfill_delay_ms);
        let mut synced = 0;
        for thread in &threads {
            let thread_id = thread.id.to_string();
            if mappings.get_by_discord_thread(&thread_id).await?.is_some() {
                continue;
            }

            match self.sync_thread(channel, thread).await {
                Ok(ThreadSyncOutcome::Created(_)) => {
                    synced += 1;
                    backfill
                        .upsert_backfill_state(&channel_id, false, Some(&thread_id))
                        .await?;
                }
                Ok(_) => {}
                Err(err) => warn!(
                    thread_id = %thread_id,
                    thread_name = %thread.name,
                    "failed to backfill thread, continuing: {err}"
                ),
            }

            tokio::time::sleep(delay).await;
        }

        backfill.upsert_backfill_state(&channel_id, true, None).await?;
        Ok(synced)
    }
}

#[cfg(test)]
mod tests {
    use super::BackfillReport;
    use crate::bridge::tests::{FORUM_ID, channel, harness, thread};

    #[tokio::test]
    async fn backfill_syncs_unmapped_threads_in_order_and_completes() {
        let h = harness().await;
        let mut foreign = thread(15);
        foreign.parent_id = Some(99);
        *h.forum.threads.lock() = vec![thread(30), foreign, thread(20)];
        h.core.sync_thread(&channel(), &thread(20)).await.expect("pre-synced");

        let report = h.core.run_backfill().await;
        assert_eq!(
            report,
            BackfillReport {
                channels_completed: 1,
                threads_synced: 1,
                ..BackfillReport::default()
            }
        );

        let titles: Vec<_> = h.tracker.created.lock().iter().map(|c| c.1.clone()).collect();
        assert_eq!(titles, vec!["Crash #20", "Crash #30"]);

        let state = h
            .db
            .backfill_store()
            .get_backfill_state(&FORUM_ID.to_string())
            .await
            .expect("state")
            .expect("row");
        assert!(state.completed);
        assert_eq!(state.last_thread_id.as_deref(), Some("30"));
    }

    #[tokio::test]
    async fn completed_channels_are_skipped() {
        let h = harness().await;
        *h.forum.threads.lock() = vec![thread(40)];
        h.db
            .backfill_store()
            .upsert_backfill_state(&FORUM_ID.to_string(), true, None)
            .await
            .expect("mark complete");

        let report = h.core.run_backfill().await;
        assert_eq!(report.channels_skipped, 1);
        assert!(h.tracker.created.lock().is_empty());
    }

    #[tokio::test]
    async fn backfill_resumes_after_cursor() {
        let h = harness().await;
        *h.forum.threads.lock() = vec![thread(50), thread(60), thread(70)];
        h.db
            .backfill_store()
            .upsert_backfill_state(&FORUM_ID.to_string(), false, Some("60"))
            .await
            .expect("cursor");

        let synced = h.core.backfill_channel(&channel()).await.expect("backfill");
        assert_eq!(synced, 1);
        let titles: Vec<_> = h.tracker.created.lock().iter().map(|c| c.1.clone()).collect();
        assert_eq!(titles, vec!["Crash #70"]);
    }
}
