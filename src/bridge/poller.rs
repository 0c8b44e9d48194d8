use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::{SyncCore, SyncError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub issues_seen: usize,
    pub statuses_relayed: usize,
    pub comments_relayed: usize,
    pub failures: usize,
}

/// Team id -> RFC 3339 timestamp the next poll asks Linear for updates after.
pub type Watermarks = BTreeMap<String, String>;

impl SyncCore {
    fn team_ids(&self) -> BTreeSet<String> {
        self.channels
            .iter()
            .map(|channel| channel.linear_team_id.clone())
            .collect()
    }

    pub async fn run_poller(&self) {
        let start = Utc::now().to_rfc3339();
        let mut watermarks: Watermarks = self
            .team_ids()
            .into_iter()
            .map(|team_id| (team_id, start.clone()))
            .collect();

        info!(
            interval_secs = self.sync.poll_interval_secs,
            teams = watermarks.len(),
            "starting linear poller"
        );

        let mut ticker = tokio::time::interval(Duration::from_secs(self.sync.poll_interval_secs));
        // first tick fires immediately; the window starting "now" is still empty
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.poll_teams(&mut watermarks).await;
        }
    }

    /// Polls every team once. A team's watermark only moves when its poll succeeded.
    pub async fn poll_teams(&self, watermarks: &mut Watermarks) -> PollReport {
        let mut total = PollReport::default();

        for (team_id, since) in watermarks.iter_mut() {
            let now = Utc::now().to_rfc3339();
            match self.poll_once(team_id, since.as_str()).await {
                Ok(report) => {
                    *since = now;
                    total.issues_seen += report.issues_seen;
                    total.statuses_relayed += report.statuses_relayed;
                    total.comments_relayed += report.comments_relayed;
                    total.failures += report.failures;
                }
                Err(err) => {
                    error!(team_id = %team_id, "failed to poll linear for updates: {err}");
                    total.failures += 1;
                }
            }
        }

        total
    }

    pub async fn poll_once(&self, team_id: &str, since: &str) -> Result<PollReport, SyncError> {
        let updates = self.tracker.updated_issues(team_id, since).await?;
        let mut report = PollReport {
            issues_seen: updates.len(),
            ..PollReport::default()
        };
        if updates.is_empty() {
            return Ok(report);
        }
        debug!(team_id, count = updates.len(), "polled updated issues from linear");

        for update in &updates {
            // comments are relayed even when the status post failed
            match self.relay_status(update).await {
                Ok(changed) => report.statuses_relayed += usize::from(changed),
                Err(err) => {
                    report.failures += 1;
                    warn!(issue = %update.identifier, "failed to relay status change: {err}");
                }
            }

            if self.sync.relay_comments {
                match self.relay_comments(update).await {
                    Ok(relayed) => report.comments_relayed += relayed,
                    Err(err) => {
                        report.failures += 1;
                        warn!(issue = %update.identifier, "failed to relay comments: {err}");
                    }
                }
            }
        }

        Ok(report)
    }
}
