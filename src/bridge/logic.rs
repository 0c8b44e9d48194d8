use std::cmp::Ordering;

use crate::config::ChannelConfig;
use crate::db::sqlite::compare_snowflakes;

use super::ForumThread;

/// Discord rejects messages longer than this many characters.
pub(crate) const DISCORD_MESSAGE_LIMIT: usize = 2000;

pub(crate) const MISSING_BODY: &str = "(No message content available)";

/// Primary channel label first, then labels mapped from applied forum tags.
pub(crate) fn build_label_ids(channel: &ChannelConfig, applied_tags: &[u64]) -> Vec<String> {
    let mut labels = vec![channel.linear_label_id.clone()];
    for tag in applied_tags {
        if let Some(label) = channel.tag_label_map.get(&tag.to_string()) {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
    }
    labels
}

pub(crate) fn thread_url(guild_id: u64, parent_id: u64, thread_id: u64) -> String {
    format!("https://discord.com/channels/{guild_id}/{parent_id}/{thread_id}")
}

pub(crate) fn attachment_link(filename: &str, asset_url: &str) -> String {
    format!("![{filename}]({asset_url})")
}

pub(crate) fn build_issue_description(
    body: &str,
    thread_url: &str,
    attachment_links: &[String],
) -> String {
    let mut description = format!("{body}\n\n---\n[Discord Thread]({thread_url})");
    if !attachment_links.is_empty() {
        description.push_str("\n\n**Attachments:**\n");
        description.push_str(&attachment_links.join("\n"));
    }
    description
}

pub(crate) fn tracked_reply(identifier: &str, issue_url: &str) -> String {
    format!("Tracked as **[{identifier}]({issue_url})** in Linear")
}

pub(crate) fn status_change_message(identifier: &str, status: &str) -> String {
    format!("**{identifier}** status changed to **{status}**")
}

pub(crate) fn comment_message(author: &str, identifier: &str, body: &str) -> String {
    truncate_chars(
        &format!("**{author}** commented on **{identifier}**:\n{body}"),
        DISCORD_MESSAGE_LIMIT,
    )
}

pub(crate) fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated: String = value.chars().take(max_chars.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

/// Threads of one forum channel in creation order, past the backfill cursor.
pub(crate) fn threads_after_cursor(
    mut threads: Vec<ForumThread>,
    parent_id: u64,
    cursor: Option<&str>,
) -> Vec<ForumThread> {
    threads.retain(|thread| thread.parent_id == Some(parent_id));
    threads.sort_by_key(|thread| thread.id);
    if let Some(cursor) = cursor {
        threads.retain(|thread| {
            compare_snowflakes(&thread.id.to_string(), cursor) == Ordering::Greater
        });
    }
    threads
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{
        DISCORD_MESSAGE_LIMIT, build_issue_description, build_label_ids, comment_message,
        threads_after_cursor, truncate_chars,
    };
    use crate::bridge::ForumThread;
    use crate::config::ChannelConfig;
    use crate::db::ChannelType;

    fn channel() -> ChannelConfig {
        ChannelConfig {
            discord_channel_id: 10,
            guild_id: 1,
            channel_type: ChannelType::Feature,
            linear_team_id: "team".to_string(),
            linear_label_id: "label-feature".to_string(),
            tag_label_map: HashMap::from([
                ("501".to_string(), "label-ui".to_string()),
                ("502".to_string(), "label-feature".to_string()),
            ]),
        }
    }

    fn thread(id: u64, parent: u64) -> ForumThread {
        ForumThread {
            id,
            parent_id: Some(parent),
            name: format!("thread {id}"),
            applied_tags: Vec::new(),
        }
    }

    #[test]
    fn labels_start_with_primary_and_skip_unmapped_or_duplicate_tags() {
        let labels = build_label_ids(&channel(), &[999, 501, 502, 501]);
        assert_eq!(labels, vec!["label-feature", "label-ui"]);
    }

    #[test]
    fn description_links_thread_and_lists_attachments() {
        let plain = build_issue_description("body", "https://discord.test/t", &[]);
        assert_eq!(plain, "body\n\n---\n[Discord Thread](https://discord.test/t)");

        let with_files = build_issue_description(
            "body",
            "https://discord.test/t",
            &["![a.png](https://assets/a)".to_string()],
        );
        assert!(with_files.ends_with("\n\n**Attachments:**\n![a.png](https://assets/a)"));
    }

    #[test]
    fn long_comments_fit_discord_limit() {
        let body = "x".repeat(DISCORD_MESSAGE_LIMIT * 2);
        let message = comment_message("Sam", "ENG-1", &body);
        assert_eq!(message.chars().count(), DISCORD_MESSAGE_LIMIT);
        assert!(message.starts_with("**Sam** commented on **ENG-1**:\n"));
        assert!(message.ends_with('…'));
    }

    #[test]
    fn truncate_keeps_short_text_and_respects_char_boundaries() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("héllo wörld", 5), "héll…");
    }

    #[test]
    fn threads_are_filtered_sorted_and_resumed() {
        let threads = vec![thread(30, 10), thread(10, 10), thread(20, 99), thread(40, 10)];

        let all: Vec<_> = threads_after_cursor(threads.clone(), 10, None)
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(all, vec![10, 30, 40]);

        let resumed: Vec<_> = threads_after_cursor(threads, 10, Some("30"))
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(resumed, vec![40]);
    }
}
