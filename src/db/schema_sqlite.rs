// SQLite schema definitions, kept in step with the statements in manager.rs

diesel::table! {
    sync_mappings (id) {
        id -> Integer,
        discord_thread_id -> Text,
        linear_issue_id -> Text,
        linear_identifier -> Text,
        channel_type -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    linear_status_cache (linear_issue_id) {
        linear_issue_id -> Text,
        status_name -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    backfill_state (channel_id) {
        channel_id -> Text,
        completed -> Bool,
        last_thread_id -> Nullable<Text>,
        updated_at -> Text,
    }
}

diesel::table! {
    synced_comments (linear_comment_id) {
        linear_comment_id -> Text,
        linear_issue_id -> Text,
        discord_message_id -> Text,
        created_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    sync_mappings,
    linear_status_cache,
    backfill_state,
    synced_comments,
);
