//! Key names shared with the read-side services.

pub const MOST_RECENT_INDEXED_BLOCK: &str = "most_recently_indexed_block_from_db";
pub const MOST_RECENT_INDEXED_BLOCKHASH: &str = "most_recently_indexed_block_hash_from_db";
pub const LATEST_CHAIN_BLOCK: &str = "latest_block_from_chain";
pub const LATEST_CHAIN_BLOCKHASH: &str = "latest_blockhash_from_chain";

pub const INDEXING_ERROR: &str = "indexing:error";

pub const CHALLENGE_EVENT_QUEUE: &str = "challenges:event_queue";
pub const BALANCE_REFRESH_QUEUE: &str = "user_balances:immediate_refresh";
pub const TASK_QUEUE: &str = "tasks:queue";
/// Index of the last trending week a calculation was queued for.
pub const TRENDING_CHALLENGE_WEEK: &str = "trending_challenge:last_week";

pub fn user_cache(user_id: i64) -> String {
    format!("user:id:{}", user_id)
}

pub fn track_cache(track_id: i64) -> String {
    format!("track:id:{}", track_id)
}

pub fn playlist_cache(playlist_id: i64) -> String {
    format!("playlist:id:{}", playlist_id)
}
