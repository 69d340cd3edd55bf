use anyhow::Result;
use rusqlite::Connection;
use tracing::debug;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS storage_preferences (
            owner_id                    TEXT PRIMARY KEY,
            use_local_storage           INTEGER NOT NULL,
            auto_delete_after_sync      INTEGER NOT NULL,
            local_storage_timeout_secs  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cache_buckets (
            owner_id        TEXT NOT NULL,
            conversation_id TEXT NOT NULL,
            updated_at      INTEGER NOT NULL,
            PRIMARY KEY (owner_id, conversation_id)
        );

        -- sent_at / read_at are unix milliseconds
        CREATE TABLE IF NOT EXISTS cached_messages (
            owner_id        TEXT NOT NULL,
            id              TEXT NOT NULL,
            conversation_id TEXT NOT NULL,
            sender_id       TEXT NOT NULL,
            body            TEXT NOT NULL,
            sent_at         INTEGER NOT NULL,
            read_at         INTEGER,
            PRIMARY KEY (owner_id, id),
            FOREIGN KEY (owner_id, conversation_id)
                REFERENCES cache_buckets(owner_id, conversation_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_cached_messages_bucket
            ON cached_messages(owner_id, conversation_id, sent_at);
        ",
    )?;

    debug!("Cache migrations complete");
    Ok(())
}
