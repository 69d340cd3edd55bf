use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, warn};

use roam_crypto::{encrypt, open_cached};
use roam_types::models::{ConversationId, Message, MessageId, StoragePreference, UserId};

use crate::LocalCache;
use crate::models::{CachedMessageRow, PreferenceRow};

impl LocalCache {
    // -- Preferences --

    /// Preferences for `owner`, persisting the defaults on first use.
    pub fn preferences(&self, owner: &UserId) -> Result<StoragePreference> {
        self.with_conn(|conn| {
            if let Some(row) = query_preferences(conn, owner.as_str())? {
                return Ok(StoragePreference {
                    use_local_storage: row.use_local_storage,
                    auto_delete_after_sync: row.auto_delete_after_sync,
                    local_storage_timeout: Duration::from_secs(
                        row.local_storage_timeout_secs.max(0) as u64,
                    ),
                });
            }

            let defaults = StoragePreference::default();
            upsert_preferences(conn, owner.as_str(), &defaults)?;
            Ok(defaults)
        })
    }

    pub fn set_preferences(&self, owner: &UserId, pref: &StoragePreference) -> Result<()> {
        self.with_conn(|conn| upsert_preferences(conn, owner.as_str(), pref))
    }

    // -- Messages --

    /// Record a message the store has confirmed. Returns whether a copy was kept.
    ///
    /// Nothing is kept when local storage is off. With auto-delete-after-sync a
    /// confirmed message is not retained and any earlier copy is dropped.
    pub fn store_synced(&self, owner: &UserId, message: &Message) -> Result<bool> {
        let pref = self.preferences(owner)?;
        if !pref.use_local_storage {
            return Ok(false);
        }

        if pref.auto_delete_after_sync {
            self.with_conn(|conn| {
                let tx = conn.unchecked_transaction()?;
                tx.execute(
                    "DELETE FROM cached_messages WHERE owner_id = ?1 AND id = ?2",
                    (owner.as_str(), message.id.as_str()),
                )?;
                prune_empty_buckets(&tx, owner.as_str())?;
                tx.commit()?;
                Ok(())
            })?;
            return Ok(false);
        }

        let body = encrypt(&message.body, owner)?;
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO cache_buckets (owner_id, conversation_id, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(owner_id, conversation_id) DO UPDATE SET updated_at = excluded.updated_at",
                (
                    owner.as_str(),
                    message.conversation_id.as_str(),
                    Utc::now().timestamp_millis(),
                ),
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO cached_messages
                    (owner_id, id, conversation_id, sender_id, body, sent_at, read_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    owner.as_str(),
                    message.id.as_str(),
                    message.conversation_id.as_str(),
                    message.sender_id.as_str(),
                    body,
                    message.sent_at.timestamp_millis(),
                    message.read_at.map(|t| t.timestamp_millis()),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })?;

        debug!("Cached message {} for {}", message.id, owner);
        Ok(true)
    }

    /// Cached messages of one conversation, oldest first, bodies decrypted.
    pub fn load_bucket(&self, owner: &UserId, conversation_id: &ConversationId) -> Result<Vec<Message>> {
        let rows = self.with_conn(|conn| query_bucket(conn, owner.as_str(), conversation_id.as_str()))?;
        Ok(rows.into_iter().map(|row| row_to_message(row, owner)).collect())
    }

    pub fn bucket_ids(&self, owner: &UserId) -> Result<Vec<ConversationId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_id FROM cache_buckets WHERE owner_id = ?1 ORDER BY conversation_id",
            )?;
            let ids = stmt
                .query_map([owner.as_str()], |row| row.get::<_, String>(0))?
                .map(|id| id.map(ConversationId::from))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }
}

/// Delete buckets of `owner` that no longer hold any message.
pub(crate) fn prune_empty_buckets(conn: &Connection, owner: &str) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM cache_buckets
         WHERE owner_id = ?1
           AND NOT EXISTS (
               SELECT 1 FROM cached_messages m
               WHERE m.owner_id = cache_buckets.owner_id
                 AND m.conversation_id = cache_buckets.conversation_id
           )",
        [owner],
    )?;
    Ok(removed)
}

fn upsert_preferences(conn: &Connection, owner: &str, pref: &StoragePreference) -> Result<()> {
    let timeout_secs = i64::try_from(pref.local_storage_timeout.as_secs()).unwrap_or(i64::MAX);
    conn.execute(
        "INSERT INTO storage_preferences
            (owner_id, use_local_storage, auto_delete_after_sync, local_storage_timeout_secs)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(owner_id) DO UPDATE SET
            use_local_storage = excluded.use_local_storage,
            auto_delete_after_sync = excluded.auto_delete_after_sync,
            local_storage_timeout_secs = excluded.local_storage_timeout_secs",
        rusqlite::params![owner, pref.use_local_storage, pref.auto_delete_after_sync, timeout_secs],
    )?;
    Ok(())
}

fn query_preferences(conn: &Connection, owner: &str) -> Result<Option<PreferenceRow>> {
    let mut stmt = conn.prepare(
        "SELECT use_local_storage, auto_delete_after_sync, local_storage_timeout_secs
         FROM storage_preferences WHERE owner_id = ?1",
    )?;

    let row = stmt
        .query_row([owner], |row| {
            Ok(PreferenceRow {
                use_local_storage: row.get(0)?,
                auto_delete_after_sync: row.get(1)?,
                local_storage_timeout_secs: row.get(2)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_bucket(conn: &Connection, owner: &str, conversation_id: &str) -> Result<Vec<CachedMessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, sender_id, body, sent_at, read_at
         FROM cached_messages
         WHERE owner_id = ?1 AND conversation_id = ?2
         ORDER BY sent_at ASC, id ASC",
    )?;

    let rows = stmt
        .query_map((owner, conversation_id), |row| {
            Ok(CachedMessageRow {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                sender_id: row.get(2)?,
                body: row.get(3)?,
                sent_at: row.get(4)?,
                read_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn row_to_message(row: CachedMessageRow, owner: &UserId) -> Message {
    let sent_at = DateTime::<Utc>::from_timestamp_millis(row.sent_at).unwrap_or_else(|| {
        warn!("Corrupt sent_at {} on cached message '{}'", row.sent_at, row.id);
        DateTime::default()
    });

    Message {
        body: open_cached(&row.body, owner),
        id: MessageId::from(row.id),
        conversation_id: ConversationId::from(row.conversation_id),
        sender_id: UserId::from(row.sender_id),
        sent_at,
        read_at: row.read_at.and_then(DateTime::<Utc>::from_timestamp_millis),
    }
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
