/// Cache row types. These map directly to SQLite rows; `body` holds
/// ciphertext for anything written through `store_synced`.

pub struct CachedMessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    pub sent_at: i64,
    pub read_at: Option<i64>,
}

pub struct PreferenceRow {
    pub use_local_storage: bool,
    pub auto_delete_after_sync: bool,
    pub local_storage_timeout_secs: i64,
}
