use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use roam_types::UserId;

use crate::LocalCache;
use crate::queries::prune_empty_buckets;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub messages_removed: usize,
    pub buckets_removed: usize,
}

impl LocalCache {
    /// Drop cached messages of `owner` older than their retention window.
    pub fn purge_expired(&self, owner: &UserId) -> Result<PurgeReport> {
        self.purge_expired_at(owner, Utc::now())
    }

    /// Same as [`purge_expired`](Self::purge_expired) against an explicit clock.
    ///
    /// A message is expired when `now - sent_at` exceeds the owner's
    /// `local_storage_timeout`. Buckets left empty are removed. Only the local
    /// cache is touched.
    pub fn purge_expired_at(&self, owner: &UserId, now: DateTime<Utc>) -> Result<PurgeReport> {
        let pref = self.preferences(owner)?;
        let timeout_ms = i64::try_from(pref.local_storage_timeout.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now.timestamp_millis().saturating_sub(timeout_ms);

        let report = self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let messages_removed = tx.execute(
                "DELETE FROM cached_messages WHERE owner_id = ?1 AND sent_at < ?2",
                (owner.as_str(), cutoff),
            )?;
            let buckets_removed = prune_empty_buckets(&tx, owner.as_str())?;
            tx.commit()?;
            Ok(PurgeReport {
                messages_removed,
                buckets_removed,
            })
        })?;

        if report.messages_removed > 0 {
            info!(
                "Retention: purged {} cached messages ({} buckets) for {}",
                report.messages_removed, report.buckets_removed, owner
            );
        }
        Ok(report)
    }
}

/// Coarse periodic sweep over a fixed set of owners.
///
/// Intended to run as a background task with an interval of minutes or hours,
/// never from a render path.
pub async fn run_retention_loop(cache: Arc<LocalCache>, owners: Vec<UserId>, interval: Duration) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;

        for owner in &owners {
            if let Err(e) = cache.purge_expired(owner) {
                warn!("Retention sweep error for {}: {}", owner, e);
            }
        }
    }
}
