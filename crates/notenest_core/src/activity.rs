//! crates/notenest_core/src/activity.rs
//!
//! The append-only user activity log. Entries are never updated; the only removal
//! path is the retention prune run by maintenance.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{ActivityEntry, ActivityType};
use crate::ports::{DocumentStore, PortResult};
use crate::store::{collections, encode, Direction, Query, WriteBatch};

#[derive(Clone)]
pub struct ActivityLog {
    store: Arc<dyn DocumentStore>,
}

impl ActivityLog {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn entry(
        user_id: &str,
        activity_type: ActivityType,
        target_id: &str,
        target_title: Option<&str>,
        description: String,
    ) -> ActivityEntry {
        ActivityEntry {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            activity_type,
            target_id: target_id.to_string(),
            target_title: target_title.map(str::to_string),
            description,
            created_at: Utc::now(),
        }
    }

    /// Adds an entry to `batch` so it is appended exactly when the batch commits.
    pub fn stage(
        &self,
        batch: &mut WriteBatch,
        user_id: &str,
        activity_type: ActivityType,
        target_id: &str,
        target_title: Option<&str>,
        description: String,
    ) -> PortResult<ActivityEntry> {
        let entry = Self::entry(user_id, activity_type, target_id, target_title, description);
        batch.create(collections::ACTIVITY_LOG, &entry.id, encode(&entry)?);
        Ok(entry)
    }

    /// Appends a single entry on its own.
    pub async fn record(
        &self,
        user_id: &str,
        activity_type: ActivityType,
        target_id: &str,
        target_title: Option<&str>,
        description: String,
    ) -> PortResult<ActivityEntry> {
        let mut batch = WriteBatch::new();
        let entry = self.stage(
            &mut batch,
            user_id,
            activity_type,
            target_id,
            target_title,
            description,
        )?;
        self.store.commit(batch).await?;
        debug!(user_id, ?activity_type, "Activity recorded");
        Ok(entry)
    }

    /// The user's most recent entries, newest first.
    pub async fn recent(&self, user_id: &str, limit: usize) -> PortResult<Vec<ActivityEntry>> {
        let query = Query::new(collections::ACTIVITY_LOG)
            .eq("userId", user_id)
            .order_by("createdAt", Direction::Desc)
            .limit(limit);
        self.store
            .query(&query)
            .await?
            .iter()
            .map(|doc| doc.decode())
            .collect()
    }

    /// Deletes every entry created before `cutoff`, `page_size` entries per batch.
    /// Returns the number of entries removed.
    pub async fn prune(&self, cutoff: DateTime<Utc>, page_size: usize) -> PortResult<usize> {
        let page_size = page_size.max(1);
        let mut removed = 0;
        loop {
            let query = Query::new(collections::ACTIVITY_LOG)
                .lt("createdAt", cutoff.timestamp_millis())
                .limit(page_size);
            let expired = self.store.query(&query).await?;
            if expired.is_empty() {
                break;
            }
            let mut batch = WriteBatch::new();
            for doc in &expired {
                batch.delete(collections::ACTIVITY_LOG, &doc.id);
            }
            self.store.commit(batch).await?;
            removed += expired.len();
            if expired.len() < page_size {
                break;
            }
        }
        info!(removed, %cutoff, "Activity log pruned");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::Duration;

    #[tokio::test]
    async fn recent_is_newest_first_and_limited() {
        let store = Arc::new(MemoryStore::new());
        let log = ActivityLog::new(store.clone());
        for i in 0..3 {
            log.record("u1", ActivityType::NoteUpload, &format!("n{}", i), None, format!("Uploaded {}", i))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        log.record("u2", ActivityType::NoteUpload, "x", None, "Other".into())
            .await
            .unwrap();

        let recent = log.recent("u1", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].target_id, "n2");
        assert_eq!(recent[1].target_id, "n1");
    }

    #[tokio::test]
    async fn prune_removes_only_expired_entries() {
        let store = Arc::new(MemoryStore::new());
        let log = ActivityLog::new(store.clone());
        for i in 0..5 {
            log.record("u1", ActivityType::NoteDownload, &format!("n{}", i), None, "old".into())
                .await
                .unwrap();
        }
        let cutoff = Utc::now() + Duration::seconds(1);
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        log.record("u1", ActivityType::NoteDownload, "fresh", None, "new".into())
            .await
            .unwrap();

        let removed = log.prune(cutoff, 2).await.unwrap();
        assert_eq!(removed, 5);
        let left = log.recent("u1", 10).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].target_id, "fresh");
    }
}
