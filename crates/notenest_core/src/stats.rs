//! crates/notenest_core/src/stats.rs
//!
//! The aggregate counter store. Derived counters (`userStats`) and accumulators
//! (`userCounters`) live in separate documents and are written through separate
//! methods: derived counters only by full overwrite, accumulators only by atomic
//! increment.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::domain::{AccumulatedCounter, AccumulatedCounters, DerivedCounters, DerivedSnapshot};
use crate::ports::{DocumentStore, PortError, PortResult};
use crate::store::{collections, encode, Patch, WriteBatch};

#[derive(Clone)]
pub struct StatsStore {
    store: Arc<dyn DocumentStore>,
    initial_contribution_score: i64,
}

impl StatsStore {
    pub fn new(store: Arc<dyn DocumentStore>, initial_contribution_score: i64) -> Self {
        Self {
            store,
            initial_contribution_score,
        }
    }

    //=====================================================================================
    // Accumulators
    //=====================================================================================

    /// Loads the user's accumulators, creating them with the initial score if absent.
    pub async fn ensure_counters(&self, user_id: &str) -> PortResult<AccumulatedCounters> {
        if let Some(doc) = self.store.get(collections::USER_COUNTERS, user_id).await? {
            return doc.decode();
        }

        let now = Utc::now();
        let counters = AccumulatedCounters {
            user_id: user_id.to_string(),
            contribution_score: self.initial_contribution_score,
            total_notes_downloaded: 0,
            created_at: now,
            updated_at: now,
        };
        let mut batch = WriteBatch::new();
        batch.create(collections::USER_COUNTERS, user_id, encode(&counters)?);
        match self.store.commit(batch).await {
            Ok(()) => {
                debug!(user_id, "Counters created");
                Ok(counters)
            }
            // Someone else created them first; theirs win.
            Err(PortError::Conflict(_)) => self
                .store
                .get(collections::USER_COUNTERS, user_id)
                .await?
                .ok_or_else(|| PortError::NotFound(format!("counters for {}", user_id)))?
                .decode(),
            Err(e) => Err(e),
        }
    }

    fn increment_patch(counter: AccumulatedCounter, delta: i64) -> Patch {
        Patch::new()
            .increment(counter.field_name(), delta)
            .set("updatedAt", Utc::now().timestamp_millis())
    }

    /// Atomically adds `delta` to one accumulator.
    pub async fn increment(
        &self,
        user_id: &str,
        counter: AccumulatedCounter,
        delta: i64,
    ) -> PortResult<AccumulatedCounters> {
        self.ensure_counters(user_id).await?;
        self.store
            .update(
                collections::USER_COUNTERS,
                user_id,
                Self::increment_patch(counter, delta),
            )
            .await?
            .decode()
    }

    /// Adds an accumulator increment to `batch`. The counters document must already
    /// exist (see `ensure_counters`), otherwise the whole batch fails.
    pub fn stage_increment(
        &self,
        batch: &mut WriteBatch,
        user_id: &str,
        counter: AccumulatedCounter,
        delta: i64,
    ) {
        batch.update(
            collections::USER_COUNTERS,
            user_id,
            Self::increment_patch(counter, delta),
        );
    }

    //=====================================================================================
    // Derived Counters
    //=====================================================================================

    /// Replaces the cached derived counters with freshly computed values.
    pub async fn overwrite_derived(
        &self,
        user_id: &str,
        counters: DerivedCounters,
    ) -> PortResult<DerivedSnapshot> {
        let snapshot = DerivedSnapshot {
            user_id: user_id.to_string(),
            counters,
            updated_at: Utc::now(),
        };
        self.store
            .set(collections::USER_STATS, user_id, encode(&snapshot)?)
            .await?;
        Ok(snapshot)
    }

    /// The last cached derived counters, if any reconciliation ever ran.
    pub async fn load_derived(&self, user_id: &str) -> PortResult<Option<DerivedSnapshot>> {
        match self.store.get(collections::USER_STATS, user_id).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn counters_start_at_initial_score() {
        let stats = StatsStore::new(Arc::new(MemoryStore::new()), 10);
        let counters = stats.ensure_counters("u1").await.unwrap();
        assert_eq!(counters.contribution_score, 10);
        assert_eq!(counters.total_notes_downloaded, 0);

        stats
            .increment("u1", AccumulatedCounter::ContributionScore, 5)
            .await
            .unwrap();
        let again = stats.ensure_counters("u1").await.unwrap();
        assert_eq!(again.contribution_score, 15);
    }

    #[tokio::test]
    async fn increments_accumulate() {
        let stats = StatsStore::new(Arc::new(MemoryStore::new()), 10);
        stats
            .increment("u1", AccumulatedCounter::ContributionScore, 10)
            .await
            .unwrap();
        let counters = stats
            .increment("u1", AccumulatedCounter::NotesDownloaded, 1)
            .await
            .unwrap();
        assert_eq!(counters.contribution_score, 20);
        assert_eq!(counters.total_notes_downloaded, 1);
    }

    #[tokio::test]
    async fn overwriting_derived_leaves_accumulators_alone() {
        let stats = StatsStore::new(Arc::new(MemoryStore::new()), 10);
        stats
            .increment("u1", AccumulatedCounter::ContributionScore, 40)
            .await
            .unwrap();
        let derived = DerivedCounters {
            total_notes_uploaded: 4,
            ..DerivedCounters::default()
        };
        stats.overwrite_derived("u1", derived).await.unwrap();

        let cached = stats.load_derived("u1").await.unwrap().unwrap();
        assert_eq!(cached.counters, derived);
        assert_eq!(stats.ensure_counters("u1").await.unwrap().contribution_score, 50);
    }
}
