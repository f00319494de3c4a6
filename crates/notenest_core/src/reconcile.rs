//! crates/notenest_core/src/reconcile.rs
//!
//! The reconciliation engine. Derived counters are recomputed from the source
//! collections (notes, reviews, reports) and the cached copy is overwritten.

use std::sync::Arc;

use futures::try_join;
use tracing::{error, info};

use crate::domain::DerivedCounters;
use crate::fanout;
use crate::notes;
use crate::ports::{DocumentStore, PortResult};
use crate::stats::StatsStore;
use crate::store::{collections, Query};

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn DocumentStore>,
    stats: StatsStore,
    in_query_batch_size: usize,
}

impl Reconciler {
    pub fn new(store: Arc<dyn DocumentStore>, stats: StatsStore, in_query_batch_size: usize) -> Self {
        Self {
            store,
            stats,
            in_query_batch_size,
        }
    }

    async fn count_notes_uploaded(&self, user_id: &str) -> PortResult<usize> {
        self.store
            .count(&Query::new(collections::NOTES).eq("uploaderId", user_id))
            .await
    }

    async fn count_reviews_given(&self, user_id: &str) -> PortResult<usize> {
        self.store
            .count(&Query::new(collections::REVIEWS).eq("userId", user_id))
            .await
    }

    async fn count_reviews_received(&self, user_id: &str) -> PortResult<usize> {
        let notes = notes::list_by_uploader(self.store.as_ref(), user_id).await?;
        let note_ids = notes::note_id_values(&notes);
        let chunk = fanout::chunk_size(self.store.as_ref(), self.in_query_batch_size);
        fanout::count_in(
            self.store.as_ref(),
            collections::REVIEWS,
            "noteId",
            &note_ids,
            chunk,
        )
        .await
    }

    async fn count_reports_submitted(&self, user_id: &str) -> PortResult<usize> {
        self.store
            .count(&Query::new(collections::REPORTS).eq("reporterId", user_id))
            .await
    }

    /// Counts the user's derived statistics straight from the source collections
    /// without touching the cache.
    pub async fn compute(&self, user_id: &str) -> PortResult<DerivedCounters> {
        let (notes, given, received, reports) = try_join!(
            self.count_notes_uploaded(user_id),
            self.count_reviews_given(user_id),
            self.count_reviews_received(user_id),
            self.count_reports_submitted(user_id),
        )?;
        Ok(DerivedCounters {
            total_notes_uploaded: notes as u64,
            total_reviews_given: given as u64,
            total_reviews_received: received as u64,
            reports_submitted: reports as u64,
        })
    }

    /// Recomputes the derived counters and overwrites the cached copy. If any query
    /// fails nothing is written and the error is returned.
    pub async fn recompute_stats(&self, user_id: &str) -> PortResult<DerivedCounters> {
        let counters = self.compute(user_id).await.map_err(|e| {
            error!(user_id, "Stats recompute failed: {}", e);
            e
        })?;
        self.stats.overwrite_derived(user_id, counters).await?;
        info!(
            user_id,
            notes = counters.total_notes_uploaded,
            reviews_given = counters.total_reviews_given,
            reviews_received = counters.total_reviews_received,
            reports = counters.reports_submitted,
            "Stats reconciled"
        );
        Ok(counters)
    }
}
