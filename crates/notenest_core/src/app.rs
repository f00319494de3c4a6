//! crates/notenest_core/src/app.rs
//!
//! Wires the services over one set of adapters so that every service shares the
//! same store, activity log and policy.

use std::sync::Arc;

use crate::activity::ActivityLog;
use crate::feedback::FeedbackPipeline;
use crate::identity::Authenticator;
use crate::notes::NoteLifecycle;
use crate::policy::Policy;
use crate::ports::{BlobStore, DocumentStore, FlashcardGenerator, IdentityVerifier};
use crate::profile::ProfileService;
use crate::reconcile::Reconciler;
use crate::stats::StatsStore;

pub struct NoteNest {
    pub auth: Authenticator,
    pub profiles: ProfileService,
    pub notes: NoteLifecycle,
    pub feedback: FeedbackPipeline,
    pub reconciler: Reconciler,
    pub activity: ActivityLog,
    pub policy: Arc<Policy>,
}

impl NoteNest {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        verifier: Arc<dyn IdentityVerifier>,
        flashcards: Arc<dyn FlashcardGenerator>,
        policy: Policy,
    ) -> Self {
        let policy = Arc::new(policy);
        let activity = ActivityLog::new(store.clone());
        let stats = StatsStore::new(store.clone(), policy.initial_contribution_score);
        let reconciler = Reconciler::new(store.clone(), stats.clone(), policy.in_query_batch_size);

        Self {
            auth: Authenticator::new(verifier),
            profiles: ProfileService::new(
                store.clone(),
                activity.clone(),
                stats.clone(),
                reconciler.clone(),
                policy.clone(),
            ),
            notes: NoteLifecycle::new(
                store.clone(),
                blobs,
                flashcards,
                activity.clone(),
                stats,
                policy.clone(),
            ),
            feedback: FeedbackPipeline::new(store, activity.clone(), policy.clone()),
            reconciler,
            activity,
            policy,
        }
    }

    /// Removes activity entries older than the configured retention window.
    pub async fn prune_activity(&self) -> crate::error::CoreResult<usize> {
        let cutoff = chrono::Utc::now() - self.policy.activity_retention;
        Ok(self
            .activity
            .prune(cutoff, self.policy.default_page_size.max(100))
            .await?)
    }
}
