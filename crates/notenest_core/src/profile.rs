//! crates/notenest_core/src/profile.rs
//!
//! The profile service: lazily created profiles, profile edits, user onboarding,
//! the dashboard view and the per-user read models (activity, reviews, reports).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{info, warn};

use crate::activity::ActivityLog;
use crate::domain::{
    ActivityEntry, ActivityType, ContributionLevel, Dashboard, DerivedCounters, Note, ProfilePatch,
    Report, ReportWithTitle, Review, ReviewWithTitle, UserProfile, UserStats, VerifiedIdentity,
};
use crate::error::{CoreError, CoreResult};
use crate::fanout;
use crate::notes;
use crate::policy::Policy;
use crate::ports::{DocumentStore, PortError, PortResult};
use crate::reconcile::Reconciler;
use crate::stats::StatsStore;
use crate::store::{collections, encode, Direction, Patch, Query, WriteBatch};

const WELCOME_BIO: &str =
    "Welcome to NoteNest! Update your profile to tell others about yourself.";

pub struct ProfileService {
    store: Arc<dyn DocumentStore>,
    activity: ActivityLog,
    stats: StatsStore,
    reconciler: Reconciler,
    policy: Arc<Policy>,
}

impl ProfileService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        activity: ActivityLog,
        stats: StatsStore,
        reconciler: Reconciler,
        policy: Arc<Policy>,
    ) -> Self {
        Self {
            store,
            activity,
            stats,
            reconciler,
            policy,
        }
    }

    //=====================================================================================
    // Profiles
    //=====================================================================================

    /// Creates `profile` unless one already exists, returning whichever is stored.
    async fn create_profile(&self, profile: UserProfile, mut batch: WriteBatch) -> PortResult<UserProfile> {
        batch.create(collections::USER_PROFILES, &profile.user_id, encode(&profile)?);
        match self.store.commit(batch).await {
            Ok(()) => Ok(profile),
            Err(PortError::Conflict(_)) => self
                .store
                .get(collections::USER_PROFILES, &profile.user_id)
                .await?
                .ok_or_else(|| PortError::NotFound(format!("Profile {}", profile.user_id)))?
                .decode(),
            Err(e) => Err(e),
        }
    }

    /// Loads the user's profile, creating a blank one on first access.
    pub async fn get_profile(&self, user_id: &str) -> CoreResult<UserProfile> {
        if let Some(doc) = self.store.get(collections::USER_PROFILES, user_id).await? {
            return Ok(doc.decode()?);
        }
        let profile = UserProfile::empty(user_id, Utc::now());
        Ok(self.create_profile(profile, WriteBatch::new()).await?)
    }

    /// Sets up profile, counters and the welcome activity entry for a new user.
    /// Calling it again for an existing user changes nothing.
    pub async fn initialize_user(&self, identity: &VerifiedIdentity) -> CoreResult<UserProfile> {
        if let Some(doc) = self
            .store
            .get(collections::USER_PROFILES, &identity.user_id)
            .await?
        {
            return Ok(doc.decode()?);
        }

        let mut profile = UserProfile::empty(&identity.user_id, Utc::now());
        profile.display_name = match identity.email_handle() {
            "" => "Student".to_string(),
            handle => handle.to_string(),
        };
        profile.email = identity.email.clone();
        profile.bio = WELCOME_BIO.to_string();

        let mut batch = WriteBatch::new();
        self.activity.stage(
            &mut batch,
            &identity.user_id,
            ActivityType::ProfileCreated,
            &identity.user_id,
            None,
            "Welcome to NoteNest! Your account has been created.".to_string(),
        )?;
        let profile = self.create_profile(profile, batch).await?;
        self.stats.ensure_counters(&identity.user_id).await?;

        info!(user_id = %identity.user_id, "User initialized");
        Ok(profile)
    }

    pub async fn update_profile(
        &self,
        caller: &VerifiedIdentity,
        patch: ProfilePatch,
    ) -> CoreResult<UserProfile> {
        if patch.is_empty() {
            return Err(CoreError::Validation("Nothing to update".to_string()));
        }
        let mut profile = self.get_profile(&caller.user_id).await?;

        let mut changes = Patch::new();
        let fields = [
            ("displayName", patch.display_name, &mut profile.display_name),
            ("bio", patch.bio, &mut profile.bio),
            ("university", patch.university, &mut profile.university),
            ("major", patch.major, &mut profile.major),
            ("academicYear", patch.academic_year, &mut profile.academic_year),
        ];
        for (name, value, slot) in fields {
            if let Some(value) = value {
                let value = value.trim().to_string();
                changes = changes.set(name, value.clone());
                *slot = value;
            }
        }
        profile.is_profile_complete = profile.compute_complete();
        profile.updated_at = Utc::now();
        changes = changes
            .set("isProfileComplete", profile.is_profile_complete)
            .set("updatedAt", profile.updated_at.timestamp_millis());

        let mut batch = WriteBatch::new();
        batch.update(collections::USER_PROFILES, &caller.user_id, changes);
        self.activity.stage(
            &mut batch,
            &caller.user_id,
            ActivityType::ProfileUpdated,
            &caller.user_id,
            None,
            "Updated profile information".to_string(),
        )?;
        self.store.commit(batch).await?;

        info!(user_id = %caller.user_id, complete = profile.is_profile_complete, "Profile updated");
        Ok(profile)
    }

    //=====================================================================================
    // Dashboard
    //=====================================================================================

    /// The merged profile and statistics view. Derived counters are reconciled on
    /// every call; if that fails the last cached values are served and the view is
    /// marked stale.
    pub async fn dashboard(&self, user_id: &str) -> CoreResult<Dashboard> {
        let profile = self.get_profile(user_id).await?;
        let accumulated = self.stats.ensure_counters(user_id).await?;

        let (derived, stale) = match self.reconciler.recompute_stats(user_id).await {
            Ok(counters) => (counters, false),
            Err(e) => {
                warn!(user_id, "Reconciliation failed, serving cached stats: {}", e);
                let cached = match self.stats.load_derived(user_id).await {
                    Ok(snapshot) => snapshot.map(|s| s.counters),
                    Err(e) => {
                        warn!(user_id, "Cached stats unavailable: {}", e);
                        None
                    }
                };
                (cached.unwrap_or_default(), true)
            }
        };

        Ok(Dashboard {
            profile,
            stats: UserStats {
                derived,
                contribution_score: accumulated.contribution_score,
                total_notes_downloaded: accumulated.total_notes_downloaded,
                contribution_level: ContributionLevel::for_score(accumulated.contribution_score),
                stale,
            },
        })
    }

    /// Recomputes the user's derived counters and surfaces any failure. Used by
    /// maintenance to repair drifted caches.
    pub async fn fix_user_stats(&self, user_id: &str) -> CoreResult<DerivedCounters> {
        Ok(self.reconciler.recompute_stats(user_id).await?)
    }

    //=====================================================================================
    // Read Models
    //=====================================================================================

    pub async fn recent_activity(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> CoreResult<Vec<ActivityEntry>> {
        let limit = limit.unwrap_or(self.policy.default_page_size);
        Ok(self.activity.recent(user_id, limit).await?)
    }

    async fn note_title(&self, note_id: &str, missing: &str) -> String {
        match self.store.get(collections::NOTES, note_id).await {
            Ok(Some(doc)) => match doc.decode::<Note>() {
                Ok(note) if !note.title.trim().is_empty() => note.title,
                Ok(_) => "Untitled Note".to_string(),
                Err(e) => {
                    warn!(note_id, "Unreadable note: {}", e);
                    "Note Access Error".to_string()
                }
            },
            Ok(None) => missing.to_string(),
            Err(e) => {
                warn!(note_id, "Could not fetch note title: {}", e);
                "Note Access Error".to_string()
            }
        }
    }

    pub async fn reviews_given(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> CoreResult<Vec<ReviewWithTitle>> {
        let query = Query::new(collections::REVIEWS)
            .eq("userId", user_id)
            .order_by("createdAt", Direction::Desc)
            .limit(limit.unwrap_or(self.policy.default_page_size));
        let reviews = self
            .store
            .query(&query)
            .await?
            .iter()
            .map(|doc| doc.decode::<Review>())
            .collect::<PortResult<Vec<_>>>()?;

        let titles = join_all(
            reviews
                .iter()
                .map(|r| self.note_title(&r.note_id, "Unknown Note")),
        )
        .await;
        Ok(reviews
            .into_iter()
            .zip(titles)
            .map(|(review, note_title)| ReviewWithTitle { review, note_title })
            .collect())
    }

    /// Every review left on any of the user's notes, newest first.
    pub async fn reviews_received(&self, user_id: &str) -> CoreResult<Vec<ReviewWithTitle>> {
        let notes = notes::list_by_uploader(self.store.as_ref(), user_id).await?;
        if notes.is_empty() {
            return Ok(Vec::new());
        }
        let chunk = fanout::chunk_size(self.store.as_ref(), self.policy.in_query_batch_size);
        let docs = fanout::query_in(
            self.store.as_ref(),
            collections::REVIEWS,
            "noteId",
            &notes::note_id_values(&notes),
            chunk,
        )
        .await?;

        let titles: HashMap<&str, &str> = notes
            .iter()
            .map(|n| (n.id.as_str(), n.title.as_str()))
            .collect();
        let mut received = docs
            .iter()
            .map(|doc| {
                let review: Review = doc.decode()?;
                let note_title = titles
                    .get(review.note_id.as_str())
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "Unknown Note".to_string());
                Ok(ReviewWithTitle { review, note_title })
            })
            .collect::<PortResult<Vec<_>>>()?;
        received.sort_by(|a, b| b.review.created_at.cmp(&a.review.created_at));
        Ok(received)
    }

    pub async fn reports_submitted(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> CoreResult<Vec<ReportWithTitle>> {
        let query = Query::new(collections::REPORTS)
            .eq("reporterId", user_id)
            .order_by("createdAt", Direction::Desc)
            .limit(limit.unwrap_or(self.policy.default_page_size));
        let reports = self
            .store
            .query(&query)
            .await?
            .iter()
            .map(|doc| doc.decode::<Report>())
            .collect::<PortResult<Vec<_>>>()?;

        let titles = join_all(
            reports
                .iter()
                .map(|r| self.note_title(&r.note_id, "Note No Longer Exists")),
        )
        .await;
        Ok(reports
            .into_iter()
            .zip(titles)
            .map(|(report, note_title)| ReportWithTitle { report, note_title })
            .collect())
    }
}
