//! crates/notenest_core/src/feedback.rs
//!
//! The review and report submission pipeline. Each user may review a note once and
//! report it once. Ratings are kept as a running sum and count on the note so that
//! concurrent reviews only ever increment; the mean is computed on read. Reports go
//! through an optimistic transaction on the note so the hide threshold is applied
//! in the same write that reaches it.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::activity::ActivityLog;
use crate::domain::{
    ActivityType, EntryStatus, Note, Report, ReportStatus, Review, UserProfile, VerifiedIdentity,
};
use crate::error::{CoreError, CoreResult};
use crate::policy::Policy;
use crate::ports::{DocumentStore, PortError};
use crate::store::{collections, encode, Direction, Patch, Query, WriteBatch};

/// Reviews and reports are keyed by (note, author) so the store itself refuses a
/// second document for the same pair.
pub fn pair_id(note_id: &str, user_id: &str) -> String {
    format!("{}_{}", note_id, user_id)
}

pub struct FeedbackPipeline {
    store: Arc<dyn DocumentStore>,
    activity: ActivityLog,
    policy: Arc<Policy>,
}

impl FeedbackPipeline {
    pub fn new(store: Arc<dyn DocumentStore>, activity: ActivityLog, policy: Arc<Policy>) -> Self {
        Self {
            store,
            activity,
            policy,
        }
    }

    async fn load_note(&self, note_id: &str) -> CoreResult<(Note, u64)> {
        let doc = self
            .store
            .get(collections::NOTES, note_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Note {}", note_id)))?;
        Ok((doc.decode()?, doc.version))
    }

    async fn reviewer_name(&self, caller: &VerifiedIdentity) -> CoreResult<String> {
        let profile = self
            .store
            .get(collections::USER_PROFILES, &caller.user_id)
            .await?
            .map(|doc| doc.decode::<UserProfile>())
            .transpose()?;
        Ok(profile
            .map(|p| p.display_name)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| caller.email_handle().to_string()))
    }

    //=====================================================================================
    // Reviews
    //=====================================================================================

    pub async fn submit_review(
        &self,
        caller: &VerifiedIdentity,
        note_id: &str,
        rating: u8,
        comment: Option<&str>,
    ) -> CoreResult<Review> {
        if !(1..=5).contains(&rating) {
            return Err(CoreError::Validation(
                "Rating must be between 1 and 5".to_string(),
            ));
        }
        let comment = comment.map(str::trim).unwrap_or_default().to_string();

        let (note, _) = self.load_note(note_id).await?;
        let review_id = pair_id(note_id, &caller.user_id);
        if self
            .store
            .get(collections::REVIEWS, &review_id)
            .await?
            .is_some()
        {
            return Err(CoreError::AlreadyReviewed);
        }

        let review = Review {
            id: review_id,
            note_id: note_id.to_string(),
            user_id: caller.user_id.clone(),
            user_name: self.reviewer_name(caller).await?,
            rating,
            comment,
            created_at: Utc::now(),
            status: EntryStatus::Active,
        };

        let mut counters = Patch::new()
            .increment("ratingSum", i64::from(rating))
            .increment("totalRatings", 1)
            .set("lastReviewAt", review.created_at.timestamp_millis());
        if !review.comment.is_empty() {
            counters = counters.increment("totalComments", 1);
        }

        let mut batch = WriteBatch::new();
        batch.create(collections::REVIEWS, &review.id, encode(&review)?);
        batch.update(collections::NOTES, note_id, counters);
        self.activity.stage(
            &mut batch,
            &caller.user_id,
            ActivityType::ReviewGiven,
            note_id,
            Some(note.display_title()),
            format!("Reviewed note: {}", note.display_title()),
        )?;

        match self.store.commit(batch).await {
            Ok(()) => {
                info!(note_id, user_id = %caller.user_id, rating, "Review submitted");
                Ok(review)
            }
            Err(PortError::Conflict(_)) => Err(CoreError::AlreadyReviewed),
            Err(PortError::NotFound(_)) => Err(CoreError::NotFound(format!("Note {}", note_id))),
            Err(e) => Err(e.into()),
        }
    }

    /// Every review of a note, newest first.
    pub async fn reviews_for_note(&self, note_id: &str) -> CoreResult<Vec<Review>> {
        let query = Query::new(collections::REVIEWS)
            .eq("noteId", note_id)
            .order_by("createdAt", Direction::Desc);
        let reviews = self
            .store
            .query(&query)
            .await?
            .iter()
            .map(|doc| doc.decode())
            .collect::<Result<Vec<Review>, _>>()?;
        Ok(reviews)
    }

    //=====================================================================================
    // Reports
    //=====================================================================================

    /// Records a report and bumps the note's flag count, hiding the note once the
    /// count reaches the threshold. Lost races against other writers of the same note
    /// are retried a bounded number of times.
    pub async fn submit_report(
        &self,
        caller: &VerifiedIdentity,
        note_id: &str,
        reason: &str,
        description: Option<&str>,
    ) -> CoreResult<Report> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(CoreError::Validation(
                "Please select a reason for reporting".to_string(),
            ));
        }
        let report_id = pair_id(note_id, &caller.user_id);

        for attempt in 0..=self.policy.max_conflict_retries {
            if self
                .store
                .get(collections::REPORTS, &report_id)
                .await?
                .is_some()
            {
                return Err(CoreError::AlreadyReported);
            }
            let (note, version) = self.load_note(note_id).await?;

            let flag_count = note.flag_count + 1;
            let hide = note.is_hidden || flag_count >= self.policy.flag_hide_threshold;
            let report = Report {
                id: report_id.clone(),
                note_id: note_id.to_string(),
                reporter_id: caller.user_id.clone(),
                reason: reason.to_string(),
                description: description.map(str::trim).unwrap_or_default().to_string(),
                status: ReportStatus::Pending,
                created_at: Utc::now(),
                reviewed_at: None,
            };

            let mut batch = WriteBatch::new();
            batch.create(collections::REPORTS, &report.id, encode(&report)?);
            batch.update_if_version(
                collections::NOTES,
                note_id,
                Patch::new()
                    .set("flagCount", flag_count)
                    .set("isHidden", hide),
                version,
            );

            match self.store.commit(batch).await {
                Ok(()) => {
                    if hide && !note.is_hidden {
                        warn!(note_id, flag_count, "Note hidden after reaching the flag threshold");
                    }
                    info!(note_id, reporter_id = %caller.user_id, "Report submitted");
                    return Ok(report);
                }
                Err(PortError::Conflict(detail)) => {
                    debug!(note_id, attempt, "Report lost a write race: {}", detail);
                }
                Err(PortError::NotFound(_)) => {
                    return Err(CoreError::NotFound(format!("Note {}", note_id)));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CoreError::Conflict(format!(
            "Note {} kept changing while the report was being recorded",
            note_id
        )))
    }
}
