//! crates/notenest_core/src/domain.rs
//!
//! Defines the core data structures for the profile service. Records that live in
//! the document store serialize with camelCase field names and store timestamps as
//! epoch milliseconds so that range filters and ordering work on any backend.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

//=========================================================================================
// Identity
//=========================================================================================

/// The caller as vouched for by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub user_id: String,
    pub email: String,
}

impl VerifiedIdentity {
    /// The local part of the email address, used as a fallback display name.
    pub fn email_handle(&self) -> &str {
        self.email.split('@').next().unwrap_or_default()
    }
}

//=========================================================================================
// Profile
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub university: String,
    #[serde(default)]
    pub major: String,
    #[serde(default)]
    pub academic_year: String,
    #[serde(default)]
    pub is_profile_complete: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub joined_date: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// A blank profile, as created on first access.
    pub fn empty(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            display_name: String::new(),
            email: String::new(),
            bio: String::new(),
            university: String::new(),
            major: String::new(),
            academic_year: String::new(),
            is_profile_complete: false,
            joined_date: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// A profile needs at least a display name and a university.
    pub fn compute_complete(&self) -> bool {
        !self.display_name.trim().is_empty() && !self.university.trim().is_empty()
    }

    /// Share of the descriptive fields that are filled in, 0 to 100.
    pub fn completion_percentage(&self) -> u8 {
        let fields = [&self.display_name, &self.university, &self.major, &self.bio];
        let filled = fields.iter().filter(|f| !f.trim().is_empty()).count();
        ((filled as f64 / fields.len() as f64) * 100.0).round() as u8
    }
}

/// The editable part of a profile. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfilePatch {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub university: Option<String>,
    pub major: Option<String>,
    pub academic_year: Option<String>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.bio.is_none()
            && self.university.is_none()
            && self.major.is_none()
            && self.academic_year.is_none()
    }
}

//=========================================================================================
// Statistics
//=========================================================================================

/// Counters that are always recomputable from the source collections. Only the
/// reconciler writes these, and only by full overwrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedCounters {
    pub total_notes_uploaded: u64,
    pub total_reviews_given: u64,
    pub total_reviews_received: u64,
    pub reports_submitted: u64,
}

/// The cached derived counters as persisted in `userStats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedSnapshot {
    pub user_id: String,
    #[serde(flatten)]
    pub counters: DerivedCounters,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

/// Counters with no independent source of truth, persisted in `userCounters`.
/// They only ever change through atomic increments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulatedCounters {
    pub user_id: String,
    #[serde(default)]
    pub contribution_score: i64,
    #[serde(default)]
    pub total_notes_downloaded: i64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatedCounter {
    ContributionScore,
    NotesDownloaded,
}

impl AccumulatedCounter {
    pub fn field_name(self) -> &'static str {
        match self {
            AccumulatedCounter::ContributionScore => "contributionScore",
            AccumulatedCounter::NotesDownloaded => "totalNotesDownloaded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ContributionLevel {
    Newcomer,
    NewContributor,
    ContributingMember,
    RegularContributor,
    ActiveContributor,
    ExpertContributor,
}

impl ContributionLevel {
    pub fn for_score(score: i64) -> Self {
        match score {
            s if s >= 1000 => ContributionLevel::ExpertContributor,
            s if s >= 500 => ContributionLevel::ActiveContributor,
            s if s >= 200 => ContributionLevel::RegularContributor,
            s if s >= 50 => ContributionLevel::ContributingMember,
            s if s >= 10 => ContributionLevel::NewContributor,
            _ => ContributionLevel::Newcomer,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ContributionLevel::ExpertContributor => "Expert Contributor",
            ContributionLevel::ActiveContributor => "Active Contributor",
            ContributionLevel::RegularContributor => "Regular Contributor",
            ContributionLevel::ContributingMember => "Contributing Member",
            ContributionLevel::NewContributor => "New Contributor",
            ContributionLevel::Newcomer => "Newcomer",
        }
    }
}

impl fmt::Display for ContributionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The merged statistics view shown on the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct UserStats {
    pub derived: DerivedCounters,
    pub contribution_score: i64,
    pub total_notes_downloaded: i64,
    pub contribution_level: ContributionLevel,
    /// True when reconciliation failed and `derived` holds the last cached values.
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dashboard {
    pub profile: UserProfile,
    pub stats: UserStats,
}

//=========================================================================================
// Notes
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteFile {
    pub file_name: String,
    pub file_url: String,
    pub file_type: String,
    pub file_size: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    #[default]
    Active,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub subject: String,
    pub academic_level: String,
    #[serde(default)]
    pub university: String,
    #[serde(default)]
    pub course: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub files: Vec<NoteFile>,
    pub uploader_id: String,
    #[serde(default)]
    pub uploader_email: String,
    #[serde(default)]
    pub download_count: i64,
    #[serde(default)]
    pub rating_sum: i64,
    #[serde(default)]
    pub total_ratings: i64,
    #[serde(default)]
    pub total_comments: i64,
    #[serde(default)]
    pub flag_count: i64,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default)]
    pub status: EntryStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_review_at: Option<DateTime<Utc>>,
}

impl Note {
    /// Mean rating computed from the running sum and count.
    pub fn average_rating(&self) -> f64 {
        if self.total_ratings <= 0 {
            0.0
        } else {
            self.rating_sum as f64 / self.total_ratings as f64
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.uploader_id == user_id
    }

    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            "Untitled"
        } else {
            &self.title
        }
    }
}

/// Descriptive fields supplied on upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteMetadata {
    pub title: String,
    pub description: String,
    pub subject: String,
    pub academic_level: String,
    pub university: String,
    pub course: String,
    pub tags: Vec<String>,
}

/// One file as received from the client, before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteUpload {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl NotePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.tags.is_none()
    }
}

/// The result of a cascading note deletion.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOutcome {
    pub note_id: String,
    pub reviews_deleted: usize,
    pub reports_deleted: usize,
    /// Files whose blobs could not be removed. The note is deleted regardless.
    pub orphaned_files: Vec<String>,
}

impl DeleteOutcome {
    pub fn is_partial(&self) -> bool {
        !self.orphaned_files.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BrowseSort {
    #[default]
    Recent,
    Popular,
    Rating,
    Title,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrowseParams {
    pub text: Option<String>,
    pub subject: Option<String>,
    pub academic_level: Option<String>,
    pub sort: BrowseSort,
    pub limit: Option<usize>,
}

//=========================================================================================
// Reviews and Reports
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    pub note_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: EntryStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    #[default]
    Pending,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub note_id: String,
    pub reporter_id: String,
    pub reason: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: ReportStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// A review joined with the title of the note it refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewWithTitle {
    pub review: Review,
    pub note_title: String,
}

/// A report joined with the title of the note it refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportWithTitle {
    pub report: Report,
    pub note_title: String,
}

//=========================================================================================
// Activity Log
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    NoteUpload,
    NoteDownload,
    ReviewGiven,
    NoteEdited,
    NoteDeleted,
    ProfileUpdated,
    ProfileCreated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: String,
    pub user_id: String,
    pub activity_type: ActivityType,
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_title: Option<String>,
    pub description: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Flashcards
//=========================================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashcardSettings {
    pub difficulty: Difficulty,
    pub card_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    pub front: String,
    pub back: String,
    #[serde(default)]
    pub difficulty: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contribution_level_thresholds() {
        assert_eq!(ContributionLevel::for_score(0), ContributionLevel::Newcomer);
        assert_eq!(ContributionLevel::for_score(9), ContributionLevel::Newcomer);
        assert_eq!(ContributionLevel::for_score(10), ContributionLevel::NewContributor);
        assert_eq!(ContributionLevel::for_score(50), ContributionLevel::ContributingMember);
        assert_eq!(ContributionLevel::for_score(200), ContributionLevel::RegularContributor);
        assert_eq!(ContributionLevel::for_score(500), ContributionLevel::ActiveContributor);
        assert_eq!(ContributionLevel::for_score(999), ContributionLevel::ActiveContributor);
        assert_eq!(ContributionLevel::for_score(1000).label(), "Expert Contributor");
    }

    #[test]
    fn profile_completion() {
        let mut profile = UserProfile::empty("u1", Utc::now());
        assert_eq!(profile.completion_percentage(), 0);
        assert!(!profile.compute_complete());

        profile.display_name = "Ada".into();
        profile.university = "  ".into();
        assert_eq!(profile.completion_percentage(), 25);
        assert!(!profile.compute_complete());

        profile.university = "MIT".into();
        profile.major = "Math".into();
        assert_eq!(profile.completion_percentage(), 75);
        assert!(profile.compute_complete());
    }

    #[test]
    fn average_rating_without_reviews_is_zero() {
        let note = Note {
            id: "n1".into(),
            title: String::new(),
            description: String::new(),
            subject: "Physics".into(),
            academic_level: "Graduate".into(),
            university: String::new(),
            course: String::new(),
            tags: vec![],
            files: vec![],
            uploader_id: "u1".into(),
            uploader_email: String::new(),
            download_count: 0,
            rating_sum: 0,
            total_ratings: 0,
            total_comments: 0,
            flag_count: 0,
            is_hidden: false,
            status: EntryStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_review_at: None,
        };
        assert_eq!(note.average_rating(), 0.0);
        assert_eq!(note.display_title(), "Untitled");
    }

    #[test]
    fn email_handle_is_local_part() {
        let who = VerifiedIdentity {
            user_id: "u1".into(),
            email: "ada@uni.edu".into(),
        };
        assert_eq!(who.email_handle(), "ada");
    }
}
