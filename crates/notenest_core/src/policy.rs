//! crates/notenest_core/src/policy.rs
//!
//! Tunable limits and thresholds for the profile core. The backend builds one from
//! its environment configuration; tests use the defaults.

use chrono::Duration;

#[derive(Debug, Clone)]
pub struct Policy {
    /// Upper bound for values in one `in` query. The effective size is also capped by
    /// the store's own limit.
    pub in_query_batch_size: usize,
    /// A note is hidden once it has this many reports.
    pub flag_hide_threshold: i64,
    /// Contribution points awarded per uploaded note.
    pub upload_reward: i64,
    /// Contribution score of a freshly created user.
    pub initial_contribution_score: i64,
    pub max_conflict_retries: u32,
    pub max_file_size: u64,
    pub allowed_mime_types: Vec<String>,
    /// File types text can be extracted from for flashcards. Legacy Office formats
    /// and slide decks are accepted as uploads but not as flashcard sources.
    pub flashcard_source_types: Vec<String>,
    /// Activity entries older than this are pruned by maintenance.
    pub activity_retention: Duration,
    pub default_page_size: usize,
    pub max_flashcards: u32,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            in_query_batch_size: 10,
            flag_hide_threshold: 7,
            upload_reward: 10,
            initial_contribution_score: 10,
            max_conflict_retries: 3,
            max_file_size: 10 * 1024 * 1024,
            allowed_mime_types: [
                "application/pdf",
                "application/msword",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "application/vnd.ms-powerpoint",
                "application/vnd.openxmlformats-officedocument.presentationml.presentation",
                "text/plain",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            flashcard_source_types: [
                "application/pdf",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "text/plain",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            activity_retention: Duration::days(365),
            default_page_size: 20,
            max_flashcards: 50,
        }
    }
}

impl Policy {
    pub fn is_allowed_mime_type(&self, content_type: &str) -> bool {
        self.allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(content_type))
    }

    pub fn is_flashcard_source(&self, content_type: &str) -> bool {
        self.flashcard_source_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(content_type))
    }
}
