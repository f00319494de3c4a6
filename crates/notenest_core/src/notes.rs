//! crates/notenest_core/src/notes.rs
//!
//! The note lifecycle manager: upload, edit, cascading hard delete, download
//! tracking, browsing of visible notes and flashcard generation.
//!
//! Note counts are never maintained here. Uploads and deletions only touch the
//! source collections and the reconciler picks the change up on the next read.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::activity::ActivityLog;
use crate::domain::{
    AccumulatedCounter, ActivityType, BrowseParams, BrowseSort, DeleteOutcome, EntryStatus,
    Flashcard, FlashcardSettings, Note, NoteFile, NoteMetadata, NotePatch, NoteUpload,
    VerifiedIdentity,
};
use crate::error::{CoreError, CoreResult};
use crate::policy::Policy;
use crate::ports::{BlobStore, DocumentStore, FlashcardGenerator, PortError, PortResult};
use crate::stats::StatsStore;
use crate::store::{collections, encode, Direction, Patch, Query, WriteBatch};

/// Every note uploaded by `user_id`, newest first.
pub async fn list_by_uploader(store: &dyn DocumentStore, user_id: &str) -> PortResult<Vec<Note>> {
    let query = Query::new(collections::NOTES)
        .eq("uploaderId", user_id)
        .order_by("createdAt", Direction::Desc);
    store
        .query(&query)
        .await?
        .iter()
        .map(|doc| doc.decode())
        .collect()
}

pub struct NoteLifecycle {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    flashcards: Arc<dyn FlashcardGenerator>,
    activity: ActivityLog,
    stats: StatsStore,
    policy: Arc<Policy>,
}

impl NoteLifecycle {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        flashcards: Arc<dyn FlashcardGenerator>,
        activity: ActivityLog,
        stats: StatsStore,
        policy: Arc<Policy>,
    ) -> Self {
        Self {
            store,
            blobs,
            flashcards,
            activity,
            stats,
            policy,
        }
    }

    //=====================================================================================
    // Reads
    //=====================================================================================

    pub async fn get_note(&self, note_id: &str) -> CoreResult<Note> {
        let doc = self
            .store
            .get(collections::NOTES, note_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Note {}", note_id)))?;
        Ok(doc.decode()?)
    }

    pub async fn list_user_notes(&self, user_id: &str) -> CoreResult<Vec<Note>> {
        Ok(list_by_uploader(self.store.as_ref(), user_id).await?)
    }

    /// Searches visible notes. Hidden notes never appear.
    pub async fn browse(&self, params: &BrowseParams) -> CoreResult<Vec<Note>> {
        let mut query = Query::new(collections::NOTES)
            .eq("isHidden", false)
            .order_by("createdAt", Direction::Desc);
        if let Some(subject) = params.subject.as_deref().filter(|s| !s.is_empty()) {
            query = query.eq("subject", subject);
        }
        if let Some(level) = params.academic_level.as_deref().filter(|s| !s.is_empty()) {
            query = query.eq("academicLevel", level);
        }

        let mut notes: Vec<Note> = self
            .store
            .query(&query)
            .await?
            .iter()
            .map(|doc| doc.decode())
            .collect::<PortResult<_>>()?;

        if let Some(text) = params.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let needle = text.to_lowercase();
            notes.retain(|note| {
                note.title.to_lowercase().contains(&needle)
                    || note.description.to_lowercase().contains(&needle)
                    || note.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            });
        }

        match params.sort {
            BrowseSort::Recent => {}
            BrowseSort::Popular => notes.sort_by(|a, b| b.download_count.cmp(&a.download_count)),
            BrowseSort::Rating => notes.sort_by(|a, b| {
                b.average_rating()
                    .partial_cmp(&a.average_rating())
                    .unwrap_or(Ordering::Equal)
            }),
            BrowseSort::Title => notes.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase())),
        }
        if let Some(limit) = params.limit {
            notes.truncate(limit);
        }
        Ok(notes)
    }

    //=====================================================================================
    // Upload
    //=====================================================================================

    fn validate_upload(&self, metadata: &NoteMetadata, files: &[NoteUpload]) -> CoreResult<()> {
        if metadata.title.trim().is_empty()
            || metadata.subject.trim().is_empty()
            || metadata.academic_level.trim().is_empty()
        {
            return Err(CoreError::Validation(
                "Title, subject and academic level are required".to_string(),
            ));
        }
        if files.is_empty() {
            return Err(CoreError::Validation("At least one file is required".to_string()));
        }
        for file in files {
            if !self.policy.is_allowed_mime_type(&file.content_type) {
                return Err(CoreError::Validation(format!(
                    "File type '{}' of {} is not supported",
                    file.content_type, file.file_name
                )));
            }
            if file.data.len() as u64 > self.policy.max_file_size {
                return Err(CoreError::Validation(format!(
                    "{} exceeds the maximum size of {} bytes",
                    file.file_name, self.policy.max_file_size
                )));
            }
        }
        Ok(())
    }

    /// Deletes blobs one by one, returning the names of the files that could not be
    /// removed.
    async fn delete_blobs(&self, files: &[NoteFile]) -> Vec<String> {
        let mut orphaned = Vec::new();
        for file in files {
            if let Err(e) = self.blobs.delete_blob(&file.file_url).await {
                warn!(file = %file.file_name, "Could not delete stored file: {}", e);
                orphaned.push(file.file_name.clone());
            }
        }
        orphaned
    }

    async fn store_files(&self, files: Vec<NoteUpload>) -> CoreResult<Vec<NoteFile>> {
        let stamp = Utc::now().timestamp_millis();
        let uploads = files.into_iter().map(|file| async move {
            let size = file.data.len() as u64;
            let name = format!("notes/{}_{}", stamp, file.file_name);
            self.blobs
                .put_blob(file.data, &name)
                .await
                .map(|url| NoteFile {
                    file_name: file.file_name,
                    file_url: url,
                    file_type: file.content_type,
                    file_size: size,
                })
        });

        let mut stored = Vec::new();
        let mut failure = None;
        for result in join_all(uploads).await {
            match result {
                Ok(file) => stored.push(file),
                Err(e) => failure = Some(e),
            }
        }
        if let Some(e) = failure {
            error!("File upload failed: {}", e);
            self.delete_blobs(&stored).await;
            return Err(e.into());
        }
        Ok(stored)
    }

    /// Stores the files, writes the note and awards the upload reward. The note, the
    /// reward and the activity entry commit together.
    pub async fn create_note(
        &self,
        caller: &VerifiedIdentity,
        metadata: NoteMetadata,
        files: Vec<NoteUpload>,
    ) -> CoreResult<Note> {
        self.validate_upload(&metadata, &files)?;
        self.stats.ensure_counters(&caller.user_id).await?;

        let stored = self.store_files(files).await?;
        let now = Utc::now();
        let note = Note {
            id: Uuid::new_v4().to_string(),
            title: metadata.title.trim().to_string(),
            description: metadata.description.trim().to_string(),
            subject: metadata.subject,
            academic_level: metadata.academic_level,
            university: metadata.university,
            course: metadata.course,
            tags: normalize_tags(metadata.tags),
            files: stored,
            uploader_id: caller.user_id.clone(),
            uploader_email: caller.email.clone(),
            download_count: 0,
            rating_sum: 0,
            total_ratings: 0,
            total_comments: 0,
            flag_count: 0,
            is_hidden: false,
            status: EntryStatus::Active,
            created_at: now,
            updated_at: now,
            last_review_at: None,
        };

        let mut batch = WriteBatch::new();
        batch.create(collections::NOTES, &note.id, encode(&note)?);
        self.stats.stage_increment(
            &mut batch,
            &caller.user_id,
            AccumulatedCounter::ContributionScore,
            self.policy.upload_reward,
        );
        self.activity.stage(
            &mut batch,
            &caller.user_id,
            ActivityType::NoteUpload,
            &note.id,
            Some(&note.title),
            format!("Uploaded note: {}", note.title),
        )?;

        if let Err(e) = self.store.commit(batch).await {
            error!(note_id = %note.id, "Failed to save note: {}", e);
            self.delete_blobs(&note.files).await;
            return Err(e.into());
        }
        info!(note_id = %note.id, user_id = %caller.user_id, files = note.files.len(), "Note uploaded");
        Ok(note)
    }

    //=====================================================================================
    // Edit
    //=====================================================================================

    async fn load_owned(&self, note_id: &str, caller: &VerifiedIdentity) -> CoreResult<Note> {
        let note = self.get_note(note_id).await?;
        if !note.is_owned_by(&caller.user_id) {
            warn!(note_id, user_id = %caller.user_id, "Rejected mutation by non-owner");
            return Err(CoreError::Forbidden(format!(
                "Note {} belongs to another user",
                note_id
            )));
        }
        Ok(note)
    }

    pub async fn update_note(
        &self,
        note_id: &str,
        caller: &VerifiedIdentity,
        patch: NotePatch,
    ) -> CoreResult<Note> {
        if patch.is_empty() {
            return Err(CoreError::Validation("Nothing to update".to_string()));
        }
        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(CoreError::Validation("Title cannot be empty".to_string()));
            }
        }

        let note = self.load_owned(note_id, caller).await?;

        let mut changes = Patch::new().set("updatedAt", Utc::now().timestamp_millis());
        if let Some(title) = &patch.title {
            changes = changes.set("title", title.trim());
        }
        if let Some(description) = &patch.description {
            changes = changes.set("description", description.trim());
        }
        if let Some(tags) = patch.tags {
            changes = changes.set("tags", normalize_tags(tags));
        }
        let title = patch
            .title
            .as_deref()
            .map(str::trim)
            .unwrap_or_else(|| note.display_title())
            .to_string();

        let mut batch = WriteBatch::new();
        batch.update(collections::NOTES, note_id, changes);
        self.activity.stage(
            &mut batch,
            &caller.user_id,
            ActivityType::NoteEdited,
            note_id,
            Some(&title),
            format!("Updated note: {}", title),
        )?;
        self.store.commit(batch).await.map_err(|e| match e {
            PortError::NotFound(_) => CoreError::NotFound(format!("Note {}", note_id)),
            other => CoreError::Store(other),
        })?;

        info!(note_id, "Note updated");
        self.get_note(note_id).await
    }

    //=====================================================================================
    // Cascading Delete
    //=====================================================================================

    /// Hard-deletes a note with its reviews, reports and stored files.
    ///
    /// File removal is best effort and happens first; files that could not be removed
    /// are reported on the outcome. The note and every review and report that
    /// references it are then deleted in one atomic batch, conditioned on the note
    /// version read before the children were listed. A review or report landing in
    /// between bumps that version, so the batch is rebuilt and retried.
    pub async fn delete_note(
        &self,
        note_id: &str,
        caller: &VerifiedIdentity,
    ) -> CoreResult<DeleteOutcome> {
        let note = self.load_owned(note_id, caller).await?;

        let orphaned_files = self.delete_blobs(&note.files).await;

        for attempt in 0..=self.policy.max_conflict_retries {
            let version = self
                .store
                .get(collections::NOTES, note_id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("Note {}", note_id)))?
                .version;
            let reviews = self
                .store
                .query(&Query::new(collections::REVIEWS).eq("noteId", note_id))
                .await?;
            let reports = self
                .store
                .query(&Query::new(collections::REPORTS).eq("noteId", note_id))
                .await?;

            let mut batch = WriteBatch::new();
            batch.delete_if_version(collections::NOTES, note_id, version);
            for review in &reviews {
                batch.delete(collections::REVIEWS, &review.id);
            }
            for report in &reports {
                batch.delete(collections::REPORTS, &report.id);
            }
            self.activity.stage(
                &mut batch,
                &caller.user_id,
                ActivityType::NoteDeleted,
                note_id,
                Some(note.display_title()),
                format!("Permanently deleted note: {}", note.display_title()),
            )?;

            match self.store.commit(batch).await {
                Ok(()) => {
                    return Ok(self.finish_delete(
                        note_id,
                        reviews.len(),
                        reports.len(),
                        orphaned_files,
                    ))
                }
                Err(PortError::Conflict(detail)) => {
                    debug!(note_id, attempt, "Cascade delete lost a write race: {}", detail);
                }
                Err(PortError::NotFound(_)) => {
                    return Err(CoreError::NotFound(format!("Note {}", note_id)));
                }
                Err(e) => {
                    error!(note_id, "Cascade delete failed, nothing was removed: {}", e);
                    return Err(e.into());
                }
            }
        }

        error!(note_id, "Cascade delete kept losing write races, nothing was removed");
        Err(CoreError::Conflict(format!(
            "Note {} kept changing while it was being deleted",
            note_id
        )))
    }

    fn finish_delete(
        &self,
        note_id: &str,
        reviews_deleted: usize,
        reports_deleted: usize,
        orphaned_files: Vec<String>,
    ) -> DeleteOutcome {
        let outcome = DeleteOutcome {
            note_id: note_id.to_string(),
            reviews_deleted,
            reports_deleted,
            orphaned_files,
        };
        if outcome.is_partial() {
            warn!(
                note_id,
                orphaned = outcome.orphaned_files.len(),
                "Note deleted but some stored files were left behind"
            );
        }
        info!(
            note_id,
            reviews = outcome.reviews_deleted,
            reports = outcome.reports_deleted,
            "Note deleted"
        );
        outcome
    }

    //=====================================================================================
    // Downloads and Flashcards
    //=====================================================================================

    /// Counts a download against the note and the downloading user.
    pub async fn record_download(&self, caller: &VerifiedIdentity, note_id: &str) -> CoreResult<Note> {
        let note = self.get_note(note_id).await?;
        if note.is_hidden && !note.is_owned_by(&caller.user_id) {
            return Err(CoreError::NotFound(format!("Note {}", note_id)));
        }
        if note.files.is_empty() {
            return Err(CoreError::Validation(
                "No files available for download".to_string(),
            ));
        }
        self.stats.ensure_counters(&caller.user_id).await?;

        let mut batch = WriteBatch::new();
        batch.update(
            collections::NOTES,
            note_id,
            Patch::new().increment("downloadCount", 1),
        );
        self.stats.stage_increment(
            &mut batch,
            &caller.user_id,
            AccumulatedCounter::NotesDownloaded,
            1,
        );
        self.activity.stage(
            &mut batch,
            &caller.user_id,
            ActivityType::NoteDownload,
            note_id,
            Some(note.display_title()),
            format!("Downloaded note: {}", note.display_title()),
        )?;
        self.store.commit(batch).await.map_err(|e| match e {
            PortError::NotFound(_) => CoreError::NotFound(format!("Note {}", note_id)),
            other => CoreError::Store(other),
        })?;
        self.get_note(note_id).await
    }

    pub async fn generate_flashcards(
        &self,
        caller: &VerifiedIdentity,
        note_id: &str,
        file_index: usize,
        settings: FlashcardSettings,
    ) -> CoreResult<Vec<Flashcard>> {
        if settings.card_count == 0 || settings.card_count > self.policy.max_flashcards {
            return Err(CoreError::Validation(format!(
                "Card count must be between 1 and {}",
                self.policy.max_flashcards
            )));
        }
        let note = self.get_note(note_id).await?;
        if note.is_hidden && !note.is_owned_by(&caller.user_id) {
            return Err(CoreError::NotFound(format!("Note {}", note_id)));
        }
        let file = note.files.get(file_index).ok_or_else(|| {
            CoreError::Validation(format!("Note {} has no file #{}", note_id, file_index))
        })?;
        if !self.policy.is_flashcard_source(&file.file_type) {
            return Err(CoreError::Validation(format!(
                "Flashcards can only be generated from PDF, Word (.docx) or plain text files, not {}",
                file.file_type
            )));
        }

        let cards = self
            .flashcards
            .generate(file, &settings)
            .await
            .map_err(CoreError::Generation)?;
        if cards.is_empty() {
            return Err(CoreError::Generation(PortError::Unexpected(
                "No flashcards were generated".to_string(),
            )));
        }
        info!(note_id, cards = cards.len(), "Flashcards generated");
        Ok(cards)
    }
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_string();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

/// Note ids as JSON values, ready for an `in` filter.
pub(crate) fn note_id_values(notes: &[Note]) -> Vec<Value> {
    notes.iter().map(|n| Value::String(n.id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_trimmed_and_deduplicated() {
        let tags = normalize_tags(vec![
            " sorting ".into(),
            "".into(),
            "sorting".into(),
            "graphs".into(),
        ]);
        assert_eq!(tags, vec!["sorting".to_string(), "graphs".to_string()]);
    }
}
