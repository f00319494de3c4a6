//! Shared fakes for the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use notenest_core::domain::{
    Flashcard, FlashcardSettings, NoteFile, NoteMetadata, NoteUpload, VerifiedIdentity,
};
use notenest_core::store::{Document, Fields, Patch, Query, WriteBatch};
use notenest_core::{
    BlobStore, DocumentStore, FlashcardGenerator, IdentityVerifier, MemoryStore, NoteNest,
    PortError, PortResult, Policy,
};

//=========================================================================================
// Blob store
//=========================================================================================

#[derive(Default)]
pub struct FakeBlobs {
    blobs: Mutex<HashMap<String, Bytes>>,
    undeletable: Mutex<HashSet<String>>,
    next: AtomicUsize,
}

impl FakeBlobs {
    /// Deleting any blob whose name contains `needle` fails from now on.
    pub fn refuse_delete(&self, needle: &str) {
        self.undeletable.lock().unwrap().insert(needle.to_string());
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobStore for FakeBlobs {
    async fn put_blob(&self, data: Bytes, suggested_name: &str) -> PortResult<String> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let url = format!("mem://{}/{}", n, suggested_name);
        self.blobs.lock().unwrap().insert(url.clone(), data);
        Ok(url)
    }

    async fn get_blob(&self, url: &str) -> PortResult<Bytes> {
        self.blobs
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| PortError::NotFound(url.to_string()))
    }

    async fn delete_blob(&self, url: &str) -> PortResult<()> {
        let refused = self
            .undeletable
            .lock()
            .unwrap()
            .iter()
            .any(|needle| url.contains(needle.as_str()));
        if refused {
            return Err(PortError::Unexpected(format!("cannot delete {}", url)));
        }
        self.blobs.lock().unwrap().remove(url);
        Ok(())
    }
}

//=========================================================================================
// Identity and flashcards
//=========================================================================================

/// Accepts tokens of the form `token-<user id>`.
pub struct FakeVerifier;

#[async_trait]
impl IdentityVerifier for FakeVerifier {
    async fn verify(&self, token: &str) -> PortResult<VerifiedIdentity> {
        let user_id = token
            .strip_prefix("token-")
            .ok_or(PortError::Unauthorized)?;
        Ok(user(user_id))
    }
}

pub struct FakeFlashcards;

#[async_trait]
impl FlashcardGenerator for FakeFlashcards {
    async fn generate(
        &self,
        file: &NoteFile,
        settings: &FlashcardSettings,
    ) -> PortResult<Vec<Flashcard>> {
        Ok((0..settings.card_count)
            .map(|i| Flashcard {
                front: format!("{} Q{}", file.file_name, i),
                back: format!("A{}", i),
                difficulty: settings.difficulty.to_string(),
            })
            .collect())
    }
}

//=========================================================================================
// Store wrapper with injectable failures
//=========================================================================================

#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_commits: AtomicBool,
    failing_collection: Mutex<Option<String>>,
    interleaved: Mutex<Option<WriteBatch>>,
}

impl FlakyStore {
    pub fn fail_commits(&self, on: bool) {
        self.fail_commits.store(on, Ordering::SeqCst);
    }

    /// Queries against `collection` fail until cleared with `None`.
    pub fn fail_queries_on(&self, collection: Option<&str>) {
        *self.failing_collection.lock().unwrap() = collection.map(str::to_string);
    }

    /// Commits `batch` straight to the inner store just before the next commit, as a
    /// concurrent writer landing between a service's reads and its write would.
    pub fn interleave_before_next_commit(&self, batch: WriteBatch) {
        *self.interleaved.lock().unwrap() = Some(batch);
    }

    fn query_fails(&self, query: &Query) -> bool {
        self.failing_collection.lock().unwrap().as_deref() == Some(query.collection.as_str())
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, collection: &str, id: &str) -> PortResult<Option<Document>> {
        self.inner.get(collection, id).await
    }

    async fn set(&self, collection: &str, id: &str, fields: Fields) -> PortResult<()> {
        self.inner.set(collection, id, fields).await
    }

    async fn add(&self, collection: &str, fields: Fields) -> PortResult<String> {
        self.inner.add(collection, fields).await
    }

    async fn update(&self, collection: &str, id: &str, patch: Patch) -> PortResult<Document> {
        self.inner.update(collection, id, patch).await
    }

    async fn delete(&self, collection: &str, id: &str) -> PortResult<()> {
        self.inner.delete(collection, id).await
    }

    async fn query(&self, query: &Query) -> PortResult<Vec<Document>> {
        if self.query_fails(query) {
            return Err(PortError::Unexpected("injected query failure".into()));
        }
        self.inner.query(query).await
    }

    async fn commit(&self, batch: WriteBatch) -> PortResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("injected commit failure".into()));
        }
        let interleaved = self.interleaved.lock().unwrap().take();
        if let Some(other) = interleaved {
            self.inner.commit(other).await?;
        }
        self.inner.commit(batch).await
    }

    fn in_query_limit(&self) -> usize {
        self.inner.in_query_limit()
    }
}

//=========================================================================================
// Fixtures
//=========================================================================================

pub struct Harness {
    pub app: NoteNest,
    pub store: Arc<FlakyStore>,
    pub blobs: Arc<FakeBlobs>,
}

pub fn harness() -> Harness {
    harness_with(Policy::default(), MemoryStore::new())
}

pub fn harness_with(policy: Policy, inner: MemoryStore) -> Harness {
    let store = Arc::new(FlakyStore {
        inner,
        ..Default::default()
    });
    let blobs = Arc::new(FakeBlobs::default());
    let app = NoteNest::new(
        store.clone(),
        blobs.clone(),
        Arc::new(FakeVerifier),
        Arc::new(FakeFlashcards),
        policy,
    );
    Harness { app, store, blobs }
}

pub fn user(id: &str) -> VerifiedIdentity {
    VerifiedIdentity {
        user_id: id.to_string(),
        email: format!("{}@uni.edu", id),
    }
}

pub fn metadata(title: &str) -> NoteMetadata {
    NoteMetadata {
        title: title.to_string(),
        description: format!("Lecture notes on {}", title),
        subject: "Computer Science".to_string(),
        academic_level: "Undergraduate".to_string(),
        university: "State University".to_string(),
        course: "CS101".to_string(),
        tags: vec!["exam".to_string()],
    }
}

pub fn pdf(name: &str) -> NoteUpload {
    NoteUpload {
        file_name: name.to_string(),
        content_type: "application/pdf".to_string(),
        data: Bytes::from_static(b"%PDF-1.4 test"),
    }
}

/// Uploads a one-file note and returns its id.
pub async fn upload(app: &NoteNest, owner: &VerifiedIdentity, title: &str) -> String {
    app.notes
        .create_note(owner, metadata(title), vec![pdf(&format!("{}.pdf", title))])
        .await
        .unwrap()
        .id
}
