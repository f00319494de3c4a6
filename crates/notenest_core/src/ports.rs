//! crates/notenest_core/src/ports.rs
//!
//! Defines the service contracts (traits) the profile core depends on.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to stay independent of the concrete document database, blob storage, identity
//! provider and flashcard generator.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::{Flashcard, FlashcardSettings, NoteFile, VerifiedIdentity};
use crate::store::{Document, Fields, Patch, Query, WriteBatch};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A write precondition did not hold (document already exists, version moved on).
    #[error("Write conflict: {0}")]
    Conflict(String),
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// A multi-collection document database.
///
/// Implementations offer single-document reads and writes, filtered/ordered/limited
/// queries over one collection, and one atomic multi-document batch per `commit`.
/// Nothing here joins collections or aggregates server-side.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> PortResult<Option<Document>>;

    /// Creates or fully replaces a document.
    async fn set(&self, collection: &str, id: &str, fields: Fields) -> PortResult<()>;

    /// Inserts a document under a store-generated id and returns that id.
    async fn add(&self, collection: &str, fields: Fields) -> PortResult<String>;

    /// Partially merges `patch` into an existing document and returns the result.
    /// Increments inside the patch are applied atomically.
    async fn update(&self, collection: &str, id: &str, patch: Patch) -> PortResult<Document>;

    /// Deletes a document. Deleting a missing document is not an error.
    async fn delete(&self, collection: &str, id: &str) -> PortResult<()>;

    async fn query(&self, query: &Query) -> PortResult<Vec<Document>>;

    async fn count(&self, query: &Query) -> PortResult<usize> {
        Ok(self.query(query).await?.len())
    }

    /// Applies every operation in `batch` or none of them.
    async fn commit(&self, batch: WriteBatch) -> PortResult<()>;

    /// The largest number of values a single `in` filter may carry.
    fn in_query_limit(&self) -> usize;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores the bytes and returns an opaque URL for them.
    async fn put_blob(&self, data: Bytes, suggested_name: &str) -> PortResult<String>;

    async fn get_blob(&self, url: &str) -> PortResult<Bytes>;

    async fn delete_blob(&self, url: &str) -> PortResult<()>;
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Resolves an opaque caller token into a verified identity.
    async fn verify(&self, token: &str) -> PortResult<VerifiedIdentity>;
}

#[async_trait]
pub trait FlashcardGenerator: Send + Sync {
    /// Generates flashcards from the content of one stored note file.
    async fn generate(
        &self,
        file: &NoteFile,
        settings: &FlashcardSettings,
    ) -> PortResult<Vec<Flashcard>>;
}
