pub mod blob;
pub mod flashcards_llm;
pub mod identity;
pub mod pg_store;
pub mod text_extract;

pub use blob::LocalBlobStore;
pub use flashcards_llm::OpenAiFlashcardAdapter;
pub use identity::SessionTokenVerifier;
pub use pg_store::PgDocumentStore;
