pub mod activity;
pub mod app;
pub mod domain;
pub mod error;
pub mod fanout;
pub mod feedback;
pub mod identity;
pub mod memory;
pub mod notes;
pub mod policy;
pub mod ports;
pub mod profile;
pub mod reconcile;
pub mod stats;
pub mod store;

pub use app::NoteNest;
pub use domain::{
    ActivityEntry, ActivityType, Dashboard, DeleteOutcome, DerivedCounters, Note, Report, Review,
    UserProfile, UserStats, VerifiedIdentity,
};
pub use error::{CoreError, CoreResult};
pub use memory::MemoryStore;
pub use policy::Policy;
pub use ports::{
    BlobStore, DocumentStore, FlashcardGenerator, IdentityVerifier, PortError, PortResult,
};
