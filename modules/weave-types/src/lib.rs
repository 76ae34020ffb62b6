//! Shared data model for the sync execution engine.
//!
//! Every other `weave-*` crate depends on this one for the vocabulary it
//! uses to talk about entities, cursors, jobs, syncs, and destination
//! slots. Nothing in here talks to a network or a database — it is pure
//! data plus the small amount of logic (hashing, field-flag lookup) that
//! has to be shared to keep the pipeline and the text builder in sync.

pub mod cursor;
pub mod entity;
pub mod error;
pub mod hash;
pub mod ids;
pub mod schema;
pub mod sync;

pub use cursor::Cursor;
pub use entity::{
    Breadcrumb, CodeFileAttributes, DeletionAttributes, DeletionStatus, Entity, EntityKind,
    FileAttributes, PolymorphicAttributes, SparseVector, SystemMetadata, Vector,
};
pub use error::WeaveError;
pub use hash::content_hash;
pub use ids::{ConnectionId, OrganizationId, SyncId, SyncJobId};
pub use sync::{
    Collection, DestinationRole, DestinationSlot, RateLimitConfig, RateLimitScope,
    RawDataManifest, Sync, SyncJob, SyncJobStatus,
};
