//! Content processors: the single place that decides
//! whether one entity fans out into many (Qdrant) or stays 1:1 (Vespa),
//! so downstream dedup/counting logic never has to care which destination
//! it's writing to.

mod chunking;
pub mod error;
pub mod qdrant;
pub mod raw;
pub mod vespa;

pub use error::{ProcessorError, Result};
pub use qdrant::QdrantChunkEmbedProcessor;
pub use raw::RawProcessor;
pub use vespa::VespaChunkEmbedProcessor;

use async_trait::async_trait;
use weave_types::entity::Entity;

/// What a destination asks for before it can accept an entity.
#[async_trait]
pub trait ContentProcessor: Send + Sync {
    /// Shapes one entity into the one-or-more entities that should
    /// actually be persisted. An empty result means "skip this entity"
    /// (e.g. an unrecognized code language).
    async fn process(&self, entity: Entity) -> Result<Vec<Entity>>;
}
