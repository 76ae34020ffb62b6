//! Destinations: the write side of a sync. Each
//! destination owns its own schema/collection provisioning and declares
//! the content processor it needs entities shaped by.

pub mod error;
pub mod qdrant;
pub mod vespa;

pub use error::{DestinationError, Result};
pub use qdrant::QdrantDestination;
pub use vespa::VespaDestination;

use std::sync::Arc;

use async_trait::async_trait;
use weave_processors::ContentProcessor;
use weave_types::entity::Entity;
use weave_types::ids::OrganizationId;

/// Credentials + provisioning inputs common to every destination kind's
/// `create(...)` contract.
pub struct DestinationConfig {
    pub collection_id: uuid::Uuid,
    pub organization_id: OrganizationId,
    pub vector_size: Option<u32>,
}

#[async_trait]
pub trait Destination: Send + Sync {
    /// Idempotent by `entity_id` — re-upserting the same id overwrites.
    async fn bulk_upsert(&self, entities: Vec<Entity>) -> Result<()>;
    async fn bulk_delete(&self, entity_ids: &[String]) -> Result<()>;
    /// Removes every chunk fanned out from the given original entity ids.
    async fn bulk_delete_by_parent(&self, parent_ids: &[String]) -> Result<()>;
    fn has_keyword_index(&self) -> bool;
    fn content_processor(&self) -> Arc<dyn ContentProcessor>;
}

/// `vector_size` must be present for any destination that stores vectors.
/// Both destinations implemented here are vector stores.
pub fn require_vector_size(config: &DestinationConfig) -> Result<u32> {
    config.vector_size.ok_or(DestinationError::MissingVectorSize)
}
