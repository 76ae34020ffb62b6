//! Injection seams the orchestrator assembles a job's context from.
//! `weave-orchestrator` owns none of these concretely — a real deployment
//! wires concrete `DriverFactory`/`DestinationFactory`/`TokenProviderFactory`
//! implementations that know how to read `source_connection` rows and OAuth
//! credentials, which is DB/secrets-store access this crate deliberately
//! stays narrow of.

use std::sync::Arc;

use async_trait::async_trait;
use weave_destinations::Destination;
use weave_pipeline::{AccessTokenProvider, DedupIndex, InMemoryDedupIndex};
use weave_sources::SourceDriver;
use weave_tokens::TokenManager;
use weave_types::ids::{ConnectionId, SyncId};
use weave_types::sync::{Collection, DestinationSlot, Sync};
use weave_types::WeaveError;

use crate::error::Result;

#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn build_driver(&self, sync: &Sync) -> Result<Arc<dyn SourceDriver>>;
}

#[async_trait]
pub trait DestinationFactory: Send + Sync {
    async fn build_destination(&self, slot: &DestinationSlot, collection: &Collection) -> Result<Arc<dyn Destination>>;
}

#[async_trait]
pub trait TokenProviderFactory: Send + Sync {
    async fn build_token_provider(&self, sync: &Sync) -> Result<Arc<dyn AccessTokenProvider>>;
}

/// Hands back the dedup index for one sync. Real deployments back this with the Postgres table the
/// sync/job rows already live in; the in-memory default below is for
/// tests and single-pod dev deployments.
#[async_trait]
pub trait DedupIndexFactory: Send + Sync {
    async fn build_dedup_index(&self, sync_id: SyncId) -> Result<Arc<dyn DedupIndex>>;
}

/// Keeps one `InMemoryDedupIndex` per sync for the lifetime of the
/// process — enough to make repeated `run_job` calls in tests observe
/// KEEP/UPDATE decisions the way a real persistent index would.
#[derive(Default)]
pub struct InMemoryDedupIndexFactory {
    indexes: dashmap::DashMap<SyncId, Arc<dyn DedupIndex>>,
}

impl InMemoryDedupIndexFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupIndexFactory for InMemoryDedupIndexFactory {
    async fn build_dedup_index(&self, sync_id: SyncId) -> Result<Arc<dyn DedupIndex>> {
        Ok(self
            .indexes
            .entry(sync_id)
            .or_insert_with(|| Arc::new(InMemoryDedupIndex::new()) as Arc<dyn DedupIndex>)
            .clone())
    }
}

/// Adapts C3's `TokenManager` (which needs a connection id plus its
/// current refresh token) onto C13's narrower `AccessTokenProvider` seam
/// (which only ever asks "give me a currently-valid bearer token").
pub struct TokenManagerAccessProvider {
    token_manager: Arc<TokenManager>,
    connection_id: ConnectionId,
    refresh_token: String,
}

impl TokenManagerAccessProvider {
    pub fn new(token_manager: Arc<TokenManager>, connection_id: ConnectionId, refresh_token: String) -> Self {
        Self { token_manager, connection_id, refresh_token }
    }
}

#[async_trait]
impl AccessTokenProvider for TokenManagerAccessProvider {
    async fn access_token(&self) -> std::result::Result<Option<String>, WeaveError> {
        let token = self.token_manager.get_token(self.connection_id, &self.refresh_token).await?;
        Ok(Some(token))
    }
}
