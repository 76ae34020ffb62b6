//! Source drivers: one implementation per connector, each
//! responsible for turning a provider's API into a stream of `Entity`
//! values plus an updated `Cursor` once a pass completes successfully.
//!
//! Drivers don't talk to Postgres, the KV store, or the entity pipeline
//! directly — they're handed a `weave_tokens::TokenManager` for auth and
//! an optional `weave_ratelimit::SourceRateLimiter` for outbound pacing,
//! and they yield `Entity` values upward. Everything past that point
//! (hashing, dedup, embedding, writing) is the pipeline's job, not the
//! driver's.

pub mod drivers;
mod error;
pub mod registry;

pub use error::{Result, SourceError};
pub use registry::{AuthMethod, OAuthSemantics, RateLimitLevel, SourceMetadata};

use async_trait::async_trait;
use futures::stream::BoxStream;
use weave_types::{Cursor, Entity};

/// One item out of a driver's stream: either a freshly-yielded entity, a
/// tombstone for something the source no longer reports, or the final
/// cursor update once the driver has exhausted everything it intends to
/// yield this pass.
pub enum SourceEvent {
    Entity(Entity),
    Deletion(String),
    CursorUpdate(Cursor),
}

/// Turns a future that eagerly fetches a whole page run into a stream.
/// Drivers whose providers paginate in small bounded batches (everything
/// below) fetch page-by-page inside the future and push results into
/// `events` as they go, so a driver can still yield partial progress to
/// the caller's `Vec` ordering without needing a hand-written state
/// machine per provider.
pub fn stream_from_future<F>(fut: F) -> BoxStream<'static, Result<SourceEvent>>
where
    F: std::future::Future<Output = Vec<Result<SourceEvent>>> + Send + 'static,
{
    use futures::StreamExt;
    futures::stream::once(fut)
        .flat_map(|events| futures::stream::iter(events))
        .boxed()
}

#[async_trait]
pub trait SourceDriver: Send + Sync {
    /// Short, stable identifier used in rate-limit keys, raw-data paths,
    /// and log fields (e.g. `"asana"`, `"github"`).
    fn short_name(&self) -> &'static str;

    /// Streams entities starting from `cursor` (`None` means full sync).
    /// The stream ends after yielding a final `SourceEvent::CursorUpdate`
    /// on success; an `Err` mid-stream is treated as
    /// `WeaveError::EntityProcessingError` by the pipeline unless the
    /// driver classifies it as fatal via `SourceError::Fatal`.
    fn stream_entities(&self, cursor: Option<Cursor>) -> BoxStream<'_, Result<SourceEvent>>;
}
