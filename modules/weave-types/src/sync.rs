//! Sync/job/collection/destination-slot records.
//!
//! These mirror the relational rows `weave-storage` persists to Postgres;
//! this crate only owns the shape, not the SQL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::ids::{ConnectionId, OrganizationId, SyncId, SyncJobId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncJobStatus {
    Pending,
    Running,
    Cancelling,
    Cancelled,
    Completed,
    Failed,
}

impl SyncJobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SyncJobStatus::Completed | SyncJobStatus::Failed | SyncJobStatus::Cancelled
        )
    }
}

/// One run of a `Sync`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: SyncJobId,
    pub sync_id: SyncId,
    pub status: SyncJobStatus,
    pub force_full_sync: bool,
    /// Row creation time — distinct from `started_at`, which is only set
    /// once the job leaves `PENDING`. The stuck-job cleanup pass (spec
    /// §4.14) needs this to detect a job that never got picked up.
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub entities_inserted: u64,
    pub entities_updated: u64,
    pub entities_deleted: u64,
    pub entities_kept: u64,
    pub entities_skipped: u64,
    pub error: Option<String>,
}

impl SyncJob {
    pub fn new(sync_id: SyncId, force_full_sync: bool) -> Self {
        Self {
            id: SyncJobId::new(),
            sync_id,
            status: SyncJobStatus::Pending,
            force_full_sync,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_heartbeat_at: None,
            entities_inserted: 0,
            entities_updated: 0,
            entities_deleted: 0,
            entities_kept: 0,
            entities_skipped: 0,
            error: None,
        }
    }
}

/// A configured source→destination pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sync {
    pub id: SyncId,
    pub organization_id: OrganizationId,
    pub connection_id: ConnectionId,
    pub collection_id: uuid::Uuid,
    pub source_short_name: String,
    pub cursor: Option<Cursor>,
    pub schedule_cron: Option<String>,
    pub is_active: bool,
}

/// The logical vector-store-agnostic unit a sync writes into. Fans out to
/// one or more `DestinationSlot`s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: uuid::Uuid,
    pub organization_id: OrganizationId,
    pub name: String,
    pub readable_id: String,
}

/// Which role a `DestinationSlot` plays in the multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationRole {
    Active,
    Shadow,
    Deprecated,
}

/// One destination attached to a collection. Exactly one slot per
/// collection may be `Active` at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationSlot {
    pub id: uuid::Uuid,
    pub collection_id: uuid::Uuid,
    pub destination_type: String,
    pub role: DestinationRole,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Scope a rate limit bucket is keyed on. Both variants carry
/// `organization_id` because the key format is
/// `src:{org}:{source}:org:org` / `src:{org}:{source}:connection:{conn_id}`
/// — two organizations using the same source app must never share a
/// bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RateLimitScope {
    /// Per source app-wide within one organization, e.g. a single
    /// HubSpot developer app shared by every connection that org uses.
    Source {
        organization_id: OrganizationId,
        source_short_name: String,
    },
    /// Per individual OAuth connection, for sources whose limits are
    /// issued per authorized account rather than per app.
    Connection {
        organization_id: OrganizationId,
        connection_id: ConnectionId,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub scope: RateLimitScope,
    pub max_requests: u32,
    pub window_secs: u32,
}

/// Tracks the raw-data archive's coverage of a sync job, used to detect
/// and clean up entities the source stopped reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDataManifest {
    pub sync_id: SyncId,
    pub sync_job_id: SyncJobId,
    pub entity_count: u64,
    pub seen_entity_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sync_job_starts_pending() {
        let job = SyncJob::new(SyncId::new(), false);
        assert_eq!(job.status, SyncJobStatus::Pending);
        assert!(!job.status.is_terminal());
    }

    #[test]
    fn terminal_statuses() {
        assert!(SyncJobStatus::Completed.is_terminal());
        assert!(SyncJobStatus::Failed.is_terminal());
        assert!(SyncJobStatus::Cancelled.is_terminal());
        assert!(!SyncJobStatus::Running.is_terminal());
    }
}
