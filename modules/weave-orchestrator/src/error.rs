#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("sync {0} not found")]
    SyncNotFound(weave_types::ids::SyncId),
    #[error("source connection {0} not found")]
    ConnectionNotFound(weave_types::ids::ConnectionId),
    #[error("collection {0} not found")]
    CollectionNotFound(uuid::Uuid),

    /// Pre-flight: another job for this sync is already
    /// PENDING/RUNNING/CANCELLING and `force_full_sync` wasn't set, so we
    /// refuse to start a second one outright rather than queueing behind it.
    #[error("sync {0} already has an active job ({1})")]
    AnotherJobInProgress(weave_types::ids::SyncId, weave_types::ids::SyncJobId),

    /// The 1-hour wait cap for a forced full sync to wait out a job already
    /// in progress was exceeded.
    #[error("timed out waiting for the in-progress job on sync {0} to finish")]
    WaitTimedOut(weave_types::ids::SyncId),

    #[error(transparent)]
    Source(#[from] weave_sources::SourceError),

    #[error(transparent)]
    Pipeline(#[from] weave_pipeline::PipelineError),

    #[error(transparent)]
    RawData(#[from] weave_rawdata::RawDataError),

    #[error(transparent)]
    Multiplex(#[from] weave_multiplex::MultiplexError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
