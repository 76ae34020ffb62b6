#[derive(Debug, thiserror::Error)]
pub enum MultiplexError {
    #[error("collection {0} already has a shadow slot")]
    ShadowSlotAlreadyExists(uuid::Uuid),
    #[error("slot {0} not found for this collection")]
    SlotNotFound(uuid::Uuid),
    #[error("cannot switch into a slot that is not in SHADOW role")]
    SwitchTargetNotShadow,
    #[error(transparent)]
    Repository(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MultiplexError>;
