use thiserror::Error;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Enrich error: {0}")]
    Enrich(String),

    #[error("Cursor lock conflict: a sweep is already running for this entity")]
    CursorLockConflict,

    #[error("Sweeping is disabled for entity {0}")]
    Disabled(String),

    #[error("No entity id: not in the argument, the payload, or the environment")]
    MissingEntityId,

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
