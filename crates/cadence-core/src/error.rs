use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("Migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("Serialization error")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid entry reference: {0}")]
    InvalidEntryRef(String),

    #[error("Unknown assignees in tenant: {0:?}")]
    UnknownAssignees(Vec<Uuid>),

    #[error("This-and-future edits need an occurrence reference, got master id {0}")]
    ScopeRequiresOccurrence(Uuid),
}
