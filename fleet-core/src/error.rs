use thiserror::Error;

/// Errors raised below the HTTP boundary: store, registry, scheduler,
/// monitor, and transfer failures. `fleet-master` maps these onto HTTP
/// status codes at its own `AppError` boundary (spec.md §7).
#[derive(Error, Debug)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {0}")]
    NotFound(i64),

    #[error("worker not found: {0}")]
    UnknownWorker(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
