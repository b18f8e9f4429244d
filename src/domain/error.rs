//! Typed failures returned by every ledger and catalog operation

use std::fmt;
use thiserror::Error;

/// Entity named in a `NotFound`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Teacher,
    Student,
    Video,
    Subscription,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Teacher => "teacher",
            Entity::Student => "student",
            Entity::Video => "video",
            Entity::Subscription => "subscription",
        })
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0} not found")]
    NotFound(Entity),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("conflict: {0}")]
    Conflict(&'static str),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl LedgerError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        LedgerError::Validation(msg.into())
    }
}

/// True when the database rejected a write on a UNIQUE constraint
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// True when the database rejected a write on a FOREIGN KEY constraint
pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation())
}
