//! Domain layer - the access-control and analytics core
//!
//! Every function takes the database explicitly and returns either plain
//! `sqlx::Error` (pure reads that cannot fail otherwise) or `LedgerError`.

pub mod catalog;
pub mod dashboard;
pub mod error;
pub mod identity;
pub mod subscriptions;
pub mod views;

pub use error::{Entity, LedgerError};
