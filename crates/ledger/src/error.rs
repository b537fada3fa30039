//! The module contains the errors the ledger can return.
//!
//! Caller-facing failures:
//!
//! - [`Unauthenticated`] no caller identity was supplied.
//! - [`InvalidTransaction`] the amount is not positive or a required field is missing.
//! - [`NotFound`] the delete target is absent from its partition.
//! - [`AggregationConflict`] optimistic retries on an aggregate were exhausted.
//! - [`AggregationFailed`] the storage layer failed while updating an aggregate.
//! - [`DuplicateTransaction`] an append reused an id that is already stored.
//! - [`InvalidCursor`] / [`InvalidPage`] a page request cannot be served.
//!
//! [`DecodeSkipped`] is never returned from a public operation: it is produced
//! while decoding a single stored record, counted, logged and then dropped.
//!
//!  [`Unauthenticated`]: LedgerError::Unauthenticated
//!  [`InvalidTransaction`]: LedgerError::InvalidTransaction
//!  [`NotFound`]: LedgerError::NotFound
//!  [`AggregationConflict`]: LedgerError::AggregationConflict
//!  [`AggregationFailed`]: LedgerError::AggregationFailed
//!  [`DecodeSkipped`]: LedgerError::DecodeSkipped
//!  [`DuplicateTransaction`]: LedgerError::DuplicateTransaction
//!  [`InvalidCursor`]: LedgerError::InvalidCursor
//!  [`InvalidPage`]: LedgerError::InvalidPage
use sea_orm::DbErr;
use thiserror::Error;

/// Ledger custom errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("User not authenticated")]
    Unauthenticated,
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("\"{0}\" not found!")]
    NotFound(String),
    #[error("\"{0}\" already present!")]
    DuplicateTransaction(String),
    #[error("Aggregate conflict: {0}")]
    AggregationConflict(String),
    #[error("Aggregation failed: {0}")]
    AggregationFailed(String),
    #[error("Record skipped: {0}")]
    DecodeSkipped(String),
    #[error("Category \"{0}\" not found!")]
    CategoryNotFound(String),
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),
    #[error("Invalid page: {0}")]
    InvalidPage(String),
    #[error("Subscription closed")]
    SubscriptionClosed,
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl PartialEq for LedgerError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unauthenticated, Self::Unauthenticated) => true,
            (Self::InvalidTransaction(a), Self::InvalidTransaction(b)) => a == b,
            (Self::NotFound(a), Self::NotFound(b)) => a == b,
            (Self::DuplicateTransaction(a), Self::DuplicateTransaction(b)) => a == b,
            (Self::AggregationConflict(a), Self::AggregationConflict(b)) => a == b,
            (Self::AggregationFailed(a), Self::AggregationFailed(b)) => a == b,
            (Self::DecodeSkipped(a), Self::DecodeSkipped(b)) => a == b,
            (Self::CategoryNotFound(a), Self::CategoryNotFound(b)) => a == b,
            (Self::InvalidCursor(a), Self::InvalidCursor(b)) => a == b,
            (Self::InvalidPage(a), Self::InvalidPage(b)) => a == b,
            (Self::SubscriptionClosed, Self::SubscriptionClosed) => true,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
