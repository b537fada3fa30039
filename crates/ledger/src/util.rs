//! Internal helpers shared by the ledger operations.
//!
//! These utilities are **not** part of the public API.

use chrono::{DateTime, Utc};

use crate::{LedgerError, ResultLedger};

/// Resolve the caller identity; a missing or blank id is unauthenticated.
pub(crate) fn require_user(user_id: &str) -> ResultLedger<&str> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::Unauthenticated);
    }
    Ok(trimmed)
}

pub(crate) fn datetime_from_ms(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Next `updated_at` stamp: wall clock, but never at or before `previous`.
pub(crate) fn next_stamp(previous: Option<i64>) -> i64 {
    let now = now_ms();
    match previous {
        Some(prev) if prev >= now => prev + 1,
        _ => now,
    }
}

/// Two-digit month key (`"03"`), as used by aggregate documents and reports.
pub(crate) fn month_label(month: u32) -> String {
    format!("{month:02}")
}

pub(crate) fn parse_month_label(label: &str) -> Option<u32> {
    label.parse::<u32>().ok().filter(|m| (1..=12).contains(m))
}
