//! Command structs for ledger operations.
//!
//! These types group parameters for write operations and subscriptions,
//! keeping call sites readable and avoiding long argument lists.

use chrono::{DateTime, Utc};

use crate::{Amount, TransactionKind};

/// Append a transaction to the caller's ledger.
#[derive(Clone, Debug)]
pub struct NewTransaction {
    /// Caller-assigned id; the store assigns a UUID when absent.
    pub id: Option<String>,
    pub amount: Amount,
    pub kind: TransactionKind,
    pub category: String,
    pub remark: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

impl NewTransaction {
    #[must_use]
    pub fn new(
        kind: TransactionKind,
        amount: Amount,
        category: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            amount,
            kind,
            category: category.into(),
            remark: None,
            occurred_at,
            tags: Vec::new(),
        }
    }

    /// Create an income transaction.
    #[must_use]
    pub fn income(amount: Amount, category: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self::new(TransactionKind::Income, amount, category, occurred_at)
    }

    /// Create an expense transaction.
    #[must_use]
    pub fn expense(
        amount: Amount,
        category: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self::new(TransactionKind::Expense, amount, category, occurred_at)
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Selects which part of a user's ledger a subscription watches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedFilter {
    pub user_id: String,
    /// Restrict to one year partition; `None` watches every year.
    pub year: Option<i32>,
}

impl FeedFilter {
    #[must_use]
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            year: None,
        }
    }

    #[must_use]
    pub fn year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn matches(&self, user_id: &str, year: i32) -> bool {
        self.user_id == user_id && self.year.is_none_or(|y| y == year)
    }
}
