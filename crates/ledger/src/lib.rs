//! Ledger mutation and balance-aggregation engine.
//!
//! [`Ledger`] appends and removes transactions in per-(user, year)
//! partitions, keeps monthly and running aggregates consistent with them,
//! pages through a partition with stable cursors, summarises a year and
//! pushes every change to [`ChangeFeed`] subscribers.

pub use aggregates::{
    AggregateDelta, AggregateKey, AggregateUpdate, AtomicUpdate, BalanceAggregator,
    SqlAggregates, Totals, Versioned,
};
pub use commands::{FeedFilter, NewTransaction};
pub use error::LedgerError;
pub use feed::{
    ChangeFeed, DEFAULT_FEED_CAPACITY, FeedEvent, FeedSnapshot, Subscription, SubscriptionHandle,
};
pub use money::Amount;
pub use monthly_aggregates::MonthlyAggregate;
pub use ops::{
    CategoryTotals, DEFAULT_PAGE_SIZE, Ledger, LedgerBuilder, MAX_PAGE_SIZE, MonthTotals, Page,
    YearReport,
};
pub use registry::{Category, CategoryRegistry, DEFAULT_CATEGORY_IMAGE, coerce_order};
pub use transactions::{Transaction, TransactionKind};
pub use wallets::WalletBalance;

mod aggregates;
pub mod categories;
mod commands;
mod error;
mod feed;
mod money;
pub mod monthly_aggregates;
mod ops;
mod registry;
pub mod transactions;
mod util;
pub mod wallets;

pub type ResultLedger<T> = Result<T, LedgerError>;
