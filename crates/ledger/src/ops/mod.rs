use sea_orm::DatabaseConnection;
use tokio::sync::Mutex;

use crate::{
    BalanceAggregator, CategoryRegistry, ChangeFeed, DEFAULT_FEED_CAPACITY, LedgerError,
    ResultLedger,
};

mod balances;
mod feed;
mod list;
mod reports;
mod transactions;

pub use list::Page;
pub use reports::{CategoryTotals, MonthTotals, YearReport};

/// Page size used when a page request does not give one.
pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 500;

/// Run a block inside a DB transaction, committing on success and rolling back on error.
///
/// With a `publish` clause, the feed events built from the committed value go
/// out under the commit-order lock: subscribers see them in commit order.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.database.begin().await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
    ($self:expr, |$tx:ident| $body:expr, publish |$value:ident| $events:expr) => {{
        let $tx = $self.database.begin().await?;
        let result = $body;
        match result {
            Ok($value) => {
                let _order = $self.commit_order.lock().await;
                $tx.commit().await?;
                let events: Vec<$crate::FeedEvent> = $events;
                for event in &events {
                    $self.feed.publish(event);
                }
                Ok($value)
            }
            Err(err) => Err(err),
        }
    }};
}

pub(crate) use with_tx;

#[derive(Debug)]
pub struct Ledger {
    database: DatabaseConnection,
    aggregator: BalanceAggregator,
    feed: ChangeFeed,
    page_size: u64,
    /// Held from commit to publication of a mutation's events.
    commit_order: Mutex<()>,
}

impl Ledger {
    /// Return a builder for `Ledger`. Help to build the struct.
    pub fn builder() -> LedgerBuilder {
        LedgerBuilder::default()
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Loads the curated categories currently stored.
    pub async fn load_categories(&self) -> ResultLedger<CategoryRegistry> {
        CategoryRegistry::load(&self.database).await
    }

    fn page_limit(&self, limit: Option<u64>) -> ResultLedger<u64> {
        let limit = limit.unwrap_or(self.page_size);
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(LedgerError::InvalidPage(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}, got {limit}"
            )));
        }
        Ok(limit)
    }
}

/// The builder for `Ledger`
#[derive(Default)]
pub struct LedgerBuilder {
    database: DatabaseConnection,
    aggregation_attempts: Option<u32>,
    feed_capacity: Option<usize>,
    page_size: Option<u64>,
}

impl LedgerBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> LedgerBuilder {
        self.database = db;
        self
    }

    /// Bound of the optimistic read-modify-write loop on each aggregate.
    pub fn aggregation_attempts(mut self, attempts: u32) -> LedgerBuilder {
        self.aggregation_attempts = Some(attempts);
        self
    }

    pub fn feed_capacity(mut self, capacity: usize) -> LedgerBuilder {
        self.feed_capacity = Some(capacity);
        self
    }

    /// Default page size for [`Ledger::page`].
    pub fn page_size(mut self, page_size: u64) -> LedgerBuilder {
        self.page_size = Some(page_size);
        self
    }

    /// Construct `Ledger`
    pub async fn build(self) -> ResultLedger<Ledger> {
        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(LedgerError::InvalidPage(format!(
                "default page size must be between 1 and {MAX_PAGE_SIZE}, got {page_size}"
            )));
        }
        // Fail early on an unusable connection rather than on the first mutation.
        self.database.ping().await?;

        Ok(Ledger {
            database: self.database,
            aggregator: self
                .aggregation_attempts
                .map(BalanceAggregator::new)
                .unwrap_or_default(),
            feed: ChangeFeed::new(self.feed_capacity.unwrap_or(DEFAULT_FEED_CAPACITY)),
            page_size,
            commit_order: Mutex::new(()),
        })
    }
}
