//! Balance aggregation.
//!
//! Aggregates (the running wallet balance and the monthly rollups) are
//! updated with an optimistic read-modify-write: read the stored totals and
//! their version, compute the new totals, then write them back only if the
//! version is still the one that was read. A lost race is retried from the
//! read, up to a bounded number of attempts.
//!
//! The storage side of that loop is the [`AtomicUpdate`] trait, so any
//! backend with a compare-and-set primitive can host aggregates.
//! [`SqlAggregates`] is the sea-orm implementation used by the ledger.

use async_trait::async_trait;
use sea_orm::{
    ActiveValue, ConnectionTrait, DbErr, EntityTrait, QueryFilter, SqlErr, prelude::*,
    sea_query::Expr,
};

use crate::{
    Amount, LedgerError, MonthlyAggregate, ResultLedger, Transaction, TransactionKind,
    WalletBalance, monthly_aggregates, util, wallets,
};

/// Identity of one aggregate document.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AggregateKey {
    Wallet { user_id: String },
    Month { user_id: String, year: i32, month: u32 },
}

impl AggregateKey {
    pub fn wallet(user_id: impl Into<String>) -> Self {
        Self::Wallet {
            user_id: user_id.into(),
        }
    }

    pub fn month(user_id: impl Into<String>, year: i32, month: u32) -> Self {
        Self::Month {
            user_id: user_id.into(),
            year,
            month,
        }
    }

    pub fn document_id(&self) -> String {
        match self {
            Self::Wallet { user_id } => user_id.clone(),
            Self::Month {
                user_id,
                year,
                month,
            } => monthly_aggregates::document_id(user_id, *year, *month),
        }
    }
}

/// Stored totals of one aggregate document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Totals {
    pub income: Amount,
    pub expenses: Amount,
    pub updated_at_ms: Option<i64>,
}

impl Totals {
    /// Adds `amount` (already signed) to the field `kind` selects.
    pub fn add(self, kind: TransactionKind, amount: Amount) -> ResultLedger<Totals> {
        let overflow =
            || LedgerError::AggregationFailed(format!("{} total overflow", kind.as_str()));
        let mut next = self;
        match kind {
            TransactionKind::Income => {
                next.income = self.income.checked_add(amount).ok_or_else(overflow)?;
            }
            TransactionKind::Expense => {
                next.expenses = self.expenses.checked_add(amount).ok_or_else(overflow)?;
            }
        }
        Ok(next)
    }
}

/// A record together with the version it was read at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Versioned<T> {
    pub version: i64,
    pub value: T,
}

/// Compare-and-set access to aggregate documents.
///
/// `write_if_unchanged` must store `totals` only if the document is still at
/// `expected_version` (`None`: the document must not exist yet) and report
/// whether it did. Returning `Ok(false)` is a conflict, not an error.
#[async_trait]
pub trait AtomicUpdate: Send + Sync {
    async fn read(&self, key: &AggregateKey) -> ResultLedger<Option<Versioned<Totals>>>;

    async fn write_if_unchanged(
        &self,
        key: &AggregateKey,
        expected_version: Option<i64>,
        totals: &Totals,
    ) -> ResultLedger<bool>;
}

/// Change to apply to the aggregates of one transaction's month and owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateDelta {
    pub user_id: String,
    pub year: i32,
    pub month: u32,
    pub kind: TransactionKind,
    /// Positive when a transaction is added, negative when it is removed.
    pub amount: Amount,
}

impl AggregateDelta {
    pub fn added(tx: &Transaction) -> Self {
        Self {
            user_id: tx.user_id.clone(),
            year: tx.year(),
            month: tx.month(),
            kind: tx.kind,
            amount: tx.amount,
        }
    }

    pub fn removed(tx: &Transaction) -> Self {
        Self {
            amount: -tx.amount,
            ..Self::added(tx)
        }
    }
}

/// Aggregates after a successful [`BalanceAggregator::apply`].
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AggregateUpdate {
    pub monthly: MonthlyAggregate,
    pub wallet: WalletBalance,
}

/// Sole writer of monthly aggregates and wallet balances.
#[derive(Clone, Copy, Debug)]
pub struct BalanceAggregator {
    max_attempts: u32,
}

impl Default for BalanceAggregator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS)
    }
}

impl BalanceAggregator {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Applies one ledger mutation to the month aggregate and to the running
    /// wallet balance of its owner.
    ///
    /// Each document is updated by its own optimistic loop. Callers run this
    /// inside the same storage transaction as the ledger write so a failure
    /// on the second document discards the first.
    pub async fn apply<S>(&self, store: &S, delta: &AggregateDelta) -> ResultLedger<AggregateUpdate>
    where
        S: AtomicUpdate + ?Sized,
    {
        let month_key = AggregateKey::month(&delta.user_id, delta.year, delta.month);
        let monthly = self
            .read_modify_write(store, &month_key, |current| {
                current.add(delta.kind, delta.amount)
            })
            .await?;

        let wallet_key = AggregateKey::wallet(&delta.user_id);
        let wallet = self
            .read_modify_write(store, &wallet_key, |current| {
                current.add(delta.kind, delta.amount)
            })
            .await?;

        Ok(AggregateUpdate {
            monthly: MonthlyAggregate::from_totals(
                &delta.user_id,
                delta.year,
                delta.month,
                &monthly,
            ),
            wallet: WalletBalance::from_totals(&delta.user_id, &wallet),
        })
    }

    /// Runs the bounded optimistic loop on one document and returns the
    /// totals that were written.
    ///
    /// `modify` receives the current totals (zero when the document does not
    /// exist) and must be free of side effects: it runs once per attempt.
    pub async fn read_modify_write<S, F>(
        &self,
        store: &S,
        key: &AggregateKey,
        mut modify: F,
    ) -> ResultLedger<Totals>
    where
        S: AtomicUpdate + ?Sized,
        F: FnMut(Totals) -> ResultLedger<Totals> + Send,
    {
        for attempt in 1..=self.max_attempts {
            let current = store.read(key).await?;
            let (expected_version, totals) = match current {
                Some(Versioned { version, value }) => (Some(version), value),
                None => (None, Totals::default()),
            };

            let mut next = modify(totals)?;
            next.updated_at_ms = Some(util::next_stamp(totals.updated_at_ms));

            if store.write_if_unchanged(key, expected_version, &next).await? {
                return Ok(next);
            }
            tracing::debug!(
                document = %key.document_id(),
                attempt,
                "aggregate changed between read and write, retrying"
            );
        }

        Err(LedgerError::AggregationConflict(format!(
            "{} still contended after {} attempts",
            key.document_id(),
            self.max_attempts
        )))
    }
}

/// [`AtomicUpdate`] over the `monthly_aggregates` and `wallets` tables.
///
/// Versions live in a `version` column; a write is an
/// `UPDATE .. WHERE version = ?` (or a plain insert for a new document, where
/// a primary-key clash is the conflict).
pub struct SqlAggregates<'a, C> {
    conn: &'a C,
}

impl<'a, C> SqlAggregates<'a, C>
where
    C: ConnectionTrait,
{
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }
}

fn storage(err: DbErr) -> LedgerError {
    LedgerError::AggregationFailed(err.to_string())
}

pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn stamp_text(totals: &Totals) -> String {
    totals.updated_at_ms.unwrap_or_else(util::now_ms).to_string()
}

#[async_trait]
impl<'a, C> AtomicUpdate for SqlAggregates<'a, C>
where
    C: ConnectionTrait + Send + Sync,
{
    async fn read(&self, key: &AggregateKey) -> ResultLedger<Option<Versioned<Totals>>> {
        let read = match key {
            AggregateKey::Wallet { user_id } => wallets::Entity::find_by_id(user_id.clone())
                .one(self.conn)
                .await
                .map_err(storage)?
                .map(|model| Versioned {
                    version: model.version,
                    value: Totals::from(&model),
                }),
            AggregateKey::Month { .. } => {
                monthly_aggregates::Entity::find_by_id(key.document_id())
                    .one(self.conn)
                    .await
                    .map_err(storage)?
                    .map(|model| Versioned {
                        version: model.version,
                        value: Totals::from(&model),
                    })
            }
        };
        Ok(read)
    }

    async fn write_if_unchanged(
        &self,
        key: &AggregateKey,
        expected_version: Option<i64>,
        totals: &Totals,
    ) -> ResultLedger<bool> {
        let income = totals.income.to_string();
        let expenses = totals.expenses.to_string();
        let updated_at = stamp_text(totals);

        let inserted = match (key, expected_version) {
            (AggregateKey::Wallet { user_id }, None) => {
                let model = wallets::ActiveModel {
                    user_id: ActiveValue::Set(user_id.clone()),
                    balance: ActiveValue::Set((totals.income - totals.expenses).to_string()),
                    income: ActiveValue::Set(income),
                    expenses: ActiveValue::Set(expenses),
                    updated_at: ActiveValue::Set(updated_at),
                    version: ActiveValue::Set(1),
                };
                wallets::Entity::insert(model)
                    .exec_without_returning(self.conn)
                    .await
            }
            (
                AggregateKey::Month {
                    user_id,
                    year,
                    month,
                },
                None,
            ) => {
                let model = monthly_aggregates::ActiveModel {
                    id: ActiveValue::Set(key.document_id()),
                    user_id: ActiveValue::Set(user_id.clone()),
                    year: ActiveValue::Set(*year),
                    month: ActiveValue::Set(util::month_label(*month)),
                    income: ActiveValue::Set(income),
                    expenses: ActiveValue::Set(expenses),
                    updated_at: ActiveValue::Set(updated_at),
                    version: ActiveValue::Set(1),
                };
                monthly_aggregates::Entity::insert(model)
                    .exec_without_returning(self.conn)
                    .await
            }
            (AggregateKey::Wallet { user_id }, Some(version)) => wallets::Entity::update_many()
                .col_expr(
                    wallets::Column::Balance,
                    Expr::value((totals.income - totals.expenses).to_string()),
                )
                .col_expr(wallets::Column::Income, Expr::value(income))
                .col_expr(wallets::Column::Expenses, Expr::value(expenses))
                .col_expr(wallets::Column::UpdatedAt, Expr::value(updated_at))
                .col_expr(wallets::Column::Version, Expr::value(version + 1))
                .filter(wallets::Column::UserId.eq(user_id.clone()))
                .filter(wallets::Column::Version.eq(version))
                .exec(self.conn)
                .await
                .map(|res| res.rows_affected),
            (AggregateKey::Month { .. }, Some(version)) => {
                monthly_aggregates::Entity::update_many()
                    .col_expr(monthly_aggregates::Column::Income, Expr::value(income))
                    .col_expr(monthly_aggregates::Column::Expenses, Expr::value(expenses))
                    .col_expr(monthly_aggregates::Column::UpdatedAt, Expr::value(updated_at))
                    .col_expr(monthly_aggregates::Column::Version, Expr::value(version + 1))
                    .filter(monthly_aggregates::Column::Id.eq(key.document_id()))
                    .filter(monthly_aggregates::Column::Version.eq(version))
                    .exec(self.conn)
                    .await
                    .map(|res| res.rows_affected)
            }
        };

        match inserted {
            Ok(rows) => Ok(rows == 1),
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(storage(err)),
        }
    }
}
