use std::collections::BTreeMap;

use sea_orm::{QueryFilter, prelude::*};
use serde::{Deserialize, Serialize};

use crate::{Amount, ResultLedger, Transaction, TransactionKind, transactions, util};

use super::Ledger;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthTotals {
    pub income: Amount,
    pub expenses: Amount,
}

impl MonthTotals {
    fn record(self, kind: TransactionKind, amount: Amount) -> Option<MonthTotals> {
        let mut next = self;
        match kind {
            TransactionKind::Income => next.income = self.income.checked_add(amount)?,
            TransactionKind::Expense => next.expenses = self.expenses.checked_add(amount)?,
        }
        Some(next)
    }
}

/// Per-category totals, split by kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub income: BTreeMap<String, Amount>,
    pub expenses: BTreeMap<String, Amount>,
}

impl CategoryTotals {
    fn bucket(&mut self, kind: TransactionKind) -> &mut BTreeMap<String, Amount> {
        match kind {
            TransactionKind::Income => &mut self.income,
            TransactionKind::Expense => &mut self.expenses,
        }
    }
}

/// Year summary computed from the transactions of one partition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearReport {
    pub user_id: String,
    pub year: i32,
    /// Keyed by two-digit month (`"03"`); only months with transactions.
    pub monthly: BTreeMap<String, MonthTotals>,
    pub by_category: CategoryTotals,
    pub totals: MonthTotals,
    pub transaction_count: usize,
    pub skipped: usize,
}

impl YearReport {
    fn new(user_id: &str, year: i32) -> Self {
        Self {
            user_id: user_id.to_string(),
            year,
            monthly: BTreeMap::new(),
            by_category: CategoryTotals::default(),
            totals: MonthTotals::default(),
            transaction_count: 0,
            skipped: 0,
        }
    }

    /// Adds `tx` to every bucket, or to none of them when a total would
    /// overflow.
    fn record(&mut self, tx: &Transaction) -> bool {
        let month = util::month_label(tx.month());
        let category = self.by_category.bucket(tx.kind);
        let by_category = category
            .get(&tx.category)
            .copied()
            .unwrap_or_default()
            .checked_add(tx.amount);
        let monthly = self
            .monthly
            .get(&month)
            .copied()
            .unwrap_or_default()
            .record(tx.kind, tx.amount);
        let totals = self.totals.record(tx.kind, tx.amount);

        let (Some(by_category), Some(monthly), Some(totals)) = (by_category, monthly, totals)
        else {
            return false;
        };
        self.by_category
            .bucket(tx.kind)
            .insert(tx.category.clone(), by_category);
        self.monthly.insert(month, monthly);
        self.totals = totals;
        self.transaction_count += 1;
        true
    }
}

impl Ledger {
    /// Summarises a year by month and by category.
    ///
    /// Reads the partition once and writes nothing; malformed records are
    /// skipped and counted.
    pub async fn summarize(&self, user_id: &str, year: i32) -> ResultLedger<YearReport> {
        let user_id = util::require_user(user_id)?;

        let models = transactions::Entity::find()
            .filter(transactions::Column::TransactionUserId.eq(user_id))
            .filter(transactions::Column::PartitionYear.eq(year))
            .all(&self.database)
            .await?;

        let mut report = YearReport::new(user_id, year);
        for model in models {
            match Transaction::try_from(model) {
                Ok(tx) => {
                    if !report.record(&tx) {
                        tracing::warn!(transaction = %tx.id, "total overflow, transaction left out of the summary");
                        report.skipped += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!("{err}");
                    report.skipped += 1;
                }
            }
        }
        Ok(report)
    }
}
