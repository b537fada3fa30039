use std::collections::BTreeMap;

use sea_orm::{ConnectionTrait, QueryFilter, QueryOrder, TransactionTrait, prelude::*};

use crate::{
    AggregateKey, AggregateUpdate, FeedEvent, LedgerError, MonthlyAggregate, ResultLedger,
    SqlAggregates, Totals, Transaction, WalletBalance, monthly_aggregates, transactions, util,
    wallets,
};

use super::{Ledger, with_tx};

pub(super) async fn read_wallet<C>(conn: &C, user_id: &str) -> ResultLedger<WalletBalance>
where
    C: ConnectionTrait,
{
    let wallet = wallets::Entity::find_by_id(user_id.to_string())
        .one(conn)
        .await?
        .map(WalletBalance::from)
        .unwrap_or_else(|| WalletBalance::empty(user_id));
    Ok(wallet)
}

/// Monthly aggregates of a user, oldest first, optionally restricted to one
/// year. Undecodable documents are skipped and counted.
pub(super) async fn read_monthly<C>(
    conn: &C,
    user_id: &str,
    year: Option<i32>,
) -> ResultLedger<(Vec<MonthlyAggregate>, usize)>
where
    C: ConnectionTrait,
{
    let mut query = monthly_aggregates::Entity::find()
        .filter(monthly_aggregates::Column::UserId.eq(user_id))
        .order_by_asc(monthly_aggregates::Column::Year)
        .order_by_asc(monthly_aggregates::Column::Month);
    if let Some(year) = year {
        query = query.filter(monthly_aggregates::Column::Year.eq(year));
    }

    let mut out = Vec::new();
    let mut skipped = 0;
    for model in query.all(conn).await? {
        match MonthlyAggregate::try_from(model) {
            Ok(aggregate) => out.push(aggregate),
            Err(err) => {
                tracing::warn!("{err}");
                skipped += 1;
            }
        }
    }
    Ok((out, skipped))
}

impl Ledger {
    /// Running balance of a user: net of every transaction currently stored.
    pub async fn balance(&self, user_id: &str) -> ResultLedger<WalletBalance> {
        let user_id = util::require_user(user_id)?;
        read_wallet(&self.database, user_id).await
    }

    /// Totals of one month; zero when nothing was recorded for it.
    pub async fn monthly_aggregate(
        &self,
        user_id: &str,
        year: i32,
        month: u32,
    ) -> ResultLedger<MonthlyAggregate> {
        let user_id = util::require_user(user_id)?;
        if !(1..=12).contains(&month) {
            return Err(LedgerError::NotFound(format!("month {month}")));
        }

        let model = monthly_aggregates::Entity::find_by_id(monthly_aggregates::document_id(
            user_id, year, month,
        ))
        .one(&self.database)
        .await?;
        let aggregate = match model {
            Some(model) => MonthlyAggregate::from_totals(user_id, year, month, &Totals::from(&model)),
            None => MonthlyAggregate::empty(user_id, year, month),
        };
        Ok(aggregate)
    }

    /// Every stored month of a year, January first.
    pub async fn monthly_aggregates(
        &self,
        user_id: &str,
        year: i32,
    ) -> ResultLedger<Vec<MonthlyAggregate>> {
        let user_id = util::require_user(user_id)?;
        let (aggregates, _skipped) = read_monthly(&self.database, user_id, Some(year)).await?;
        Ok(aggregates)
    }

    /// Rebuilds the monthly rollups of a year from the transactions stored in
    /// its partition.
    ///
    /// The running balance is left untouched. Each month is rewritten through
    /// the same optimistic loop as regular mutations, so a concurrent append
    /// makes the rewrite retry instead of being overwritten.
    pub async fn recompute_monthly_aggregates(
        &self,
        user_id: &str,
        year: i32,
    ) -> ResultLedger<Vec<MonthlyAggregate>> {
        let user_id = util::require_user(user_id)?;

        let (rebuilt, _wallet) = with_tx!(self, |db_tx| {
            let models = transactions::Entity::find()
                .filter(transactions::Column::TransactionUserId.eq(user_id))
                .filter(transactions::Column::PartitionYear.eq(year))
                .all(&db_tx)
                .await?;

            let mut by_month: BTreeMap<u32, Totals> = BTreeMap::new();
            for model in models {
                let tx = match Transaction::try_from(model) {
                    Ok(tx) => tx,
                    Err(err) => {
                        tracing::warn!("{err}");
                        continue;
                    }
                };
                let totals = by_month.entry(tx.month()).or_default();
                *totals = totals.add(tx.kind, tx.amount)?;
            }

            // Months that no longer have transactions are reset as well.
            let (existing, _) = read_monthly(&db_tx, user_id, Some(year)).await?;
            for aggregate in existing {
                by_month.entry(aggregate.month).or_default();
            }

            let store = SqlAggregates::new(&db_tx);
            let mut rebuilt = Vec::with_capacity(by_month.len());
            for (month, computed) in by_month {
                let key = AggregateKey::month(user_id, year, month);
                let written = self
                    .aggregator
                    .read_modify_write(&store, &key, |_| Ok(computed))
                    .await?;
                rebuilt.push(MonthlyAggregate::from_totals(user_id, year, month, &written));
            }

            let wallet = read_wallet(&db_tx, user_id).await?;
            Ok::<_, LedgerError>((rebuilt, wallet))
        }, publish |rebuilt| rebuilt
            .0
            .iter()
            .map(|monthly| {
                FeedEvent::AggregateUpdated(AggregateUpdate {
                    monthly: monthly.clone(),
                    wallet: rebuilt.1.clone(),
                })
            })
            .collect())?;
        tracing::debug!(user = %user_id, year, months = rebuilt.len(), "monthly aggregates recomputed");
        Ok(rebuilt)
    }
}
