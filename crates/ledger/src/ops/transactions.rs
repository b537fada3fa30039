use sea_orm::{ConnectionTrait, QueryFilter, TransactionTrait, prelude::*};

use crate::{
    AggregateDelta, AggregateUpdate, FeedEvent, LedgerError, NewTransaction, ResultLedger,
    SqlAggregates, Transaction, aggregates::is_unique_violation, transactions, util,
};

use super::{Ledger, with_tx};

/// Decodes a record a caller asked for by id. Unlike scans, a malformed
/// record cannot be skipped here.
pub(super) fn decode_requested(model: transactions::Model) -> ResultLedger<Transaction> {
    Transaction::try_from(model).map_err(|err| match err {
        LedgerError::DecodeSkipped(reason) => LedgerError::InvalidTransaction(reason),
        other => other,
    })
}

async fn find_in_partition<C>(
    conn: &C,
    user_id: &str,
    transaction_id: &str,
    year: i32,
) -> ResultLedger<Option<transactions::Model>>
where
    C: ConnectionTrait,
{
    let model = transactions::Entity::find_by_id(transaction_id.to_string())
        .filter(transactions::Column::TransactionUserId.eq(user_id))
        .filter(transactions::Column::PartitionYear.eq(year))
        .one(conn)
        .await?;
    Ok(model)
}

impl Ledger {
    /// Appends a transaction to the `(user, year)` partition of its date and
    /// applies it to the month aggregate and the running balance.
    ///
    /// The record is committed together with both aggregate updates or not at
    /// all. Subscribers are notified after the commit, in commit order.
    pub async fn append(&self, user_id: &str, new: NewTransaction) -> ResultLedger<Transaction> {
        let user_id = util::require_user(user_id)?;
        let tx = Transaction::from_new(user_id, new)?;

        self.append_staged(&tx).await?;
        tracing::debug!(
            transaction = %tx.id,
            user = %tx.user_id,
            year = tx.year(),
            "transaction appended"
        );
        Ok(tx)
    }

    async fn append_staged(&self, tx: &Transaction) -> ResultLedger<AggregateUpdate> {
        with_tx!(self, |db_tx| {
            let inserted = transactions::Entity::insert(transactions::ActiveModel::from(tx))
                .exec_without_returning(&db_tx)
                .await;
            match inserted {
                Ok(_) => {}
                Err(err) if is_unique_violation(&err) => {
                    return Err(LedgerError::DuplicateTransaction(tx.id.clone()));
                }
                Err(err) => return Err(err.into()),
            }

            self.aggregator
                .apply(&SqlAggregates::new(&db_tx), &AggregateDelta::added(tx))
                .await
        }, publish |update| vec![
            FeedEvent::TransactionAdded(tx.clone()),
            FeedEvent::AggregateUpdated(update.clone()),
        ])
    }

    /// Removes a transaction, looked up by id inside its `(user, year)`
    /// partition, and reverses its effect on the aggregates.
    ///
    /// Returns the removed transaction. Removing an id that is not (or no
    /// longer) stored fails with [`LedgerError::NotFound`] and changes nothing.
    pub async fn remove(
        &self,
        user_id: &str,
        transaction_id: &str,
        year: i32,
    ) -> ResultLedger<Transaction> {
        let user_id = util::require_user(user_id)?;

        let (tx, _update) = with_tx!(self, |db_tx| {
            let model = find_in_partition(&db_tx, user_id, transaction_id, year)
                .await?
                .ok_or_else(|| LedgerError::NotFound(transaction_id.to_string()))?;
            let tx = decode_requested(model)?;

            let deleted = transactions::Entity::delete_many()
                .filter(transactions::Column::TransactionId.eq(tx.id.clone()))
                .filter(transactions::Column::TransactionUserId.eq(user_id))
                .exec(&db_tx)
                .await?;
            if deleted.rows_affected == 0 {
                return Err(LedgerError::NotFound(transaction_id.to_string()));
            }

            let update = self
                .aggregator
                .apply(&SqlAggregates::new(&db_tx), &AggregateDelta::removed(&tx))
                .await?;
            Ok::<_, LedgerError>((tx, update))
        }, publish |removed| vec![
            FeedEvent::TransactionRemoved(removed.0.clone()),
            FeedEvent::AggregateUpdated(removed.1.clone()),
        ])?;
        tracing::debug!(transaction = %tx.id, user = %tx.user_id, year, "transaction removed");
        Ok(tx)
    }

    /// Looks a single transaction up by id within its partition.
    pub async fn transaction(
        &self,
        user_id: &str,
        transaction_id: &str,
        year: i32,
    ) -> ResultLedger<Transaction> {
        let user_id = util::require_user(user_id)?;
        let model = find_in_partition(&self.database, user_id, transaction_id, year)
            .await?
            .ok_or_else(|| LedgerError::NotFound(transaction_id.to_string()))?;
        decode_requested(model)
    }
}
