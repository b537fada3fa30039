use sea_orm::{QueryFilter, QueryOrder, TransactionTrait, prelude::*};

use crate::{
    FeedFilter, FeedSnapshot, LedgerError, ResultLedger, Subscription, SubscriptionHandle,
    Transaction, transactions, util,
};

use super::{
    Ledger,
    balances::{read_monthly, read_wallet},
    with_tx,
};

impl Ledger {
    /// Current state of the view `filter` selects, read in one storage
    /// transaction.
    pub async fn snapshot(&self, filter: &FeedFilter) -> ResultLedger<FeedSnapshot> {
        let user_id = util::require_user(&filter.user_id)?;

        with_tx!(self, |db_tx| {
            let mut query = transactions::Entity::find()
                .filter(transactions::Column::TransactionUserId.eq(user_id))
                .order_by_desc(transactions::Column::OccurredAtMs)
                .order_by_asc(transactions::Column::TransactionId);
            if let Some(year) = filter.year {
                query = query.filter(transactions::Column::PartitionYear.eq(year));
            }

            let mut skipped = 0;
            let mut records = Vec::new();
            for model in query.all(&db_tx).await? {
                match Transaction::try_from(model) {
                    Ok(tx) => records.push(tx),
                    Err(err) => {
                        tracing::warn!("{err}");
                        skipped += 1;
                    }
                }
            }

            let (aggregates, skipped_aggregates) = read_monthly(&db_tx, user_id, filter.year).await?;
            let wallet = read_wallet(&db_tx, user_id).await?;

            Ok::<_, LedgerError>(FeedSnapshot {
                transactions: records,
                aggregates,
                wallet,
                skipped: skipped + skipped_aggregates,
            })
        })
    }

    /// Subscribes to changes of the view `filter` selects.
    ///
    /// The first event is always a [`FeedEvent::Snapshot`](crate::FeedEvent::Snapshot)
    /// of that view, followed by incremental events.
    pub async fn subscribe(&self, filter: FeedFilter) -> ResultLedger<Subscription> {
        let filter = FeedFilter {
            user_id: util::require_user(&filter.user_id)?.to_string(),
            ..filter
        };

        // Register before reading so nothing committed meanwhile is missed.
        let subscription = self.feed.register(filter.clone());
        let snapshot = self.snapshot(&filter).await?;
        self.feed.deliver_snapshot(subscription.handle(), snapshot)?;
        Ok(subscription)
    }

    /// Replays the full current view to an active subscription, then resumes
    /// incremental delivery.
    pub async fn resync(&self, handle: SubscriptionHandle) -> ResultLedger<()> {
        let filter = self.feed.begin_resync(handle)?;
        let snapshot = self.snapshot(&filter).await?;
        self.feed.deliver_snapshot(handle, snapshot)
    }

    /// Stops delivery to `handle` before returning. Unsubscribing twice is
    /// not an error.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        if self.feed.unsubscribe(handle) {
            tracing::debug!(?handle, "unsubscribed");
        }
    }
}
