use base64::Engine as _;
use sea_orm::{Condition, QueryFilter, QueryOrder, QuerySelect, prelude::*};
use serde::{Deserialize, Serialize};

use crate::{LedgerError, ResultLedger, Transaction, transactions, util};

use super::Ledger;

/// One window of a partition, newest first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub items: Vec<Transaction>,
    /// Resume token for the next page; `None` at the end of the partition.
    pub next_cursor: Option<String>,
    /// Records in this window that could not be decoded.
    pub skipped: usize,
}

/// Last key a page returned. The next page starts strictly after it, so
/// appends behind the cursor never shift what comes next.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct TransactionsCursor {
    year: i32,
    occurred_at_ms: i64,
    transaction_id: String,
}

impl TransactionsCursor {
    fn encode(&self) -> ResultLedger<String> {
        let bytes = serde_json::to_vec(self)
            .map_err(|_| LedgerError::InvalidCursor("invalid transactions cursor".to_string()))?;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }

    fn decode(input: &str) -> ResultLedger<Self> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(input.trim().as_bytes())
            .map_err(|_| LedgerError::InvalidCursor("invalid transactions cursor".to_string()))?;
        serde_json::from_slice::<Self>(&bytes)
            .map_err(|_| LedgerError::InvalidCursor("invalid transactions cursor".to_string()))
    }
}

impl Ledger {
    /// Reads one page of the `(user, year)` partition.
    ///
    /// Ordering is `occurred_at DESC, transaction_id ASC`. `limit` defaults to
    /// the configured page size. Malformed records are skipped and counted;
    /// they still advance the cursor.
    pub async fn page(
        &self,
        user_id: &str,
        year: i32,
        cursor: Option<&str>,
        limit: Option<u64>,
    ) -> ResultLedger<Page> {
        let user_id = util::require_user(user_id)?;
        let limit = self.page_limit(limit)?;

        let limit_plus_one = limit.saturating_add(1);
        let mut query = transactions::Entity::find()
            .filter(transactions::Column::TransactionUserId.eq(user_id))
            .filter(transactions::Column::PartitionYear.eq(year))
            .order_by_desc(transactions::Column::OccurredAtMs)
            .order_by_asc(transactions::Column::TransactionId)
            .limit(limit_plus_one);

        if let Some(cursor) = cursor {
            let cursor = TransactionsCursor::decode(cursor)?;
            if cursor.year != year {
                return Err(LedgerError::InvalidCursor(format!(
                    "cursor belongs to {}, not {year}",
                    cursor.year
                )));
            }
            query = query.filter(
                Condition::any()
                    .add(transactions::Column::OccurredAtMs.lt(cursor.occurred_at_ms))
                    .add(
                        Condition::all()
                            .add(transactions::Column::OccurredAtMs.eq(cursor.occurred_at_ms))
                            .add(transactions::Column::TransactionId.gt(cursor.transaction_id)),
                    ),
            );
        }

        let rows: Vec<transactions::Model> = query.all(&self.database).await?;
        let has_more = rows.len() > limit as usize;

        let mut items = Vec::with_capacity(rows.len().min(limit as usize));
        let mut skipped = 0;
        let mut last_key = None;
        for model in rows.into_iter().take(limit as usize) {
            last_key = Some((model.occurred_at_ms, model.transaction_id.clone()));
            match Transaction::try_from(model) {
                Ok(tx) => items.push(tx),
                Err(err) => {
                    tracing::warn!("{err}");
                    skipped += 1;
                }
            }
        }

        let next_cursor = if has_more {
            last_key
                .map(|(occurred_at_ms, transaction_id)| TransactionsCursor {
                    year,
                    occurred_at_ms,
                    transaction_id,
                })
                .map(|c| c.encode())
                .transpose()?
        } else {
            None
        };

        Ok(Page {
            items,
            next_cursor,
            skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_survives_encoding() {
        let cursor = TransactionsCursor {
            year: 2024,
            occurred_at_ms: 1_710_460_800_000,
            transaction_id: "tx-1".to_string(),
        };
        let token = cursor.encode().unwrap();
        assert!(!token.contains('='));
        assert_eq!(TransactionsCursor::decode(&token).unwrap(), cursor);
    }

    #[test]
    fn garbage_cursor_is_rejected() {
        assert!(matches!(
            TransactionsCursor::decode("not a cursor"),
            Err(LedgerError::InvalidCursor(_))
        ));
        let json_but_wrong = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b"{\"a\":1}");
        assert!(matches!(
            TransactionsCursor::decode(&json_but_wrong),
            Err(LedgerError::InvalidCursor(_))
        ));
    }
}
