//! Transaction primitives.
//!
//! A `Transaction` is a single income or expense owned by one user. Stored
//! records keep the historical field names and text encodings, plus two
//! derived columns (`partition_year`, `occurred_at_ms`) used to scope and
//! order reads.

use chrono::{DateTime, Datelike, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Amount, LedgerError, ResultLedger, commands::NewTransaction, util};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    #[serde(rename = "income")]
    Income,
    #[serde(rename = "expenses")]
    Expense,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expenses",
        }
    }

    /// Applies the sign this kind carries when aggregated.
    pub fn signed(self, amount: Amount) -> Amount {
        match self {
            Self::Income => amount,
            Self::Expense => -amount,
        }
    }
}

impl TryFrom<&str> for TransactionKind {
    type Error = LedgerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "income" => Ok(Self::Income),
            "expenses" | "expense" => Ok(Self::Expense),
            other => Err(LedgerError::InvalidTransaction(format!(
                "invalid transaction kind: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    /// Always positive; the sign comes from `kind`.
    pub amount: Amount,
    pub kind: TransactionKind,
    pub category: String,
    pub remark: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

impl Transaction {
    /// Validates a creation request and binds it to its owner.
    pub(crate) fn from_new(user_id: &str, new: NewTransaction) -> ResultLedger<Self> {
        if !new.amount.is_positive() {
            return Err(LedgerError::InvalidTransaction(
                "amount must be > 0".to_string(),
            ));
        }
        let category = new.category.trim();
        if category.is_empty() {
            return Err(LedgerError::InvalidTransaction(
                "category must not be empty".to_string(),
            ));
        }
        let id = match new.id {
            Some(id) if id.trim().is_empty() => {
                return Err(LedgerError::InvalidTransaction(
                    "transaction id must not be empty".to_string(),
                ));
            }
            Some(id) => id.trim().to_string(),
            None => Uuid::new_v4().to_string(),
        };
        let occurred_at = util::datetime_from_ms(new.occurred_at.timestamp_millis())
            .ok_or_else(|| LedgerError::InvalidTransaction("date out of range".to_string()))?;

        Ok(Self {
            id,
            user_id: user_id.to_string(),
            amount: new.amount,
            kind: new.kind,
            category: category.to_string(),
            remark: new
                .remark
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
            occurred_at,
            tags: dedup_tags(new.tags),
        })
    }

    /// The partition (fiscal year) this transaction lives in.
    pub fn year(&self) -> i32 {
        self.occurred_at.year()
    }

    pub fn month(&self) -> u32 {
        self.occurred_at.month()
    }

    /// Amount with the sign of its kind (income positive, expense negative).
    pub fn signed_amount(&self) -> Amount {
        self.kind.signed(self.amount)
    }
}

fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() || out.iter().any(|t| t == tag) {
            continue;
        }
        out.push(tag.to_string());
    }
    out
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub transaction_id: String,
    pub transaction_user_id: String,
    pub transaction_amount: String,
    pub transaction_type: String,
    pub transaction_category: String,
    pub transaction_remark: String,
    pub transaction_date: String,
    pub transaction_tags: String,
    pub partition_year: i32,
    pub occurred_at_ms: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Transaction> for ActiveModel {
    fn from(tx: &Transaction) -> Self {
        let millis = tx.occurred_at.timestamp_millis();
        Self {
            transaction_id: ActiveValue::Set(tx.id.clone()),
            transaction_user_id: ActiveValue::Set(tx.user_id.clone()),
            transaction_amount: ActiveValue::Set(tx.amount.to_string()),
            transaction_type: ActiveValue::Set(tx.kind.as_str().to_string()),
            transaction_category: ActiveValue::Set(tx.category.clone()),
            transaction_remark: ActiveValue::Set(tx.remark.clone().unwrap_or_default()),
            transaction_date: ActiveValue::Set(millis.to_string()),
            transaction_tags: ActiveValue::Set(
                serde_json::Value::from(tx.tags.clone()).to_string(),
            ),
            partition_year: ActiveValue::Set(tx.year()),
            occurred_at_ms: ActiveValue::Set(millis),
        }
    }
}

impl TryFrom<Model> for Transaction {
    type Error = LedgerError;

    /// Decodes a stored record. Failures are reported as
    /// [`LedgerError::DecodeSkipped`]; readers count and drop them.
    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let skipped = |reason: String| {
            LedgerError::DecodeSkipped(format!("transaction {}: {reason}", model.transaction_id))
        };

        let amount = Amount::parse_lenient(&model.transaction_amount)
            .ok_or_else(|| skipped(format!("amount {:?}", model.transaction_amount)))?;
        if !amount.is_positive() {
            return Err(skipped(format!("non-positive amount {amount}")));
        }
        let kind = TransactionKind::try_from(model.transaction_type.as_str())
            .map_err(|_| skipped(format!("type {:?}", model.transaction_type)))?;
        let occurred_at = model
            .transaction_date
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(util::datetime_from_ms)
            .ok_or_else(|| skipped(format!("date {:?}", model.transaction_date)))?;
        // Tags were optional historically; anything but a string array reads as none.
        let tags = serde_json::from_str::<Vec<String>>(&model.transaction_tags).unwrap_or_default();
        let remark = Some(model.transaction_remark).filter(|r| !r.is_empty());

        Ok(Self {
            id: model.transaction_id,
            user_id: model.transaction_user_id,
            amount,
            kind,
            category: model.transaction_category,
            remark,
            occurred_at,
            tags,
        })
    }
}
