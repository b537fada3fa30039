//! The module contains the running `WalletBalance` of a user.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{Amount, aggregates::Totals, util};

/// Net of every transaction a user currently has in the ledger.
///
/// This running total is authoritative; monthly rollups are derived views
/// that can be rebuilt from the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub user_id: String,
    pub income: Amount,
    pub expenses: Amount,
    pub balance: Amount,
    pub updated_at: Option<DateTime<Utc>>,
}

impl WalletBalance {
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            income: Amount::ZERO,
            expenses: Amount::ZERO,
            balance: Amount::ZERO,
            updated_at: None,
        }
    }

    pub(crate) fn from_totals(user_id: &str, totals: &Totals) -> Self {
        Self {
            user_id: user_id.to_string(),
            income: totals.income,
            expenses: totals.expenses,
            balance: totals.income - totals.expenses,
            updated_at: totals.updated_at_ms.and_then(util::datetime_from_ms),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "wallets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,
    pub balance: String,
    pub income: String,
    pub expenses: String,
    pub updated_at: String,
    pub version: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Model> for Totals {
    /// `balance` is not read back: it is always `income - expenses`.
    fn from(model: &Model) -> Self {
        Totals {
            income: Amount::parse_stored(&model.income, "income"),
            expenses: Amount::parse_stored(&model.expenses, "expenses"),
            updated_at_ms: model.updated_at.trim().parse().ok(),
        }
    }
}

impl From<Model> for WalletBalance {
    fn from(model: Model) -> Self {
        let totals = Totals::from(&model);
        WalletBalance::from_totals(&model.user_id, &totals)
    }
}
