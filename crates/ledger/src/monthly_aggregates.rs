//! Per-user, per-month income and expense totals.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{Amount, LedgerError, aggregates::Totals, util};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyAggregate {
    pub user_id: String,
    pub year: i32,
    pub month: u32,
    pub income: Amount,
    pub expenses: Amount,
    pub updated_at: Option<DateTime<Utc>>,
}

impl MonthlyAggregate {
    pub fn empty(user_id: impl Into<String>, year: i32, month: u32) -> Self {
        Self {
            user_id: user_id.into(),
            year,
            month,
            income: Amount::ZERO,
            expenses: Amount::ZERO,
            updated_at: None,
        }
    }

    pub(crate) fn from_totals(user_id: &str, year: i32, month: u32, totals: &Totals) -> Self {
        Self {
            user_id: user_id.to_string(),
            year,
            month,
            income: totals.income,
            expenses: totals.expenses,
            updated_at: totals.updated_at_ms.and_then(util::datetime_from_ms),
        }
    }

    /// Two-digit month key, e.g. `"03"`.
    pub fn month_key(&self) -> String {
        util::month_label(self.month)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "monthly_aggregates")]
pub struct Model {
    /// `"{user_id}/{year}/{MM}"`
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: String,
    pub year: i32,
    pub month: String,
    pub income: String,
    pub expenses: String,
    pub updated_at: String,
    pub version: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

pub(crate) fn document_id(user_id: &str, year: i32, month: u32) -> String {
    format!("{user_id}/{year}/{}", util::month_label(month))
}

impl From<&Model> for Totals {
    fn from(model: &Model) -> Self {
        Totals {
            income: Amount::parse_stored(&model.income, "income"),
            expenses: Amount::parse_stored(&model.expenses, "expenses"),
            updated_at_ms: model.updated_at.trim().parse().ok(),
        }
    }
}

impl TryFrom<Model> for MonthlyAggregate {
    type Error = LedgerError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let month = util::parse_month_label(&model.month).ok_or_else(|| {
            LedgerError::DecodeSkipped(format!("aggregate {}: month {:?}", model.id, model.month))
        })?;
        let totals = Totals::from(&model);
        Ok(MonthlyAggregate::from_totals(
            &model.user_id,
            model.year,
            month,
            &totals,
        ))
    }
}
