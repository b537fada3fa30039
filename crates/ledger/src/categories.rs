//! Stored category documents.
//!
//! Categories are curated outside the ledger and arrive loosely typed, so the
//! record is kept as the JSON document it was written as and decoded by the
//! [`CategoryRegistry`](crate::CategoryRegistry).

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "categories")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub document: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
