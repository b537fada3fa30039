#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use ledger::{Amount, Ledger, LedgerBuilder};
use migration::MigratorTrait;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

/// In-memory SQLite lives as long as its one pooled connection.
pub async fn memory_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    db
}

pub async fn ledger_with_db() -> (Ledger, DatabaseConnection) {
    ledger_from(Ledger::builder()).await
}

pub async fn ledger_from(builder: LedgerBuilder) -> (Ledger, DatabaseConnection) {
    let db = memory_db().await;
    let ledger = builder.database(db.clone()).build().await.unwrap();
    (ledger, db)
}

pub fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap()
}

pub fn eur(raw: &str) -> Amount {
    raw.parse().unwrap()
}
