use std::sync::Arc;

use ledger::{
    AggregateKey, Amount, AtomicUpdate, LedgerError, NewTransaction, SqlAggregates, Totals,
    Transaction, WalletBalance, monthly_aggregates, transactions, wallets,
};
use sea_orm::{ActiveValue, ConnectionTrait, EntityTrait, QueryFilter, prelude::*, sea_query::Expr};

mod common;

use common::{at, eur, ledger_from, ledger_with_db};

fn expense(amount: &str, category: &str, day: u32) -> NewTransaction {
    NewTransaction::expense(eur(amount), category, at(2024, 3, day, 12))
}

fn income(amount: &str, category: &str, day: u32) -> NewTransaction {
    NewTransaction::income(eur(amount), category, at(2024, 3, day, 12))
}

fn net(stored: &[Transaction]) -> Amount {
    stored.iter().map(Transaction::signed_amount).sum()
}

#[tokio::test]
async fn balance_matches_stored_transactions_after_every_mutation() {
    let (ledger, _db) = ledger_with_db().await;
    let mut stored: Vec<Transaction> = Vec::new();

    for new in [
        income("1500.00", "Salary", 1),
        expense("42.10", "Food", 2),
        expense("900", "Rent", 3),
        income("12.5", "Gifts", 4),
        expense("0.99", "Food", 5),
    ] {
        stored.push(ledger.append("alice", new).await.unwrap());
        assert_eq!(ledger.balance("alice").await.unwrap().balance, net(&stored));
    }

    for id in [stored[1].id.clone(), stored[3].id.clone()] {
        ledger.remove("alice", &id, 2024).await.unwrap();
        stored.retain(|tx| tx.id != id);
        assert_eq!(ledger.balance("alice").await.unwrap().balance, net(&stored));
    }

    let wallet = ledger.balance("alice").await.unwrap();
    assert_eq!(wallet.income, eur("1500.00"));
    assert_eq!(wallet.expenses, eur("900.99"));
    assert_eq!(wallet.balance, eur("599.01"));
}

#[tokio::test]
async fn deleting_twice_reports_not_found_and_keeps_totals() {
    let (ledger, _db) = ledger_with_db().await;
    let tx = ledger
        .append("alice", expense("20.00", "Food", 10))
        .await
        .unwrap();

    ledger.remove("alice", &tx.id, 2024).await.unwrap();
    let err = ledger.remove("alice", &tx.id, 2024).await.unwrap_err();
    assert_eq!(err, LedgerError::NotFound(tx.id.clone()));

    let month = ledger.monthly_aggregate("alice", 2024, 3).await.unwrap();
    assert_eq!(month.expenses, Amount::ZERO);
    assert_eq!(ledger.balance("alice").await.unwrap().balance, Amount::ZERO);
}

#[tokio::test]
async fn removal_is_scoped_to_owner_and_year() {
    let (ledger, _db) = ledger_with_db().await;
    let tx = ledger
        .append("alice", expense("20.00", "Food", 10))
        .await
        .unwrap();

    assert!(matches!(
        ledger.remove("alice", &tx.id, 2023).await,
        Err(LedgerError::NotFound(_))
    ));
    assert!(matches!(
        ledger.remove("bob", &tx.id, 2024).await,
        Err(LedgerError::NotFound(_))
    ));
    assert_eq!(ledger.transaction("alice", &tx.id, 2024).await.unwrap(), tx);
}

#[tokio::test]
async fn year_summary_buckets_by_month_and_category() {
    let (ledger, _db) = ledger_with_db().await;
    let food = ledger
        .append("alice", expense("50.00", "Food", 15))
        .await
        .unwrap();
    ledger
        .append("alice", income("100.00", "Salary", 20))
        .await
        .unwrap();
    let before = ledger.balance("alice").await.unwrap().balance;

    let report = ledger.summarize("alice", 2024).await.unwrap();
    assert_eq!(report.monthly["03"].income, eur("100.00"));
    assert_eq!(report.monthly["03"].expenses, eur("50.00"));
    assert_eq!(report.totals.income, eur("100.00"));
    assert_eq!(report.totals.expenses, eur("50.00"));
    assert_eq!(report.by_category.expenses["Food"], eur("50.00"));
    assert_eq!(report.by_category.income["Salary"], eur("100.00"));
    assert_eq!(report.transaction_count, 2);

    ledger.remove("alice", &food.id, 2024).await.unwrap();

    let report = ledger.summarize("alice", 2024).await.unwrap();
    assert_eq!(report.monthly["03"].expenses, eur("0.00"));
    let after = ledger.balance("alice").await.unwrap().balance;
    assert_eq!(after - before, eur("50.00"));
}

#[tokio::test]
async fn summary_ignores_other_years_and_users() {
    let (ledger, _db) = ledger_with_db().await;
    ledger
        .append(
            "alice",
            NewTransaction::income(eur("10"), "Salary", at(2023, 12, 31, 23)),
        )
        .await
        .unwrap();
    ledger
        .append("bob", income("10", "Salary", 1))
        .await
        .unwrap();
    ledger
        .append(
            "alice",
            NewTransaction::expense(eur("3"), "Food", at(2024, 1, 1, 0)),
        )
        .await
        .unwrap();

    let report = ledger.summarize("alice", 2024).await.unwrap();
    assert_eq!(report.transaction_count, 1);
    assert_eq!(report.monthly.keys().collect::<Vec<_>>(), vec!["01"]);
    assert_eq!(report.totals.income, Amount::ZERO);
}

#[tokio::test]
async fn pages_cover_the_partition_exactly_once() {
    let (ledger, _db) = ledger_with_db().await;

    let mut expected = Vec::new();
    for i in 0..23u32 {
        // Three transactions per timestamp to exercise the id tie-break.
        let when = at(2024, 1 + i / 3, 1, 9);
        let new = NewTransaction::expense(eur("1.00"), "Food", when).id(format!("tx-{:02}", 22 - i));
        expected.push(ledger.append("alice", new).await.unwrap());
    }
    expected.sort_by(|a, b| {
        b.occurred_at
            .cmp(&a.occurred_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = ledger
            .page("alice", 2024, cursor.as_deref(), Some(5))
            .await
            .unwrap();
        assert!(page.items.len() <= 5);
        assert_eq!(page.skipped, 0);
        seen.extend(page.items);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    assert_eq!(seen, expected);
}

#[tokio::test]
async fn cursor_resumes_after_its_key_despite_new_appends() {
    let (ledger, _db) = ledger_with_db().await;
    for day in 1..=6 {
        ledger
            .append("alice", expense("1.00", "Food", day))
            .await
            .unwrap();
    }

    let all = ledger.page("alice", 2024, None, Some(6)).await.unwrap().items;
    let first = ledger.page("alice", 2024, None, Some(3)).await.unwrap();
    assert_eq!(first.items, all[..3]);

    // Newer than everything returned so far, and one older than the rest.
    ledger
        .append("alice", expense("1.00", "Food", 20))
        .await
        .unwrap();
    let oldest = ledger
        .append(
            "alice",
            NewTransaction::expense(eur("1.00"), "Food", at(2024, 1, 1, 0)),
        )
        .await
        .unwrap();

    let second = ledger
        .page("alice", 2024, first.next_cursor.as_deref(), Some(3))
        .await
        .unwrap();
    assert_eq!(second.items, all[3..]);

    let third = ledger
        .page("alice", 2024, second.next_cursor.as_deref(), Some(3))
        .await
        .unwrap();
    assert_eq!(third.items, vec![oldest]);
    assert_eq!(third.next_cursor, None);
}

#[tokio::test]
async fn bad_cursors_and_page_sizes_are_rejected() {
    let (ledger, _db) = ledger_with_db().await;
    for day in 1..=3 {
        ledger
            .append("alice", expense("1.00", "Food", day))
            .await
            .unwrap();
    }
    let page = ledger.page("alice", 2024, None, Some(1)).await.unwrap();
    let cursor = page.next_cursor.unwrap();

    assert!(matches!(
        ledger.page("alice", 2023, Some(&cursor), None).await,
        Err(LedgerError::InvalidCursor(_))
    ));
    assert!(matches!(
        ledger.page("alice", 2024, Some("%%%"), None).await,
        Err(LedgerError::InvalidCursor(_))
    ));
    assert!(matches!(
        ledger.page("alice", 2024, None, Some(0)).await,
        Err(LedgerError::InvalidPage(_))
    ));
    assert!(matches!(
        ledger.page("alice", 2024, None, Some(501)).await,
        Err(LedgerError::InvalidPage(_))
    ));
}

#[tokio::test]
async fn default_page_size_comes_from_the_builder() {
    let (ledger, _db) = ledger_from(ledger::Ledger::builder().page_size(2)).await;
    for day in 1..=3 {
        ledger
            .append("alice", expense("1.00", "Food", day))
            .await
            .unwrap();
    }
    let page = ledger.page("alice", 2024, None, None).await.unwrap();
    assert_eq!(page.items.len(), 2);
    assert!(page.next_cursor.is_some());
}

#[tokio::test]
async fn rejected_requests_store_nothing() {
    let (ledger, _db) = ledger_with_db().await;

    assert_eq!(
        ledger.append("  ", income("10", "Salary", 1)).await,
        Err(LedgerError::Unauthenticated)
    );
    assert!(matches!(
        ledger.append("alice", income("0", "Salary", 1)).await,
        Err(LedgerError::InvalidTransaction(_))
    ));
    assert!(matches!(
        ledger.append("alice", income("10", " ", 1)).await,
        Err(LedgerError::InvalidTransaction(_))
    ));
    assert_eq!(
        ledger.balance("").await,
        Err(LedgerError::Unauthenticated)
    );

    let page = ledger.page("alice", 2024, None, None).await.unwrap();
    assert!(page.items.is_empty());
    assert_eq!(ledger.balance("alice").await.unwrap().balance, Amount::ZERO);
}

#[tokio::test]
async fn duplicate_ids_leave_aggregates_untouched() {
    let (ledger, _db) = ledger_with_db().await;
    ledger
        .append("alice", income("10", "Salary", 1).id("fixed"))
        .await
        .unwrap();

    let err = ledger
        .append("alice", income("99", "Salary", 2).id("fixed"))
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::DuplicateTransaction("fixed".to_string()));

    assert_eq!(ledger.balance("alice").await.unwrap().income, eur("10"));
    let month = ledger.monthly_aggregate("alice", 2024, 3).await.unwrap();
    assert_eq!(month.income, eur("10"));
}

#[tokio::test]
async fn stored_records_keep_their_wire_encoding() {
    let (ledger, db) = ledger_with_db().await;
    let tx = ledger
        .append(
            "alice",
            expense("50", "Food", 15)
                .remark("lunch")
                .tags(["work", "lunch", "work"]),
        )
        .await
        .unwrap();
    assert_eq!(tx.tags, vec!["work".to_string(), "lunch".to_string()]);

    let model = transactions::Entity::find_by_id(tx.id.clone())
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(model.transaction_amount, "50.00");
    assert_eq!(model.transaction_type, "expenses");
    assert_eq!(model.transaction_remark, "lunch");
    assert_eq!(
        model.transaction_date,
        tx.occurred_at.timestamp_millis().to_string()
    );
    assert_eq!(model.transaction_tags, "[\"work\",\"lunch\"]");
    assert_eq!(model.partition_year, 2024);

    let month = monthly_aggregates::Entity::find_by_id("alice/2024/03".to_string())
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(month.expenses, "50.00");
    assert_eq!(month.income, "0.00");
    assert!(month.updated_at.parse::<i64>().is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_lose_no_updates() {
    let (ledger, _db) = ledger_with_db().await;
    let ledger = Arc::new(ledger);
    let n = 24;

    let mut tasks = Vec::new();
    for i in 0..n {
        let ledger = Arc::clone(&ledger);
        tasks.push(tokio::spawn(async move {
            ledger
                .append("alice", income("12.50", "Salary", 1 + i % 28))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let month = ledger.monthly_aggregate("alice", 2024, 3).await.unwrap();
    assert_eq!(month.income, Amount::new(1_250 * n as i64));
    assert_eq!(
        ledger.balance("alice").await.unwrap().balance,
        Amount::new(1_250 * n as i64)
    );
}

#[tokio::test]
async fn malformed_records_are_skipped_by_scans() {
    let (ledger, db) = ledger_with_db().await;
    ledger
        .append("alice", income("10", "Salary", 1))
        .await
        .unwrap();

    let broken = transactions::ActiveModel {
        transaction_id: ActiveValue::Set("broken".to_string()),
        transaction_user_id: ActiveValue::Set("alice".to_string()),
        transaction_amount: ActiveValue::Set("ten euros".to_string()),
        transaction_type: ActiveValue::Set("income".to_string()),
        transaction_category: ActiveValue::Set("Salary".to_string()),
        transaction_remark: ActiveValue::Set(String::new()),
        transaction_date: ActiveValue::Set("1709294400000".to_string()),
        transaction_tags: ActiveValue::Set("[]".to_string()),
        partition_year: ActiveValue::Set(2024),
        occurred_at_ms: ActiveValue::Set(1_709_294_400_000),
    };
    transactions::Entity::insert(broken)
        .exec_without_returning(&db)
        .await
        .unwrap();

    let page = ledger.page("alice", 2024, None, None).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.skipped, 1);

    let report = ledger.summarize("alice", 2024).await.unwrap();
    assert_eq!(report.transaction_count, 1);
    assert_eq!(report.skipped, 1);

    assert!(matches!(
        ledger.remove("alice", "broken", 2024).await,
        Err(LedgerError::InvalidTransaction(_))
    ));
}

#[tokio::test]
async fn corrupt_stored_totals_restart_from_zero() {
    let (ledger, db) = ledger_with_db().await;
    ledger
        .append("alice", income("10", "Salary", 1))
        .await
        .unwrap();

    wallets::Entity::update_many()
        .col_expr(wallets::Column::Income, Expr::value("not a number"))
        .filter(wallets::Column::UserId.eq("alice"))
        .exec(&db)
        .await
        .unwrap();
    assert_eq!(ledger.balance("alice").await.unwrap().income, Amount::ZERO);

    ledger
        .append("alice", income("5", "Salary", 2))
        .await
        .unwrap();
    let wallet = ledger.balance("alice").await.unwrap();
    assert_eq!(wallet.income, eur("5"));
    assert_eq!(wallet.balance, eur("5"));
}

#[tokio::test]
async fn recompute_rebuilds_monthly_totals_from_transactions() {
    let (ledger, db) = ledger_with_db().await;
    ledger
        .append("alice", income("10", "Salary", 1))
        .await
        .unwrap();
    ledger
        .append("alice", expense("4", "Food", 2))
        .await
        .unwrap();

    monthly_aggregates::Entity::update_many()
        .col_expr(monthly_aggregates::Column::Income, Expr::value("999.00"))
        .filter(monthly_aggregates::Column::Id.eq("alice/2024/03"))
        .exec(&db)
        .await
        .unwrap();
    // A month whose transactions are gone entirely.
    db.execute_unprepared(
        "INSERT INTO monthly_aggregates (id, user_id, year, month, income, expenses, updated_at, version) \
         VALUES ('alice/2024/07', 'alice', 2024, '07', '3.00', '0.00', '0', 1)",
    )
    .await
    .unwrap();

    let rebuilt = ledger
        .recompute_monthly_aggregates("alice", 2024)
        .await
        .unwrap();
    assert_eq!(rebuilt.len(), 2);
    assert_eq!(rebuilt[0].month_key(), "03");
    assert_eq!(rebuilt[0].income, eur("10"));
    assert_eq!(rebuilt[0].expenses, eur("4"));
    assert_eq!(rebuilt[1].month_key(), "07");
    assert_eq!(rebuilt[1].income, Amount::ZERO);

    let stored = ledger.monthly_aggregates("alice", 2024).await.unwrap();
    assert_eq!(stored, rebuilt);
    assert_eq!(ledger.balance("alice").await.unwrap().balance, eur("6"));
}

#[tokio::test]
async fn failed_aggregation_rolls_the_mutation_back() {
    let (ledger, db) = ledger_with_db().await;
    db.execute_unprepared("DROP TABLE monthly_aggregates")
        .await
        .unwrap();

    let err = ledger
        .append("alice", income("10", "Salary", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AggregationFailed(_)));

    let page = ledger.page("alice", 2024, None, None).await.unwrap();
    assert!(page.items.is_empty());
    assert_eq!(ledger.balance("alice").await.unwrap().balance, Amount::ZERO);
}

#[tokio::test]
async fn sql_aggregates_compare_versions_before_writing() {
    let (_ledger, db) = ledger_with_db().await;
    let store = SqlAggregates::new(&db);
    let key = AggregateKey::wallet("alice");
    let totals = Totals {
        income: eur("1"),
        ..Totals::default()
    };

    assert!(store.write_if_unchanged(&key, None, &totals).await.unwrap());
    assert!(!store.write_if_unchanged(&key, None, &totals).await.unwrap());
    assert!(store.write_if_unchanged(&key, Some(1), &totals).await.unwrap());
    assert!(!store.write_if_unchanged(&key, Some(1), &totals).await.unwrap());

    let read = store.read(&key).await.unwrap().unwrap();
    assert_eq!(read.version, 2);
    assert_eq!(read.value.income, eur("1"));
    assert_eq!(read.value.expenses, Amount::ZERO);
}

#[tokio::test]
async fn monthly_lookups_default_to_zero() {
    let (ledger, _db) = ledger_with_db().await;
    let month = ledger.monthly_aggregate("alice", 2024, 2).await.unwrap();
    assert_eq!(month.income, Amount::ZERO);
    assert_eq!(month.updated_at, None);
    assert!(matches!(
        ledger.monthly_aggregate("alice", 2024, 13).await,
        Err(LedgerError::NotFound(_))
    ));
    assert_eq!(
        ledger.balance("alice").await.unwrap(),
        WalletBalance::empty("alice")
    );
}

#[tokio::test]
async fn float_written_totals_are_rounded_not_reset() {
    let (ledger, db) = ledger_with_db().await;
    ledger
        .append("alice", income("1.00", "Salary", 1))
        .await
        .unwrap();

    monthly_aggregates::Entity::update_many()
        .col_expr(
            monthly_aggregates::Column::Income,
            Expr::value("0.30000000000000004"),
        )
        .filter(monthly_aggregates::Column::Id.eq("alice/2024/03"))
        .exec(&db)
        .await
        .unwrap();
    let month = ledger.monthly_aggregate("alice", 2024, 3).await.unwrap();
    assert_eq!(month.income, eur("0.30"));

    ledger
        .append("alice", income("1.00", "Salary", 2))
        .await
        .unwrap();
    let month = ledger.monthly_aggregate("alice", 2024, 3).await.unwrap();
    assert_eq!(month.income, eur("1.30"));
}

#[tokio::test]
async fn float_written_amounts_are_read_to_the_cent() {
    let (ledger, db) = ledger_with_db().await;
    let legacy = transactions::ActiveModel {
        transaction_id: ActiveValue::Set("legacy".to_string()),
        transaction_user_id: ActiveValue::Set("alice".to_string()),
        transaction_amount: ActiveValue::Set("19.989999999999998".to_string()),
        transaction_type: ActiveValue::Set("expenses".to_string()),
        transaction_category: ActiveValue::Set("Food".to_string()),
        transaction_remark: ActiveValue::Set(String::new()),
        transaction_date: ActiveValue::Set("1709294400000".to_string()),
        transaction_tags: ActiveValue::Set("[]".to_string()),
        partition_year: ActiveValue::Set(2024),
        occurred_at_ms: ActiveValue::Set(1_709_294_400_000),
    };
    transactions::Entity::insert(legacy)
        .exec_without_returning(&db)
        .await
        .unwrap();

    let page = ledger.page("alice", 2024, None, None).await.unwrap();
    assert_eq!(page.skipped, 0);
    assert_eq!(page.items[0].amount, eur("19.99"));

    let report = ledger.summarize("alice", 2024).await.unwrap();
    assert_eq!(report.by_category.expenses["Food"], eur("19.99"));
}

#[tokio::test]
async fn exhausted_aggregation_retries_roll_the_mutation_back() {
    let (ledger, db) = ledger_from(ledger::Ledger::builder().aggregation_attempts(3)).await;
    let kept = ledger
        .append("alice", income("10", "Salary", 1))
        .await
        .unwrap();

    // Every versioned wallet write now changes nothing, as if always beaten
    // by another writer.
    db.execute_unprepared(
        "CREATE TRIGGER wallets_always_stale BEFORE UPDATE ON wallets \
         BEGIN SELECT RAISE(IGNORE); END",
    )
    .await
    .unwrap();

    assert!(matches!(
        ledger.append("alice", income("5", "Salary", 2)).await,
        Err(LedgerError::AggregationConflict(_))
    ));
    assert!(matches!(
        ledger.remove("alice", &kept.id, 2024).await,
        Err(LedgerError::AggregationConflict(_))
    ));

    let page = ledger.page("alice", 2024, None, None).await.unwrap();
    assert_eq!(page.items, vec![kept.clone()]);
    let month = ledger.monthly_aggregate("alice", 2024, 3).await.unwrap();
    assert_eq!(month.income, eur("10"));
    assert_eq!(ledger.balance("alice").await.unwrap().balance, eur("10"));

    db.execute_unprepared("DROP TRIGGER wallets_always_stale")
        .await
        .unwrap();
    ledger.remove("alice", &kept.id, 2024).await.unwrap();
    assert_eq!(ledger.balance("alice").await.unwrap().balance, Amount::ZERO);
}

#[tokio::test]
async fn records_deleted_ahead_of_the_cursor_are_not_served() {
    let (ledger, _db) = ledger_with_db().await;
    for day in 1..=6 {
        ledger
            .append("alice", expense("1.00", "Food", day))
            .await
            .unwrap();
    }

    let all = ledger.page("alice", 2024, None, Some(6)).await.unwrap().items;
    let first = ledger.page("alice", 2024, None, Some(3)).await.unwrap();
    assert_eq!(first.items, all[..3]);

    ledger.remove("alice", &all[4].id, 2024).await.unwrap();

    let second = ledger
        .page("alice", 2024, first.next_cursor.as_deref(), Some(3))
        .await
        .unwrap();
    assert_eq!(second.items, vec![all[3].clone(), all[5].clone()]);
    assert_eq!(second.next_cursor, None);
}
