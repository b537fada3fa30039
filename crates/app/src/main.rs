use std::{error::Error, time::Duration};

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use ledger::{
    Amount, CategoryRegistry, FeedFilter, Ledger, NewTransaction, TransactionKind, categories,
};
use migration::MigratorTrait;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, EntityTrait, Set, sea_query::OnConflict};
use serde::Serialize;
use serde_json::Value;
use tokio::time::{Instant, Interval};

mod settings;

type AppResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(name = "treasure")]
#[command(about = "Record income and expenses and keep balances in sync")]
struct Cli {
    /// Settings file (defaults to an optional `settings.toml`).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Caller identity, as issued by the authentication service.
    #[arg(long, env = "TREASURE_USER", global = true, default_value = "")]
    user: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append a transaction.
    Add(AddArgs),
    /// Delete a transaction by id.
    Delete(DeleteArgs),
    /// Show one page of a year, newest first.
    Page(PageArgs),
    /// Show the running balance.
    Balance,
    /// Summarise a year by month and by category.
    Summarize(YearArgs),
    /// Rebuild the monthly totals of a year from its transactions.
    Recompute(YearArgs),
    Categories(Categories),
    /// Print the current state, then every change, until Ctrl-C.
    Watch(WatchArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
    Income,
    Expense,
}

impl From<Kind> for TransactionKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Income => TransactionKind::Income,
            Kind::Expense => TransactionKind::Expense,
        }
    }
}

#[derive(Args, Debug)]
struct AddArgs {
    #[arg(long, value_enum)]
    kind: Kind,
    /// Decimal amount, e.g. `12.34`.
    #[arg(long, value_parser = parse_amount)]
    amount: Amount,
    #[arg(long)]
    category: String,
    /// `YYYY-MM-DD` or RFC 3339; defaults to now.
    #[arg(long, value_parser = parse_date)]
    date: Option<DateTime<Utc>>,
    #[arg(long)]
    remark: Option<String>,
    #[arg(long = "tag")]
    tags: Vec<String>,
    /// Explicit transaction id; one is generated when absent.
    #[arg(long)]
    id: Option<String>,
}

#[derive(Args, Debug)]
struct DeleteArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    year: i32,
}

#[derive(Args, Debug)]
struct PageArgs {
    #[arg(long)]
    year: i32,
    #[arg(long)]
    cursor: Option<String>,
    #[arg(long)]
    limit: Option<u64>,
}

#[derive(Args, Debug)]
struct YearArgs {
    #[arg(long)]
    year: i32,
}

#[derive(Args, Debug)]
struct Categories {
    #[command(subcommand)]
    command: CategoriesCommand,
}

#[derive(Subcommand, Debug)]
enum CategoriesCommand {
    List {
        #[arg(long, value_enum)]
        kind: Option<Kind>,
    },
    /// Store category documents from a JSON file: either an object keyed by
    /// category id or an array of documents carrying an `id` field.
    Import { file: String },
}

#[derive(Args, Debug)]
struct WatchArgs {
    #[arg(long)]
    year: Option<i32>,
    /// Re-send the full state every N seconds, picking up changes made by
    /// other processes.
    #[arg(long)]
    resync_secs: Option<u64>,
}

fn parse_amount(raw: &str) -> Result<Amount, String> {
    raw.parse::<Amount>().map_err(|err| err.to_string())
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Ok(date.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date| date.and_utc())
        .ok_or_else(|| format!("invalid date: {raw}"))
}

fn print_json<T: Serialize>(value: &T) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn connect_db(config: &settings::Database) -> AppResult<DatabaseConnection> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections.max(1))
        .sqlx_logging(false);
    let db = Database::connect(options).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

fn category_documents(raw: &str) -> AppResult<Vec<(String, Value)>> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        Value::Array(items) => Ok(items
            .into_iter()
            .enumerate()
            .map(|(i, document)| {
                let id = document
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("category-{i}"));
                (id, document)
            })
            .collect()),
        _ => Err("expected a JSON object or array of category documents".into()),
    }
}

async fn import_categories(db: &DatabaseConnection, file: &str) -> AppResult<()> {
    let raw = tokio::fs::read_to_string(file).await?;
    let documents = category_documents(&raw)?;
    let count = documents.len();

    for (id, document) in documents {
        let model = categories::ActiveModel {
            id: Set(id),
            document: Set(document.to_string()),
        };
        categories::Entity::insert(model)
            .on_conflict(
                OnConflict::column(categories::Column::Id)
                    .update_column(categories::Column::Document)
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;
    }

    let registry = CategoryRegistry::load(db).await?;
    tracing::info!(
        imported = count,
        usable = registry.len(),
        skipped = registry.skipped(),
        "categories imported"
    );
    Ok(())
}

fn list_categories(registry: &CategoryRegistry, kind: Option<Kind>) -> AppResult<()> {
    let kinds = match kind {
        Some(kind) => vec![TransactionKind::from(kind)],
        None => vec![TransactionKind::Income, TransactionKind::Expense],
    };
    for kind in kinds {
        print_json(&registry.list(kind))?;
    }
    if registry.skipped() > 0 {
        tracing::warn!(skipped = registry.skipped(), "some category documents are unreadable");
    }
    Ok(())
}

async fn resync_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn watch(ledger: &Ledger, user: &str, args: WatchArgs) -> AppResult<()> {
    let mut filter = FeedFilter::user(user);
    filter.year = args.year;

    let mut subscription = ledger.subscribe(filter).await?;
    let handle = subscription.handle();
    let mut ticker = args.resync_secs.map(|secs| {
        let period = Duration::from_secs(secs.max(1));
        tokio::time::interval_at(Instant::now() + period, period)
    });

    loop {
        tokio::select! {
            event = subscription.next() => match event {
                Some(event) => print_json(&event)?,
                None => {
                    tracing::warn!("subscription closed");
                    break;
                }
            },
            _ = resync_tick(&mut ticker) => ledger.resync(handle).await?,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    ledger.unsubscribe(handle);
    Ok(())
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse();
    let settings = settings::Settings::new(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "treasure={level},ledger={level},migration={level}",
            level = settings.app.level
        ))
        .with_writer(std::io::stderr)
        .init();

    let db = connect_db(&settings.database).await?;
    let ledger = Ledger::builder()
        .database(db.clone())
        .aggregation_attempts(settings.ledger.max_aggregation_attempts)
        .feed_capacity(settings.ledger.feed_capacity)
        .page_size(settings.ledger.page_size)
        .build()
        .await?;
    let user = cli.user.as_str();

    match cli.command {
        Command::Add(args) => {
            let mut new = NewTransaction::new(
                args.kind.into(),
                args.amount,
                args.category,
                args.date.unwrap_or_else(Utc::now),
            )
            .tags(args.tags);
            new.id = args.id;
            new.remark = args.remark;

            let tx = ledger.append(user, new).await?;
            tracing::info!(transaction = %tx.id, year = tx.year(), "transaction added");
            print_json(&tx)?;
        }
        Command::Delete(args) => {
            let tx = ledger.remove(user, &args.id, args.year).await?;
            tracing::info!(transaction = %tx.id, year = args.year, "transaction deleted");
            print_json(&tx)?;
        }
        Command::Page(args) => {
            let page = ledger
                .page(user, args.year, args.cursor.as_deref(), args.limit)
                .await?;
            print_json(&page)?;
        }
        Command::Balance => print_json(&ledger.balance(user).await?)?,
        Command::Summarize(args) => print_json(&ledger.summarize(user, args.year).await?)?,
        Command::Recompute(args) => {
            let months = ledger.recompute_monthly_aggregates(user, args.year).await?;
            tracing::info!(year = args.year, months = months.len(), "monthly totals rebuilt");
            print_json(&months)?;
        }
        Command::Categories(Categories { command }) => match command {
            CategoriesCommand::List { kind } => {
                let registry = ledger.load_categories().await?;
                list_categories(&registry, kind)?;
            }
            CategoriesCommand::Import { file } => import_categories(&db, &file).await?,
        },
        Command::Watch(args) => watch(&ledger, user, args).await?,
    }

    Ok(())
}
