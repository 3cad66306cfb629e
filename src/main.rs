// Recon Engine - CLI
// Reconcile CSV exports against the persisted review state, then inspect
// and settle what the run produced.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use recon_engine::import::{load_app_csv, load_bank_csv};
use recon_engine::{
    logging, CategoryClassifier, ConflictResolution, DuplicateAction, MatchStatus,
    NoopClassifier, ReconciliationConfig, ReconciliationEngine, RuleClassifier, SqliteStore,
};

#[derive(Parser)]
#[command(name = "recon", version, about = "Reconcile bank transactions against your own records")]
struct Cli {
    /// JSON config file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite file holding matches, conflicts and duplicate groups
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a reconciliation over two CSV files
    Reconcile {
        #[arg(long)]
        bank: PathBuf,
        #[arg(long)]
        app: PathBuf,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// List match records
    Matches {
        /// Only records with this status (matched, unmatched, conflict, duplicate)
        #[arg(long)]
        status: Option<String>,
    },
    /// List conflicts (unresolved only unless --all)
    Conflicts {
        #[arg(long)]
        all: bool,
    },
    /// List duplicate groups (unresolved only unless --all)
    Duplicates {
        #[arg(long)]
        all: bool,
    },
    /// Settle a conflict: use_bank, use_app, merge or ignore
    ResolveConflict { id: String, resolution: String },
    /// Settle a duplicate group: keep_bank, keep_app, merge or keep_all
    ResolveDuplicate { id: String, action: String },
    /// Confirm (default) or reject a match
    Review {
        id: String,
        #[arg(long)]
        reviewer: String,
        #[arg(long)]
        reject: bool,
    },
    /// Pair a bank transaction with an app transaction by hand
    ManualMatch {
        #[arg(long)]
        bank: PathBuf,
        #[arg(long)]
        app: PathBuf,
        #[arg(long)]
        bank_id: String,
        #[arg(long)]
        app_id: String,
        #[arg(long)]
        reviewer: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref(), cli.db)?;
    logging::init(&config.log_level);

    let engine = open_engine(config)?;

    match cli.command {
        Command::Reconcile { bank, app, json } => run_reconcile(&engine, &bank, &app, json).await,
        Command::Matches { status } => list_matches(&engine, status.as_deref()).await,
        Command::Conflicts { all } => {
            let conflicts: Vec<_> = engine
                .conflicts()
                .await
                .into_iter()
                .filter(|c| all || !c.is_resolved())
                .collect();
            print_json(&conflicts)
        }
        Command::Duplicates { all } => {
            let groups: Vec<_> = engine
                .duplicate_groups()
                .await
                .into_iter()
                .filter(|g| all || !g.is_resolved())
                .collect();
            print_json(&groups)
        }
        Command::ResolveConflict { id, resolution } => {
            let resolution: ConflictResolution = resolution.parse()?;
            let conflict = engine.resolve_conflict(&id, resolution).await?;
            println!("✓ Conflict {} resolved ({:?})", conflict.id, resolution);
            Ok(())
        }
        Command::ResolveDuplicate { id, action } => {
            let action: DuplicateAction = action.parse()?;
            let group = engine.resolve_duplicate(&id, action).await?;
            println!("✓ Duplicate group {} resolved ({:?})", group.id, action);
            Ok(())
        }
        Command::Review { id, reviewer, reject } => {
            let record = engine.review_match(&id, &reviewer, !reject).await?;
            println!(
                "✓ Match {} reviewed by {}: {}",
                record.id,
                reviewer,
                record.status.as_str()
            );
            Ok(())
        }
        Command::ManualMatch {
            bank,
            app,
            bank_id,
            app_id,
            reviewer,
        } => {
            let bank_transactions = load_bank_csv(&bank)?;
            let app_transactions = load_app_csv(&app)?;

            let bank_tx = bank_transactions
                .iter()
                .find(|tx| tx.id == bank_id)
                .ok_or_else(|| anyhow!("bank transaction {} not in {:?}", bank_id, bank))?;
            let app_tx = app_transactions
                .iter()
                .find(|tx| tx.id == app_id)
                .ok_or_else(|| anyhow!("app transaction {} not in {:?}", app_id, app))?;

            let record = engine.create_manual_match(bank_tx, app_tx, &reviewer).await?;
            println!("✓ Manual match {} created", record.id);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>, db: Option<PathBuf>) -> Result<ReconciliationConfig> {
    let config = match path {
        Some(path) => ReconciliationConfig::from_file(path)?,
        None => ReconciliationConfig::default(),
    };

    let mut config = config.with_env_overrides()?;
    if let Some(db) = db {
        config.storage.db_path = db;
    }

    Ok(config)
}

fn open_engine(config: ReconciliationConfig) -> Result<ReconciliationEngine> {
    let store = SqliteStore::open(&config.storage.db_path)?;

    let classifier: Arc<dyn CategoryClassifier> = match &config.classifier.rules_path {
        Some(path) => Arc::new(RuleClassifier::from_file(path)?),
        None => Arc::new(NoopClassifier),
    };

    ReconciliationEngine::open(config, Arc::new(store), classifier)
        .context("Failed to load reconciliation state")
}

async fn run_reconcile(
    engine: &ReconciliationEngine,
    bank: &Path,
    app: &Path,
    json: bool,
) -> Result<()> {
    let mut bank_transactions = load_bank_csv(bank)
        .with_context(|| format!("Failed to import bank transactions from {:?}", bank))?;
    let app_transactions = load_app_csv(app)
        .with_context(|| format!("Failed to import app transactions from {:?}", app))?;

    let uncategorized = bank_transactions.iter().filter(|tx| tx.category.is_none()).count();

    let summary = engine
        .reconcile(&mut bank_transactions, &app_transactions)
        .await;

    if json {
        return print_json(&summary);
    }

    let categorized =
        uncategorized - bank_transactions.iter().filter(|tx| tx.category.is_none()).count();

    println!("⚖️  Reconciliation");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Bank transactions:  {}", summary.total_bank_transactions);
    println!("App transactions:   {}", summary.total_app_transactions);
    println!("Matched:            {}", summary.matched);
    println!("Unmatched:          {}", summary.unmatched);
    println!("Open conflicts:     {}", summary.conflicts);
    println!("Open duplicates:    {}", summary.duplicates);
    println!("Auto-categorized:   {}", categorized);
    println!("Accuracy:           {:.1}%", summary.accuracy * 100.0);

    Ok(())
}

async fn list_matches(engine: &ReconciliationEngine, status: Option<&str>) -> Result<()> {
    let wanted = match status {
        Some(raw) => Some(parse_status(raw)?),
        None => None,
    };

    let matches: Vec<_> = engine
        .matches()
        .await
        .into_iter()
        .filter(|m| wanted.map_or(true, |s| m.status == s))
        .collect();

    print_json(&matches)
}

fn parse_status(raw: &str) -> Result<MatchStatus> {
    [
        MatchStatus::Matched,
        MatchStatus::Unmatched,
        MatchStatus::Conflict,
        MatchStatus::Duplicate,
    ]
    .into_iter()
    .find(|s| s.as_str() == raw.trim().to_lowercase())
    .ok_or_else(|| anyhow!("unknown match status: {}", raw))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
