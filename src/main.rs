use std::path::{Path, PathBuf};
use std::process;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;

use claims_desk::claims::{self, ClaimQuery, ClaimView};
use claims_desk::config;
use claims_desk::db;
use claims_desk::ingest::{self, ClaimDataIngestor, IngestError, IngestOptions, LoadMode};
use claims_desk::migrate;
use claims_desk::model::{format_amount, Claim};
use claims_desk::time::to_date;
use claims_desk::users;

#[derive(Debug, Parser)]
#[command(
    name = "claims",
    about = "Insurance claims review desk",
    version,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CLAIMS_GIT_HASH"), ")")
)]
struct Cli {
    /// Database file. Falls back to CLAIMS_DB, then the user data directory.
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load claims and claim details from two CSV files.
    Load {
        claims_csv: PathBuf,
        details_csv: PathBuf,
        /// Field separator, a single character. `\t` selects tab.
        #[arg(long, default_value = ",", value_parser = parse_delimiter)]
        delimiter: u8,
        /// `append` keeps existing claims, `overwrite` replaces all of them.
        #[arg(long, default_value = "append")]
        mode: LoadMode,
        /// Also write a JSON report of the run into this directory.
        #[arg(long, value_name = "DIR")]
        report_dir: Option<PathBuf>,
    },
    /// List claims with optional filters.
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        status: Option<String>,
        /// Only flagged claims.
        #[arg(long, conflicts_with = "unflagged")]
        flagged: bool,
        /// Only claims that are not flagged.
        #[arg(long)]
        unflagged: bool,
        /// Sort field, prefix with `-` for descending.
        #[arg(long, allow_hyphen_values = true)]
        sort: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show one claim with its details and notes.
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Flag a claim for review, or clear an existing flag.
    Flag {
        id: i64,
        #[arg(long)]
        user: Option<String>,
    },
    /// Attach a note to a claim.
    Note {
        id: i64,
        text: String,
        #[arg(long)]
        user: Option<String>,
    },
    #[command(subcommand)]
    User(UserCommand),
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    /// Register a reviewer.
    Add { username: String },
    /// Remove a reviewer. Their flags and notes stay, unattributed.
    Delete { username: String },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply pending schema migrations.
    Migrate,
}

fn main() {
    let guard = claims_desk::init_logging();
    let cli = Cli::parse();

    let code = match handle_cli(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            1
        }
    };

    drop(guard);
    process::exit(code);
}

fn handle_cli(cli: Cli) -> Result<i32> {
    let db_path = config::resolve_db_path(cli.db).context("determine database path")?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;

    runtime.block_on(async move {
        let pool = db::init_db(&db_path).await?;
        let code = run_command(&pool, cli.command).await;
        pool.close().await;
        code
    })
}

async fn run_command(pool: &SqlitePool, command: Commands) -> Result<i32> {
    match command {
        Commands::Load {
            claims_csv,
            details_csv,
            delimiter,
            mode,
            report_dir,
        } => {
            let options = IngestOptions::new(claims_csv, details_csv)
                .with_delimiter(delimiter)
                .with_mode(mode);
            handle_load(pool, options, report_dir.as_deref()).await
        }
        Commands::List {
            search,
            status,
            flagged,
            unflagged,
            sort,
            json,
        } => {
            let flagged = match (flagged, unflagged) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let query = ClaimQuery {
                search,
                status,
                flagged,
                sort,
            };
            let rows = claims::list_claims(pool, &query)
                .await
                .context("list claims")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print_claim_table(&rows);
            }
            Ok(0)
        }
        Commands::Show { id, json } => {
            let Some(view) = claims::get_claim(pool, id).await.context("load claim")? else {
                eprintln!("Claim with id={id} not found.");
                return Ok(1);
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print_claim_view(&view);
            }
            Ok(0)
        }
        Commands::Flag { id, user } => {
            let user_id = resolve_user(pool, user.as_deref()).await?;
            let claim = claims::toggle_flag(pool, id, user_id)
                .await
                .context("toggle flag")?;
            let state = if claim.is_flagged { "flagged" } else { "unflagged" };
            println!("{claim} {state}");
            Ok(0)
        }
        Commands::Note { id, text, user } => {
            let user_id = resolve_user(pool, user.as_deref()).await?;
            let note = claims::add_note(pool, id, user_id, &text)
                .await
                .context("add note")?;
            println!("{note}");
            Ok(0)
        }
        Commands::User(UserCommand::Add { username }) => {
            let user = users::create_user(pool, &username)
                .await
                .context("create user")?;
            println!("Created user {} (id {})", user.username, user.id);
            Ok(0)
        }
        Commands::User(UserCommand::Delete { username }) => {
            let user = users::find_by_username(pool, &username)
                .await?
                .ok_or_else(|| anyhow!("unknown user: {username}"))?;
            users::delete_user(pool, user.id)
                .await
                .context("delete user")?;
            println!("Deleted user {}", user.username);
            Ok(0)
        }
        Commands::Db(DbCommand::Migrate) => {
            // init_db already applied everything; report what is known.
            for name in migrate::migration_names() {
                println!("{name}");
            }
            Ok(0)
        }
    }
}

async fn handle_load(
    pool: &SqlitePool,
    options: IngestOptions,
    report_dir: Option<&Path>,
) -> Result<i32> {
    println!(
        "Starting data ingestion with '{}' as the delimiter...",
        char::from(options.delimiter)
    );

    let ingestor = ClaimDataIngestor::new(options);
    let outcome = match ingestor.run(pool).await {
        Ok(outcome) => outcome,
        Err(err @ IngestError::FileNotFound { .. }) => return Err(err.into()),
        Err(err) => {
            return Err(anyhow!(err).context("A critical error occurred during ingestion"))
        }
    };

    for (key, value) in outcome.summary.entries() {
        println!("{}: {value}", title_case(key));
    }

    if outcome.has_errors() {
        println!("\nCompleted with some errors:");
        for message in outcome.error_messages() {
            println!(" - {message}");
        }
    } else {
        println!("\nData ingestion completed successfully with no errors.");
    }

    if let Some(dir) = report_dir {
        let path = ingest::write_ingest_report(dir, ingestor.options(), &outcome)?;
        println!("Report written to {}", path.display());
    }
    Ok(0)
}

async fn resolve_user(pool: &SqlitePool, username: Option<&str>) -> Result<Option<i64>> {
    let Some(username) = username else {
        return Ok(None);
    };
    let user = users::find_by_username(pool, username)
        .await?
        .ok_or_else(|| anyhow!("unknown user: {username}"))?;
    Ok(Some(user.id))
}

fn parse_delimiter(raw: &str) -> Result<u8> {
    let value = match raw {
        "\\t" | "tab" => "\t",
        other => other,
    };
    match value.as_bytes() {
        [byte] if byte.is_ascii() => Ok(*byte),
        _ => bail!("delimiter must be a single ASCII character, got {raw:?}"),
    }
}

fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_claim_table(rows: &[Claim]) {
    println!(
        "{:>6}  {:<24} {:<24} {:<13} {:>12} {:>12} {:>12}  {:<10} {}",
        "ID", "PATIENT", "INSURER", "STATUS", "BILLED", "PAID", "UNDERPAID", "DISCHARGE", "FLAG"
    );
    for claim in rows {
        println!(
            "{:>6}  {:<24} {:<24} {:<13} {:>12} {:>12} {:>12}  {:<10} {}",
            claim.id,
            claim.patient_name,
            claim.insurer_name,
            claim.status,
            format_amount(claim.billed_amount),
            format_amount(claim.paid_amount),
            format_amount(claim.underpayment()),
            claim.discharge_date,
            if claim.is_flagged { "*" } else { "" }
        );
    }
}

fn print_claim_view(view: &ClaimView) {
    let claim = &view.claim;
    println!("{claim}");
    println!("  Insurer:      {}", claim.insurer_name);
    println!("  Status:       {}", claim.status);
    println!("  Billed:       {}", format_amount(claim.billed_amount));
    println!("  Paid:         {}", format_amount(claim.paid_amount));
    println!("  Underpayment: {}", format_amount(claim.underpayment()));
    println!("  Discharged:   {}", claim.discharge_date);
    if claim.is_flagged {
        let at = claim
            .flagged_at
            .map(|ms| to_date(ms).to_rfc3339())
            .unwrap_or_default();
        println!("  Flagged:      yes {at}");
    }
    match &view.detail {
        Some(detail) => {
            println!("  CPT codes:    {}", detail.cpt_code_list().join(", "));
            if let Some(reason) = detail.denial_reason.as_deref().filter(|r| !r.is_empty()) {
                println!("  Denial:       {reason}");
            }
        }
        None => println!("  No claim details on file."),
    }
    if !view.notes.is_empty() {
        println!("  Notes:");
        for note in &view.notes {
            println!("    - {note}");
        }
    }
}
