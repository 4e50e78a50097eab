use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use booking_cli::app::{
    self, PurchaseOutcome, PurchaseRequest, Session, build_registry, render_catalog,
    render_history, render_quote, render_summary,
};
use booking_cli::config::{AppConfig, SettlementMode};
use booking_cli::logging;
use booking_cli::utils::parse_amount;
use booking_core::calculations::common::format_currency;
use booking_core::flow::{Notice, NoticeLevel};
use booking_core::{BookingDetails, BookingRepository, ItemKind};
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use tracing::{debug, error};

/// Book celebrities and buy event tickets against an account balance.
#[derive(Parser, Debug)]
#[command(name = "booking")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ./booking.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Storage backend: sqlite or memory
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Database path or URL
    #[arg(long, global = true)]
    db: Option<String>,

    /// Account whose balance pays for purchases
    #[arg(long, global = true)]
    account: Option<i64>,

    /// How confirmed purchases are settled
    #[arg(long, global = true, value_enum)]
    settlement: Option<SettlementMode>,

    /// Catalog CSV to import before running the command
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Hide log output on the console
    #[arg(short, long, global = true, default_value_t = false)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List bookable celebrities and events
    Catalog {
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },

    /// Price a selection against the current balance
    Quote {
        item: i64,
        #[arg(long)]
        variant: Option<String>,
        /// Whole number; anything else counts as 1
        #[arg(short = 'n', long)]
        quantity: Option<String>,
    },

    /// Buy a ticket or book a celebrity
    Purchase {
        item: i64,
        #[arg(long)]
        variant: Option<String>,
        #[arg(short = 'n', long)]
        quantity: Option<String>,
        /// Walk through selection, details and payment steps
        #[arg(long, default_value_t = false)]
        wizard: bool,
        /// Preferred date (required with --wizard)
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        time: Option<String>,
        #[arg(long)]
        requests: Option<String>,
        /// Confirm without prompting
        #[arg(short, long, default_value_t = false)]
        yes: bool,
    },

    /// Add funds to the account
    TopUp {
        #[arg(value_parser = parse_amount)]
        amount: Decimal,
    },

    /// Show the balance and past purchases
    History,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Celebrity,
    Event,
}

impl From<KindArg> for ItemKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Celebrity => ItemKind::CelebrityBooking,
            KindArg::Event => ItemKind::Event,
        }
    }
}

fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = AppConfig::discover(cli.config.as_deref())?;
    if let Some(backend) = &cli.backend {
        config.database.backend = backend.clone();
    }
    if let Some(db) = &cli.db {
        config.database.connection_string = db.clone();
    }
    if let Some(account) = cli.account {
        config.session.account_id = account;
    }
    if let Some(mode) = cli.settlement {
        config.settlement.mode = mode;
    }
    if let Some(catalog) = &cli.catalog {
        config.catalog.file = Some(catalog.clone());
    }
    Ok(config)
}

fn print_notices(notices: &[Notice]) {
    for notice in notices {
        let tag = match notice.level {
            NoticeLevel::Success => "ok",
            NoticeLevel::Info => "note",
            NoticeLevel::Error => "error",
        };
        eprintln!("[{}] {}", tag, notice.message);
    }
}

/// Asks on the terminal. Without a terminal nothing is confirmed.
fn prompt_confirm() -> bool {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        println!("Not confirmed. Re-run with --yes to confirm without a prompt.");
        return false;
    }
    print!("Confirm purchase? [y/N] ");
    let _ = io::stdout().flush();
    let mut answer = String::new();
    if stdin.lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

async fn run(
    cli: Cli,
    config: AppConfig,
) -> Result<()> {
    let repo: Arc<dyn BookingRepository> = Arc::from(
        build_registry()
            .open(&config.database)
            .await
            .with_context(|| format!("Failed to open '{}' backend", config.database.backend))?,
    );

    if let Some(path) = &config.catalog.file {
        app::import_catalog(repo.as_ref(), path).await?;
    }

    let mut session = Session::open(repo, &config.session, &config.settlement).await?;

    match cli.command {
        Command::Catalog { kind } => {
            let items = session
                .repo()
                .list_items(kind.map(ItemKind::from))
                .await
                .context("Failed to list catalog")?;
            print!("{}", render_catalog(&items));
        }
        Command::Quote {
            item,
            variant,
            quantity,
        } => {
            let view = app::quote(&session, item, variant.as_deref(), quantity.as_deref()).await?;
            print!("{}", render_quote(&view));
        }
        Command::Purchase {
            item,
            variant,
            quantity,
            wizard,
            date,
            time,
            requests,
            yes,
        } => {
            let request = PurchaseRequest {
                item_id: item,
                wizard,
                variant,
                quantity,
                details: BookingDetails {
                    date,
                    time,
                    special_requests: requests,
                },
            };
            let report = app::run_purchase(&session, &request, |summary| {
                print!("{}", render_summary(summary));
                yes || prompt_confirm()
            })
            .await?;

            print_notices(&report.notices);
            match report.outcome {
                PurchaseOutcome::Settled { receipt, remaining } => {
                    println!(
                        "Paid {} (ref {}). Remaining balance: {}",
                        format_currency(receipt.amount_paid),
                        receipt.reference,
                        format_currency(remaining)
                    );
                }
                PurchaseOutcome::Blocked(top_up) => {
                    println!(
                        "Run `booking top-up {}` to afford this purchase.",
                        top_up.shortfall
                    );
                }
                PurchaseOutcome::NotConfirmed(_) => {
                    println!("Purchase cancelled. Nothing was charged.");
                }
                PurchaseOutcome::Failed(e) => {
                    debug!(error = %e, "purchase did not settle");
                    println!("Purchase failed. Nothing was charged.");
                }
            }
        }
        Command::TopUp { amount } => {
            let balance = session.top_up(amount).await?;
            println!(
                "Added {}. New balance: {}",
                format_currency(amount),
                format_currency(balance)
            );
        }
        Command::History => {
            let purchases = session.history().await?;
            print!(
                "{}",
                render_history(session.account(), session.balance().balance(), &purchases)
            );
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    logging::apply(&config.logging, !cli.quiet)?;

    debug!(?config, "configuration resolved");

    if let Err(e) = run(cli, config).await {
        error!(error = %format!("{e:#}"), "command failed");
        return Err(e);
    }
    Ok(())
}
