use chrono::Utc;
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use shift_escrow::application::escrow::EscrowEngine;
use shift_escrow::application::scheduler::ReleaseScheduler;
use shift_escrow::config::{EscrowConfig, ProviderSettings, Settings};
use shift_escrow::domain::ids::UserId;
use shift_escrow::domain::ports::{PaymentMethodStoreBox, PaymentStoreBox};
use shift_escrow::infrastructure::clock::SystemClock;
use shift_escrow::infrastructure::in_memory::{InMemoryPaymentMethodStore, InMemoryPaymentStore};
use shift_escrow::infrastructure::providers::build_providers;
use shift_escrow::interfaces::csv::command_reader::CommandReader;
use shift_escrow::interfaces::csv::payment_writer::PaymentWriter;
use shift_escrow::interfaces::replay::Replayer;
use shift_escrow::interfaces::webhook::{WebhookHandler, WebhookOutcome, WebhookVerifier};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply a CSV batch of escrow commands and print the resulting payments.
    Replay {
        /// Input commands CSV file
        input: PathBuf,

        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// JSON settings file
        #[arg(long)]
        config: Option<PathBuf>,

        /// User ids treated as operators, in addition to the configured ones
        #[arg(long = "admin")]
        admins: Vec<u64>,
    },
    /// Verify and apply one signed provider webhook delivery.
    Webhook {
        /// File holding the raw request body
        body: PathBuf,

        /// Signature header sent with the delivery (`t=<unix>,v1=<hex>`)
        #[arg(long)]
        signature: String,

        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// JSON settings file; must set `webhook_secret`
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run the release scheduler until interrupted.
    Run {
        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// JSON settings file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::from_file(path).into_diagnostic(),
        None => Ok(Settings::default()),
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<(PaymentStoreBox, PaymentMethodStoreBox)> {
    use shift_escrow::infrastructure::rocksdb::RocksDBStore;

    if let Some(db_path) = db_path {
        // Use persistent storage (RocksDB)
        let store = Arc::new(RocksDBStore::open(db_path).into_diagnostic()?);
        let payments: PaymentStoreBox = store.clone();
        let methods: PaymentMethodStoreBox = store;
        return Ok((payments, methods));
    }
    Ok(in_memory_stores())
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<(PaymentStoreBox, PaymentMethodStoreBox)> {
    if db_path.is_some() {
        return Err(miette::miette!(
            "--db-path requires building with the storage-rocksdb feature"
        ));
    }
    Ok(in_memory_stores())
}

fn in_memory_stores() -> (PaymentStoreBox, PaymentMethodStoreBox) {
    let payments: PaymentStoreBox = Arc::new(InMemoryPaymentStore::new());
    let methods: PaymentMethodStoreBox = Arc::new(InMemoryPaymentMethodStore::new());
    (payments, methods)
}

async fn replay(
    input: PathBuf,
    db_path: Option<PathBuf>,
    config: Option<PathBuf>,
    admins: Vec<u64>,
) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    let (payments, methods) = open_stores(db_path)?;

    // Replays never move real money.
    let providers = build_providers(&ProviderSettings {
        paypal: None,
        simulate: true,
    });
    let admins = settings
        .admins
        .iter()
        .copied()
        .chain(admins.into_iter().map(UserId));
    let replayer = Replayer::new(
        payments,
        methods,
        providers,
        EscrowConfig::try_from(&settings.escrow).into_diagnostic()?,
        admins,
        Utc::now(),
    );

    let file = File::open(input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for command in reader.commands() {
        match command {
            Ok(command) => {
                if let Err(e) = replayer.apply(command).await {
                    eprintln!("Error processing command: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {}", e);
            }
        }
    }

    let payments = replayer.payments().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = PaymentWriter::new(stdout.lock());
    writer.write_payments(payments).into_diagnostic()?;

    Ok(())
}

async fn webhook(
    body: PathBuf,
    signature: String,
    db_path: Option<PathBuf>,
    config: Option<PathBuf>,
) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    let Some(secret) = settings.webhook_secret else {
        return Err(miette::miette!(
            "webhook_secret must be configured to accept webhooks"
        ));
    };
    let raw = std::fs::read(body).into_diagnostic()?;
    let (payments, methods) = open_stores(db_path)?;

    let engine = EscrowEngine::new(
        payments,
        methods,
        build_providers(&settings.providers),
        Arc::new(SystemClock),
        EscrowConfig::try_from(&settings.escrow).into_diagnostic()?,
    );
    let handler = WebhookHandler::new(engine, WebhookVerifier::new(secret));

    match handler.handle(&raw, &signature).await.into_diagnostic()? {
        WebhookOutcome::Applied(payment) => println!("applied {} {}", payment.id, payment.state),
        WebhookOutcome::Duplicate => println!("duplicate"),
        WebhookOutcome::Ignored => println!("ignored"),
    }
    Ok(())
}

async fn run(db_path: Option<PathBuf>, config: Option<PathBuf>) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    let (payments, methods) = open_stores(db_path)?;

    let engine = EscrowEngine::new(
        payments,
        methods,
        build_providers(&settings.providers),
        Arc::new(SystemClock),
        EscrowConfig::try_from(&settings.escrow).into_diagnostic()?,
    );
    let scheduler = ReleaseScheduler::new(engine, settings.scheduler.interval());

    scheduler
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            input,
            db_path,
            config,
            admins,
        } => replay(input, db_path, config, admins).await,
        Command::Webhook {
            body,
            signature,
            db_path,
            config,
        } => webhook(body, signature, db_path, config).await,
        Command::Run { db_path, config } => run(db_path, config).await,
    }
}
