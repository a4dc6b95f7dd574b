use billing_engine::application::controller::BillingController;
use billing_engine::application::processing::TransactionProcessor;
use billing_engine::config::{EngineArgs, EngineConfig};
use billing_engine::domain::ports::{BillingStoreRef, CustomerStoreRef, PaymentProcessorRef};
use billing_engine::infrastructure::dummy_processor::DummyProcessor;
use billing_engine::infrastructure::in_memory::{InMemoryBillingStore, InMemoryCustomerStore};
use billing_engine::interfaces::csv::report_writer::ReportWriter;
use billing_engine::interfaces::csv::script_reader::ScriptReader;
use billing_engine::interfaces::script::ScriptRunner;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input script CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Company on whose behalf the script runs
    #[arg(long, default_value = "CP_CLI")]
    company: String,

    #[command(flatten)]
    engine: EngineArgs,
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<(BillingStoreRef, CustomerStoreRef)> {
    use billing_engine::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => {
            let store = RocksDBStore::open(&path).into_diagnostic()?;
            tracing::info!(path = %path.display(), "Using RocksDB storage");
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
        None => Ok(in_memory_stores()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<(BillingStoreRef, CustomerStoreRef)> {
    if db_path.is_some() {
        tracing::warn!(
            "Persistent storage requested via --db-path, but the 'storage-rocksdb' feature is not enabled; falling back to in-memory storage"
        );
    }
    Ok(in_memory_stores())
}

fn in_memory_stores() -> (BillingStoreRef, CustomerStoreRef) {
    (
        Arc::new(InMemoryBillingStore::new()),
        Arc::new(InMemoryCustomerStore::new()),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the report
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from(cli.engine);

    let (store, customers) = open_stores(cli.db_path)?;
    let processor: PaymentProcessorRef = Arc::new(DummyProcessor::new());
    let engine = TransactionProcessor::new(store.clone(), processor.clone(), config);
    let controller = BillingController::new(store.clone(), customers.clone(), processor, engine);
    let mut runner = ScriptRunner::new(controller, store, customers, cli.company);

    let file = File::open(cli.input).into_diagnostic()?;
    for (line, row) in ScriptReader::new(file).rows().enumerate() {
        // header is line 1
        let line = line + 2;
        match row {
            Ok(row) => {
                if let Err(e) = runner.run(row).await {
                    error!(line, error = %e, "Error replaying script row");
                }
            }
            Err(e) => {
                error!(line, error = %e, "Error reading script row");
            }
        }
    }

    let rows = runner.report().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());
    writer.write_rows(rows).into_diagnostic()?;

    Ok(())
}
