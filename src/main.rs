use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use tracing::info;
use xswap::config::EngineConfig;
use xswap::domain::amounts::calculate_maker_taker_amounts;
use xswap::domain::lock::calculate_lock_buffer;
use xswap::domain::ports::{DealStore, DealStoreRef};
use xswap::infrastructure::in_memory::InMemoryDealStore;
use xswap::interfaces::csv::currency_writer::CurrencyWriter;
use xswap::interfaces::csv::deal_writer::DealWriter;
use xswap::logging::init_logging;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON engine configuration file. Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compute the maker and taker amounts of a trade.
    Amounts {
        /// Trading pair, e.g. LTC/BTC.
        pair_id: String,
        /// Quantity of the base currency.
        quantity: u64,
        /// Price in quote currency per base unit. Zero means market price.
        price: Decimal,
        /// The maker's order is a buy order.
        #[arg(long)]
        is_buy: bool,
    },
    /// Compute the lock buffer and the maker's cltv delta for a swap route.
    LockBuffer {
        /// Lock duration in blocks of the taker's leg.
        taker_lock: u64,
        /// Average minutes per block of the taker's currency.
        taker_minutes_per_block: f64,
        /// Average minutes per block of the maker's currency.
        maker_minutes_per_block: f64,
        /// Final hop lock of the maker's client, in blocks.
        #[arg(long, default_value_t = 0)]
        maker_final_lock: u64,
    },
    /// List the configured currencies.
    Currencies,
    /// Dump stored swap deals.
    Deals {
        /// Path to persistent database. If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct LockBufferRecord {
    lock_buffer: u64,
    maker_cltv_delta: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path).into_diagnostic()?,
        None => EngineConfig::default(),
    };

    let stdout = io::stdout();
    match cli.command {
        Command::Amounts {
            pair_id,
            quantity,
            price,
            is_buy,
        } => {
            let amounts =
                calculate_maker_taker_amounts(&config, quantity, price, is_buy, &pair_id)
                    .into_diagnostic()?;
            let mut writer = csv::Writer::from_writer(stdout.lock());
            writer.serialize(&amounts).into_diagnostic()?;
            writer.flush().into_diagnostic()?;
        }
        Command::LockBuffer {
            taker_lock,
            taker_minutes_per_block,
            maker_minutes_per_block,
            maker_final_lock,
        } => {
            let lock_buffer = calculate_lock_buffer(
                taker_lock,
                taker_minutes_per_block,
                maker_minutes_per_block,
                config.lock_buffer_quantile,
            );
            let mut writer = csv::Writer::from_writer(stdout.lock());
            writer
                .serialize(LockBufferRecord {
                    lock_buffer,
                    maker_cltv_delta: lock_buffer + maker_final_lock,
                })
                .into_diagnostic()?;
            writer.flush().into_diagnostic()?;
        }
        Command::Currencies => {
            CurrencyWriter::new(stdout.lock())
                .write_currencies(&config.currencies)
                .into_diagnostic()?;
        }
        Command::Deals { db_path } => {
            let store = open_store(db_path)?;
            let deals = store.all_deals().await.into_diagnostic()?;
            info!(count = deals.len(), "loaded deals");
            DealWriter::new(stdout.lock())
                .write_deals(&deals)
                .into_diagnostic()?;
        }
    }

    Ok(())
}

fn open_store(db_path: Option<PathBuf>) -> Result<DealStoreRef> {
    let Some(db_path) = db_path else {
        return Ok(std::sync::Arc::new(InMemoryDealStore::new()));
    };

    #[cfg(feature = "storage-rocksdb")]
    {
        use xswap::infrastructure::rocksdb::RocksDBStore;
        let store = RocksDBStore::open(db_path).into_diagnostic()?;
        Ok(std::sync::Arc::new(store))
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    {
        let _ = db_path;
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
        Ok(std::sync::Arc::new(InMemoryDealStore::new()))
    }
}
