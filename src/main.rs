//! # Replay a volatility carry run over daily CSV data
//! optreplay run --options data/spx_options.csv --ohlc data/spx_ohlc.csv \
//!     --start 2013-01-02 --end 2013-12-31

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

use optreplay::backtest::{ReplayConfig, ReplayEngine};
use optreplay::data::{BulkCsvSource, ChunkedCsvSource, DailySource};
use optreplay::strategy::{VolatilityCarry, VolatilityCarryConfig};

#[derive(Parser)]
#[command(name = "optreplay")]
#[command(about = "Daily-granularity options replay engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay the volatility carry strategy over CSV data
    Run {
        /// Path to the daily options chain CSV
        #[arg(long)]
        options: String,

        /// Path to the underlying OHLC CSV
        #[arg(long)]
        ohlc: String,

        /// First date to replay (inclusive), e.g. 2013-01-02
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last date to replay (inclusive)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Records per physical read of the options file
        #[arg(long, default_value_t = 100_000)]
        chunk_size: usize,

        /// Starting cash
        #[arg(long, default_value = "1000000")]
        initial_value: Decimal,

        /// Realized volatility lookback in trading days
        #[arg(long, default_value_t = 30)]
        rv_window: usize,

        /// Maximum concurrent short positions
        #[arg(long, default_value_t = 16)]
        max_positions: usize,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("optreplay=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            options,
            ohlc,
            start,
            end,
            chunk_size,
            initial_value,
            rv_window,
            max_positions,
        } => {
            let config = ReplayConfig {
                start_date: start,
                end_date: end,
                chunk_size,
                initial_market_value: initial_value,
            };
            let window = config.window();

            let options_source = ChunkedCsvSource::open(&options, chunk_size, window)
                .with_context(|| format!("failed to open options data at {}", options))?;
            let ohlc_source = BulkCsvSource::open(&ohlc, window)
                .with_context(|| format!("failed to open OHLC data at {}", ohlc))?;

            let strategy_config = VolatilityCarryConfig {
                rv_window,
                max_positions,
                ..VolatilityCarryConfig::default()
            };
            let strategy = VolatilityCarry::new(strategy_config);

            let sources: Vec<(String, Box<dyn DailySource>)> = vec![
                ("ohlc".to_string(), Box::new(ohlc_source)),
                ("options".to_string(), Box::new(options_source)),
            ];

            let mut engine = ReplayEngine::new(config, sources, strategy);
            let result = engine.run().context("replay failed")?;

            println!("{}", result.summary());
        }
    }

    Ok(())
}
