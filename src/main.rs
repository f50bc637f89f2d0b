use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use fvg_engine::engine::{
    BacktestReport, Candle, CandleSeries, Engine, EngineConfig, Summary, Timeframe,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "fvg-backtest")]
#[command(about = "Multi-timeframe imbalance zone backtester")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Print verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a backtest over two candle CSV files
    Backtest {
        /// Higher-timeframe candle CSV (open_time,open,high,low,close,volume)
        #[arg(long)]
        htf: PathBuf,

        /// Lower-timeframe candle CSV (same columns)
        #[arg(long)]
        ltf: PathBuf,

        /// Higher-timeframe bar length in minutes
        #[arg(long, default_value = "240")]
        htf_minutes: u32,

        /// Lower-timeframe bar length in minutes
        #[arg(long, default_value = "15")]
        ltf_minutes: u32,

        /// Write full results (summary, trades, equity curve) as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Minimum reward:risk for a setup
        #[arg(long, default_value = "2.0")]
        min_rr: f64,

        /// Take-profit distance as a multiple of risk
        #[arg(long, default_value = "2.0")]
        target_rr: f64,

        /// Minimum stop distance as % of entry
        #[arg(long, default_value = "0.3")]
        min_sl_pct: f64,

        /// Maximum stop distance as % of entry
        #[arg(long, default_value = "5.0")]
        max_sl_pct: f64,

        /// Stop buffer beyond the adverse excursion (fraction)
        #[arg(long, default_value = "0.002")]
        sl_buffer: f64,

        /// Fraction of balance risked per trade
        #[arg(long, default_value = "0.02")]
        risk_per_trade: f64,

        /// Maker fee rate (limit entries and TP exits)
        #[arg(long, default_value = "0.0018")]
        maker_fee: f64,

        /// Taker fee rate (SL exits)
        #[arg(long, default_value = "0.0045")]
        taker_fee: f64,

        /// Lower-timeframe bars a pending limit order waits before expiring
        #[arg(long, default_value = "16")]
        limit_expiry_bars: usize,

        /// Starting account balance
        #[arg(long, default_value = "10000.0")]
        initial_balance: f64,
    },

    /// Cross-check batch replay against bar-by-bar feeding on the same data
    Verify {
        /// Higher-timeframe candle CSV
        #[arg(long)]
        htf: PathBuf,

        /// Lower-timeframe candle CSV
        #[arg(long)]
        ltf: PathBuf,

        /// Higher-timeframe bar length in minutes
        #[arg(long, default_value = "240")]
        htf_minutes: u32,

        /// Lower-timeframe bar length in minutes
        #[arg(long, default_value = "15")]
        ltf_minutes: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Commands::Backtest {
            htf, ltf, htf_minutes, ltf_minutes, output,
            min_rr, target_rr, min_sl_pct, max_sl_pct, sl_buffer,
            risk_per_trade, maker_fee, taker_fee,
            limit_expiry_bars, initial_balance,
        } => {
            let config = EngineConfig {
                min_rr,
                target_rr,
                min_sl_pct,
                max_sl_pct,
                sl_buffer_pct: sl_buffer,
                risk_per_trade,
                maker_fee,
                taker_fee,
                limit_expiry_bars,
                initial_balance,
            };
            run_backtest(htf, ltf, htf_minutes, ltf_minutes, config, output)?;
        }
        Commands::Verify { htf, ltf, htf_minutes, ltf_minutes } => {
            run_verify(htf, ltf, htf_minutes, ltf_minutes)?;
        }
    }

    Ok(())
}

fn run_backtest(
    htf_path: PathBuf,
    ltf_path: PathBuf,
    htf_minutes: u32,
    ltf_minutes: u32,
    config: EngineConfig,
    output: Option<PathBuf>,
) -> Result<()> {
    info!("=== BACKTEST MODE ===");
    let higher_tf = Timeframe::minutes(htf_minutes);
    let lower_tf = Timeframe::minutes(ltf_minutes);

    let higher = load_candles(&htf_path, higher_tf)?;
    let lower = load_candles(&ltf_path, lower_tf)?;
    info!("Loaded {} {} bars, {} {} bars", higher.len(), higher_tf, lower.len(), lower_tf);

    let mut engine = Engine::new(config, higher_tf, lower_tf)?;
    engine.run(&higher, &lower)?;

    let report = engine.report();
    print_summary(&report.summary);

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write results to {:?}", path))?;
        info!("Wrote results to {:?}", path);
    }

    Ok(())
}

fn run_verify(
    htf_path: PathBuf,
    ltf_path: PathBuf,
    htf_minutes: u32,
    ltf_minutes: u32,
) -> Result<()> {
    info!("=== VERIFY MODE ===");
    info!("Comparing batch replay against incremental feeding");

    let higher_tf = Timeframe::minutes(htf_minutes);
    let lower_tf = Timeframe::minutes(ltf_minutes);
    let higher = load_candles(&htf_path, higher_tf)?;
    let lower = load_candles(&ltf_path, lower_tf)?;

    let mut batch = Engine::new(EngineConfig::default(), higher_tf, lower_tf)?;
    batch.run(&higher, &lower)?;
    let batch_report = batch.report();

    let mut incremental = Engine::new(EngineConfig::default(), higher_tf, lower_tf)?;
    for candle in higher.iter() {
        incremental.on_higher_bar(candle)?;
    }
    for candle in lower.iter() {
        incremental.on_lower_bar(candle)?;
    }
    let incremental_report = incremental.report();

    compare_reports(&batch_report, &incremental_report)?;

    println!(
        "OK: {} trades, final balance {:.2} in both modes",
        batch_report.summary.total_trades, batch_report.summary.final_balance
    );
    Ok(())
}

fn compare_reports(batch: &BacktestReport, incremental: &BacktestReport) -> Result<()> {
    if batch.trades.len() != incremental.trades.len() {
        anyhow::bail!(
            "trade count mismatch: batch={} incremental={}",
            batch.trades.len(),
            incremental.trades.len()
        );
    }
    for (a, b) in batch.trades.iter().zip(&incremental.trades) {
        if a.id != b.id || a.pnl != b.pnl || a.entry_time != b.entry_time || a.exit_time != b.exit_time {
            anyhow::bail!("trade mismatch: batch={:?} incremental={:?}", a, b);
        }
    }
    if batch.summary.final_balance != incremental.summary.final_balance {
        anyhow::bail!(
            "balance mismatch: batch={} incremental={}",
            batch.summary.final_balance,
            incremental.summary.final_balance
        );
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct CsvCandle {
    open_time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

fn load_candles(path: &Path, timeframe: Timeframe) -> Result<CandleSeries> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open candle CSV: {:?}", path))?;

    let mut candles = Vec::new();
    for result in reader.deserialize() {
        let row: CsvCandle = result.with_context(|| "Failed to parse CSV row")?;
        candles.push(Candle {
            open_time: parse_open_time(&row.open_time)?,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        });
    }

    CandleSeries::new(timeframe, candles)
        .with_context(|| format!("Invalid candle series in {:?}", path))
}

/// Accepts RFC 3339 timestamps, epoch milliseconds or epoch seconds.
fn parse_open_time(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let numeric: i64 = raw
        .parse()
        .with_context(|| format!("Unrecognized timestamp format: {}", raw))?;
    let parsed = if numeric > 10_000_000_000 {
        Utc.timestamp_millis_opt(numeric)
    } else {
        Utc.timestamp_opt(numeric, 0)
    };
    parsed
        .single()
        .with_context(|| format!("Timestamp out of range: {}", raw))
}

fn print_summary(summary: &Summary) {
    println!();
    println!("═══════════════════════════════════════════════════════════");
    println!("                    BACKTEST RESULTS                       ");
    println!("═══════════════════════════════════════════════════════════");
    println!();
    println!("Overall Performance:");
    println!("  Total Trades:    {}", summary.total_trades);
    println!("  Wins / Losses:   {} / {}", summary.wins, summary.losses);
    println!("  Win Rate:        {:.1}%", summary.win_rate);
    println!("  Profit Factor:   {:.2}", summary.profit_factor);
    println!("  Expectancy:      {:.2}", summary.expectancy);
    println!("  Avg Win:         {:.2}", summary.avg_win);
    println!("  Avg Loss:        {:.2}", summary.avg_loss);
    println!("  Avg R:R:         {:.2}", summary.avg_rr);
    println!("  Max Drawdown:    {:.2}%", summary.max_drawdown * 100.0);
    println!();
    println!("Account:");
    println!("  Starting:        {:.2}", summary.initial_balance);
    println!("  Final:           {:.2}", summary.final_balance);
    println!("  Total P&L:       {:.2} ({:+.2}%)", summary.total_pnl, summary.total_pnl_pct);
    println!("═══════════════════════════════════════════════════════════");
}
