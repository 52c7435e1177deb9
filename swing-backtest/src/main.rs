//! Swing analysis and position-averaging backtest CLI.
//!
//! # Usage
//!
//! ```bash
//! # Detect swing points on the last 30 days of data
//! swing-backtest swings --data data/btc_1h.csv --last-days 30
//!
//! # Backtest long and short side by side
//! swing-backtest backtest --data data/btc_1h.csv --direction both
//!
//! # Grid-search the averaging and exit thresholds
//! swing-backtest optimize --data data/btc_1h.csv --config config/default.toml --output best.toml
//!
//! # Check the data before analysis
//! swing-backtest validate --data data/btc_1h.csv
//! ```

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tracing::{info, warn};

use swing_backtest::data::parse_timestamp;
use swing_backtest::swing::{ranked, SegmentStats};
use swing_backtest::{
    run, run_both, AnalysisConfig, BacktestResult, BarIntegrityValidator, BarLoader, BarSeries,
    MetricsCalculator, ParameterOptimizer, SegmentDirection, SwingDetector, TimeWindow,
    TradeDirection,
};

const SEPARATOR: &str = "============================================================";

#[derive(Parser)]
#[command(name = "swing-backtest")]
#[command(about = "ZigZag swing detection and position-averaging backtests")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Input selection shared by every subcommand.
#[derive(Args)]
struct InputArgs {
    /// Path to OHLC CSV file
    #[arg(short, long)]
    data: PathBuf,

    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only use the trailing N days of data
    #[arg(long, conflicts_with_all = ["start", "end"])]
    last_days: Option<i64>,

    /// Window start (inclusive)
    #[arg(long)]
    start: Option<String>,

    /// Window end (inclusive)
    #[arg(long)]
    end: Option<String>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Long,
    Short,
    Both,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect swing points and leg statistics
    Swings {
        #[command(flatten)]
        input: InputArgs,

        /// Minimum move between swing points (percent)
        #[arg(long)]
        deviation: Option<f64>,

        /// Pivot window half-width in bars
        #[arg(long)]
        depth: Option<usize>,

        /// Number of ranked legs to list per direction
        #[arg(long, default_value_t = 5)]
        top: usize,
    },

    /// Run the position-averaging backtest
    Backtest {
        #[command(flatten)]
        input: InputArgs,

        /// Direction to trade (defaults to the configured direction)
        #[arg(long, value_enum)]
        direction: Option<DirectionArg>,
    },

    /// Grid-search add, take-profit and stop-loss thresholds
    Optimize {
        #[command(flatten)]
        input: InputArgs,

        /// Direction to trade (defaults to the configured direction)
        #[arg(long, value_enum)]
        direction: Option<DirectionArg>,

        /// Write the winning parameters as a TOML config
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of leaderboard entries to print
        #[arg(long, default_value_t = 10)]
        top: usize,
    },

    /// Check bar data integrity
    Validate {
        #[command(flatten)]
        input: InputArgs,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("swing_backtest=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Swings {
            input,
            deviation,
            depth,
            top,
        } => cmd_swings(&input, deviation, depth, top),
        Commands::Backtest { input, direction } => cmd_backtest(&input, direction),
        Commands::Optimize {
            input,
            direction,
            output,
            top,
        } => cmd_optimize(&input, direction, output, top),
        Commands::Validate { input } => cmd_validate(&input),
    }
}

fn load_config(input: &InputArgs) -> Result<AnalysisConfig> {
    match &input.config {
        Some(path) => AnalysisConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(AnalysisConfig::default()),
    }
}

/// Load the CSV, report integrity problems, and cut the requested window.
fn load_bars(input: &InputArgs) -> Result<BarSeries> {
    let series = BarLoader::new()
        .load_csv(&input.data)
        .with_context(|| format!("Failed to load bars from {}", input.data.display()))?;

    let report = BarIntegrityValidator::validate(series.bars());
    for check in report.failed_checks() {
        warn!("Integrity check {} failed: {}", check.name, check.message);
    }

    let window = time_window(input, &series)?;
    let selected = series.select(window)?;
    info!(
        "Loaded {} bars ({} in window)",
        series.len(),
        selected.len()
    );
    Ok(selected)
}

fn time_window(input: &InputArgs, series: &BarSeries) -> Result<TimeWindow> {
    if let Some(days) = input.last_days {
        return Ok(TimeWindow::LastDays(days));
    }
    if input.start.is_none() && input.end.is_none() {
        return Ok(TimeWindow::All);
    }
    let (Some(first), Some(last)) = (series.first(), series.last()) else {
        return Ok(TimeWindow::All);
    };

    let parse = |raw: &Option<String>, fallback| match raw {
        Some(s) => parse_timestamp(s).with_context(|| format!("Invalid timestamp: {}", s)),
        None => Ok(fallback),
    };
    Ok(TimeWindow::Custom {
        start: parse(&input.start, first.timestamp)?,
        end: parse(&input.end, last.timestamp)?,
    })
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_swings(
    input: &InputArgs,
    deviation: Option<f64>,
    depth: Option<usize>,
    top: usize,
) -> Result<()> {
    let mut config = load_config(input)?.swing;
    if let Some(deviation) = deviation {
        config.deviation_pct = deviation;
    }
    if let Some(depth) = depth {
        config.depth = depth;
    }

    let bars = load_bars(input)?;
    let analysis = SwingDetector::new(config).detect(bars.bars())?;
    let up_stats = SegmentStats::for_direction(&analysis.segments, SegmentDirection::Up);
    let down_stats = SegmentStats::for_direction(&analysis.segments, SegmentDirection::Down);

    if input.json {
        return print_json(&json!({
            "analysis": analysis,
            "up_stats": up_stats,
            "down_stats": down_stats,
        }));
    }

    println!("{}", SEPARATOR);
    println!("{}", analysis.summary());
    println!("{}", SEPARATOR);
    for point in &analysis.points {
        println!(
            "{}  {:>12.4}  {}{}",
            point.timestamp,
            point.price,
            point.label,
            if point.provisional { " (provisional)" } else { "" }
        );
    }

    for (direction, stats) in [
        (SegmentDirection::Up, up_stats),
        (SegmentDirection::Down, down_stats),
    ] {
        println!("\n{} legs", direction.as_str());
        match stats {
            Some(stats) => println!("  {}", stats.summary()),
            None => println!("  none"),
        }
        for seg in ranked(&analysis.segments, direction).into_iter().take(top) {
            println!("  {}  ({} to {})", seg.describe(), seg.start_time, seg.end_time);
        }
    }

    Ok(())
}

fn print_backtest(result: &BacktestResult) {
    let metrics = MetricsCalculator::calculate(result);
    println!("{}", SEPARATOR);
    println!("{}", result.report());
    println!();
    println!("{}", metrics.summary());
}

fn cmd_backtest(input: &InputArgs, direction: Option<DirectionArg>) -> Result<()> {
    let config = load_config(input)?;
    let params = config.strategy;
    let bars = load_bars(input)?;

    let results: Vec<BacktestResult> = match direction {
        Some(DirectionArg::Both) => {
            let (long, short) = run_both(bars.bars(), &params)?;
            vec![long, short]
        }
        Some(DirectionArg::Long) => vec![run(bars.bars(), TradeDirection::Long, &params)?],
        Some(DirectionArg::Short) => vec![run(bars.bars(), TradeDirection::Short, &params)?],
        None => vec![run(bars.bars(), params.direction, &params)?],
    };

    if input.json {
        let runs: Vec<serde_json::Value> = results
            .iter()
            .map(|r| {
                json!({
                    "result": r,
                    "metrics": MetricsCalculator::calculate(r),
                    "monthly": MetricsCalculator::monthly_pnl(r),
                })
            })
            .collect();
        return print_json(&json!(runs));
    }

    for result in &results {
        print_backtest(result);
    }
    Ok(())
}

fn cmd_optimize(
    input: &InputArgs,
    direction: Option<DirectionArg>,
    output: Option<PathBuf>,
    top: usize,
) -> Result<()> {
    let mut config = load_config(input)?;
    match direction {
        Some(DirectionArg::Long) => config.strategy.direction = TradeDirection::Long,
        Some(DirectionArg::Short) => config.strategy.direction = TradeDirection::Short,
        Some(DirectionArg::Both) => bail!("optimize runs one direction at a time"),
        None => {}
    }
    let bars = load_bars(input)?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(format!(
        "Evaluating {} combinations",
        config.grid.total_combinations()
    ));
    pb.enable_steady_tick(Duration::from_millis(100));

    let result = ParameterOptimizer::new(config.strategy.clone())
        .with_grid(config.grid.clone())
        .optimize(bars.bars());
    pb.finish_and_clear();
    let result = result?;

    if let (Some(path), Some(best)) = (&output, &result.best) {
        let best_config = AnalysisConfig {
            strategy: best.params.clone(),
            ..config.clone()
        };
        fs::write(path, best_config.to_toml_string()?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote best parameters to {}", path.display());
    }

    if input.json {
        return print_json(&json!({
            "best": result.best,
            "total_combinations": result.total_combinations,
            "evaluated": result.evaluations.len(),
            "leaderboard": result.leaderboard(top),
        }));
    }

    println!("{}", SEPARATOR);
    println!("{}", result.summary());
    println!("{}", SEPARATOR);
    for (rank, eval) in result.leaderboard(top).iter().enumerate() {
        println!(
            "{:>3}. {}  net {:>12.2}  closed {:>4}  win {:>5.1}%",
            rank + 1,
            eval.set.key(),
            eval.net_profit,
            eval.closed_cycles,
            eval.win_rate * 100.0
        );
    }

    if let Some(best) = &result.best {
        let rerun = run(bars.bars(), best.params.direction, &best.params)?;
        println!();
        print_backtest(&rerun);
    }
    Ok(())
}

fn cmd_validate(input: &InputArgs) -> Result<()> {
    let bars = load_bars(input)?;
    let report = BarIntegrityValidator::validate(bars.bars());

    if input.json {
        return print_json(&json!(report));
    }

    println!("{}", SEPARATOR);
    println!("{}", report.summary());
    println!("{}", SEPARATOR);
    for check in &report.checks {
        let status = if check.passed { "PASS" } else { "FAIL" };
        println!("[{}] {}: {}", status, check.name, check.message);
        if let Some(details) = &check.details {
            println!("       {}", details);
        }
    }

    if !report.all_passed() {
        bail!("{} integrity checks failed", report.failed_checks().len());
    }
    Ok(())
}
