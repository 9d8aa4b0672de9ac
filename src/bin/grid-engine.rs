// Grid Engine CLI
// Entry point for config management and event-driven replay sessions

use clap::{Parser, Subcommand};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use grid_engine::progress::ReplayProgress;
use grid_engine::{
    BarFeed, Database, EngineConfig, EngineError, EngineResult, GridEngine, SessionRunner,
    SessionSummary, SimulatedGateway,
};

#[derive(Parser)]
#[command(name = "grid-engine")]
#[command(version = "0.1.0")]
#[command(about = "Grid trading admission-control and matching engine", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Load and validate the configuration, then report the derived grid
    Validate {
        /// Print the effective configuration as JSON
        #[arg(long)]
        json: bool,
    },

    /// Replay bar files through the engine with a simulated gateway
    Replay {
        /// One CSV bar file per symbol
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Grid mid price (defaults to the first bar's close)
        #[arg(long)]
        mid: Option<f64>,

        /// Seed for the simulated gateway, for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        /// Disable the progress bar
        #[arg(long)]
        no_progress: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let result = match cli.command {
        Commands::Init { force } => cmd_init(&cli.config, force),
        Commands::Validate { json } => cmd_validate(&cli.config, json),
        Commands::Replay { files, mid, seed, no_progress } => {
            cmd_replay(&cli.config, &files, mid, seed, no_progress)
        }
    };

    if let Err(err) = result {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn cmd_init(config_path: &str, force: bool) -> EngineResult<()> {
    if Path::new(config_path).exists() && !force {
        return Err(EngineError::Internal(format!(
            "{} already exists (use --force to overwrite)",
            config_path
        )));
    }
    let config = EngineConfig::default();
    config.to_file(config_path)?;
    println!("✅ Wrote default configuration to {}", config_path);
    println!("   Edit the [grid] range and [session] symbol, then run:");
    println!("   grid-engine replay <bars.csv>");
    Ok(())
}

fn cmd_validate(config_path: &str, json: bool) -> EngineResult<()> {
    let config = EngineConfig::from_file(config_path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let spacing_floor =
        (config.grid.spacing.min_return + 2.0 * config.grid.spacing.maker_fee)
            * config.grid.spacing.spacing_multiplier;

    println!("✅ Configuration is valid");
    println!("   Symbol:        {}", config.session.symbol);
    println!(
        "   Range:         {:.2} .. {:.2}",
        config.grid.support, config.grid.resistance
    );
    println!(
        "   Layers:        {} buy / {} sell",
        config.grid.layers_buy, config.grid.layers_sell
    );
    println!("   Spacing floor: {:.4}%", spacing_floor * 100.0);
    println!("   Regime:        {}", config.weights.regime);
    println!("   Equity:        {:.2}", config.account.equity);
    Ok(())
}

fn cmd_replay(
    config_path: &str,
    files: &[PathBuf],
    mid: Option<f64>,
    seed: Option<u64>,
    no_progress: bool,
) -> EngineResult<()> {
    let config = EngineConfig::from_file(config_path)?;

    let summaries: Vec<EngineResult<SessionSummary>> = if files.len() == 1 {
        vec![replay_file(&config, &files[0], mid, seed, !no_progress, false)]
    } else {
        // Independent engine instances per symbol; no shared mutable state.
        files
            .par_iter()
            .map(|file| replay_file(&config, file, mid, seed, false, true))
            .collect()
    };

    let mut failed = 0;
    for (file, summary) in files.iter().zip(summaries) {
        match summary {
            Ok(summary) => print_summary(&summary),
            Err(err) => {
                failed += 1;
                eprintln!("❌ {}: {}", file.display(), err);
            }
        }
    }
    if failed > 0 {
        return Err(EngineError::Internal(format!(
            "{} of {} replays failed",
            failed,
            files.len()
        )));
    }
    Ok(())
}

fn replay_file(
    config: &EngineConfig,
    file: &Path,
    mid: Option<f64>,
    seed: Option<u64>,
    show_progress: bool,
    isolate_db: bool,
) -> EngineResult<SessionSummary> {
    let symbol = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&config.session.symbol)
        .to_string();

    let mut config = config.clone();
    config.session.symbol = symbol.clone();
    if isolate_db {
        // Parallel replays each get their own database file.
        config.session.db_path = format!("{}.{}.db", config.session.db_path, symbol);
    }

    let feed = BarFeed::from_csv(file, config.session.atr_period)?;
    let mid = mid
        .or_else(|| feed.slices().first().map(|s| s.bar.close))
        .ok_or_else(|| EngineError::Feed("feed contains no bars".to_string()))?;

    let db = Database::new(&config.session.db_path)
        .map_err(|e| EngineError::Database(e.to_string()))?;
    db.run_migrations()
        .map_err(|e| EngineError::Database(e.to_string()))?;

    let engine = GridEngine::new(config.clone(), mid)?;
    let gateway = match seed {
        Some(seed) => SimulatedGateway::with_seed(1.0, seed),
        None => SimulatedGateway::new(1.0),
    };
    let runner = SessionRunner::new(&config, engine, gateway, db);

    info!(symbol = %symbol, bars = feed.len(), mid, "starting replay session");

    let progress = if show_progress {
        Some(ReplayProgress::new(&symbol, feed.len()))
    } else {
        None
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| EngineError::Internal(e.to_string()))?;

    let summary = runtime.block_on(runner.run(feed.into_stream(), |bars| {
        if let Some(progress) = &progress {
            progress.set_position(bars);
        }
    }))?;

    if let Some(progress) = &progress {
        progress.finish(summary.round_trips, summary.realized_pnl);
    }
    Ok(summary)
}

fn print_summary(summary: &SessionSummary) {
    let status = &summary.final_status;
    println!("📊 {} | session {}", summary.symbol, summary.session_id);
    println!(
        "   Bars: {} | Intents: {} | Fills: {} | Round trips: {}",
        summary.bars_processed,
        summary.intents_emitted,
        summary.fills_applied,
        summary.round_trips
    );
    println!(
        "   Equity: {:.2} | Realized PnL: {:.2} | Unrealized: {:.2}",
        status.equity, status.realized_pnl, status.unrealized_pnl
    );
    println!(
        "   Holdings: {:.6} | Cost basis: {:.2} | Open positions: {}",
        status.holdings, status.cost_basis, status.open_positions
    );
    println!(
        "   Risk level: {} | Grid enabled: {} | Inventory ratio: {:.3}",
        status.risk_level, status.grid_enabled, status.inventory_ratio
    );
    if let Some(reason) = &status.shutdown_reason {
        println!("   Shutdown reason: {}", reason);
    }
    if summary.outbox_pending > 0 {
        println!(
            "   ⚠️  {} records still buffered (sink unavailable)",
            summary.outbox_pending
        );
    }
}
