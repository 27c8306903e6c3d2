//! Kibitz command-line front end.
//!
//! - `kibitz run` - watch the screen and play (operator commands on stdin)
//! - `kibitz locate <image>` - find the board in a screenshot
//! - `kibitz diff <before> <after>` - infer the move between two layouts
//! - `kibitz stats` - summarise a telemetry log
//! - `kibitz init-config <file>` - write the default configuration

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use kibitz::board::{infer_move, parse_layout, Side};
use kibitz::config::Config;
use kibitz::decide::CoordinatorEvent;
use kibitz::locate::{locate_board, Strategy};
use kibitz::protocol::parse_control;
use kibitz::session::{Session, SessionEvent};
use kibitz::telemetry::{load_entries, Summary};

#[derive(Parser)]
#[command(name = "kibitz")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the board and answer it
    Run {
        #[arg(short, long, default_value = "kibitz.json")]
        config: PathBuf,
        /// Side to play, overriding the configuration (w or b)
        #[arg(long)]
        color: Option<Side>,
        #[arg(long)]
        auto: bool,
        #[arg(long)]
        stealth: bool,
    },
    /// Locate the chess board in a screenshot
    Locate {
        image: PathBuf,
        #[arg(long, default_value_t = 1.0)]
        dpr: f64,
        #[arg(long, value_parser = parse_strategy)]
        strategy: Option<Strategy>,
    },
    /// Infer the move between two piece-placement strings
    Diff { before: String, after: String },
    /// Print statistics of a telemetry log as JSON
    Stats {
        #[arg(long, default_value = "telemetry_log.json")]
        log: PathBuf,
        /// Number of recent think times to include
        #[arg(long, default_value_t = 10)]
        recent: usize,
    },
    /// Write the default configuration
    InitConfig {
        path: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

fn parse_strategy(s: &str) -> Result<Strategy, String> {
    match s {
        "auto" => Ok(Strategy::Auto),
        "contours" => Ok(Strategy::Contours),
        "lines" => Ok(Strategy::Lines),
        other => Err(format!("unknown strategy '{}'", other)),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            color,
            auto,
            stealth,
        } => run(&config, color, auto, stealth),
        Commands::Locate {
            image,
            dpr,
            strategy,
        } => locate(&image, dpr, strategy),
        Commands::Diff { before, after } => diff(&before, &after),
        Commands::Stats { log, recent } => stats(&log, recent),
        Commands::InitConfig { path, force } => init_config(&path, force),
    }
}

fn run(path: &Path, color: Option<Side>, auto: bool, stealth: bool) -> Result<()> {
    let mut config = Config::load_or_default(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    if let Some(side) = color {
        config.decision.player = side;
    }
    config.decision.auto_execute |= auto;
    config.decision.stealth_enabled |= stealth;

    let mut session = Session::with_processes(config).context("failed to set up session")?;
    let events = session.subscribe();
    let handle = session.handle();

    thread::spawn(move || {
        for event in events {
            match event {
                SessionEvent::Decision(CoordinatorEvent::MoveChosen { mv, rank, score, .. }) => {
                    println!("move {} (line {}, {:+.2})", mv, rank, score as f64 / 100.0)
                }
                SessionEvent::Decision(CoordinatorEvent::MoveInferred { history_line, .. }) => {
                    println!("{}", history_line)
                }
                SessionEvent::Decision(CoordinatorEvent::EvalUpdated { score, .. }) => {
                    println!("eval {}", score.display())
                }
                SessionEvent::Status(msg) | SessionEvent::Decision(CoordinatorEvent::StatusChanged(msg)) => {
                    println!("{}", msg)
                }
                _ => {}
            }
        }
    });

    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if let Some(control) = parse_control(&line) {
                if !handle.send(control) {
                    break;
                }
            }
        }
    });

    session.run();
    Ok(())
}

fn locate(path: &Path, dpr: f64, strategy: Option<Strategy>) -> Result<()> {
    let image = image::open(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .to_rgba8();
    let mut cfg = Config::default().locate;
    if let Some(s) = strategy {
        cfg.strategy = s;
    }
    match locate_board(&image, dpr, &cfg) {
        Some(rect) => {
            println!("{} {} {} {}", rect.x, rect.y, rect.width, rect.height);
            Ok(())
        }
        None => bail!("no chess board found in {}", path.display()),
    }
}

fn diff(before: &str, after: &str) -> Result<()> {
    let a = parse_layout(before).context("invalid first layout")?;
    let b = parse_layout(after).context("invalid second layout")?;
    match infer_move(&a, &b) {
        Some(mv) => println!("{}", mv),
        None => println!("none"),
    }
    Ok(())
}

fn stats(log: &Path, recent: usize) -> Result<()> {
    let entries = load_entries(log).with_context(|| format!("failed to read {}", log.display()))?;
    if entries.is_empty() {
        warn!("{} holds no entries", log.display());
    }
    let summary = Summary::of(&entries, recent);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::default()
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}
