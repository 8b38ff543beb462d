use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use impact_rs::{runner, Comm, EntityKind, RunConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "impact", version, about = "Bibliometric indicators and trajectories")]
struct Args {
    /// Data root holding inputs/, snapshots/ and cache/
    #[arg(short, long, global = true, env = "IMPACT_ROOT", default_value = "data")]
    root: PathBuf,

    /// JSON run configuration
    #[arg(short, long, global = true, env = "IMPACT_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    batch_size: Option<usize>,

    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute metrics for every level
    Metrics {
        #[arg(short, long)]
        force: bool,
    },
    /// Compute metrics for one level
    MetricsLevel {
        #[arg(value_enum)]
        level: EntityKind,
        #[arg(short, long)]
        force: bool,
    },
    /// Smooth annual metrics and project trajectories
    Trajectories,
    /// Report cache tables and their staleness
    Status,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "impact=info,impact_rs=info,tabmove=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = RunConfig::load(args.config.as_deref()).context("loading run configuration")?;
    if let Some(b) = args.batch_size {
        config.batch_size = b;
    }
    if args.workers.is_some() {
        config.workers = args.workers;
    }
    config.validate()?;

    let comm = match args.command {
        Commands::Metrics { force } => Comm::Metrics { force },
        Commands::MetricsLevel { level, force } => Comm::MetricsLevel { level, force },
        Commands::Trajectories => Comm::Trajectories,
        Commands::Status => Comm::Status,
    };
    runner(comm, &args.root, &config)
        .with_context(|| format!("running under {}", args.root.display()))?;
    Ok(())
}
