pub mod accumulator;
pub mod common;
pub mod config;
pub mod entity_metrics;
pub mod error;
pub mod filters;
pub mod orchestrator;
pub mod projection;
pub mod records;
pub mod smoothing;
pub mod trajectory;
mod umap;

use std::path::Path;

use tabmove::TableStatus;
use tracing::info;

pub use accumulator::{DocMetrics, RecordAccumulator, YearlyAccumulator};
pub use common::Stowage;
pub use config::{PeriodSpec, ProjectionConfig, RunConfig};
pub use entity_metrics::{EntityMetrics, EntityMetricsComputer, Period, VenueIndex, YearSpan};
pub use error::{Error, Result};
pub use orchestrator::{LevelReport, ParallelOrchestrator, RunReport};
pub use projection::{MapContext, TrajectoryPoint, TrajectoryProjector};
pub use records::{ArticleRecord, EntityKey, EntityKind, MetricsRecord, OaStatus, VenueRecord};
pub use smoothing::TrajectorySmoother;
pub use trajectory::{run_trajectories, TrajectoryRow, TrajectorySummary};

pub enum Comm {
    Metrics { force: bool },
    MetricsLevel { level: EntityKind, force: bool },
    Trajectories,
    Status,
}

pub fn runner(comm: Comm, root: &Path, config: &RunConfig) -> Result<()> {
    let stowage = Stowage::new(root)?;
    match comm {
        Comm::Metrics { force } => {
            ParallelOrchestrator::new(&stowage, config).run(&EntityKind::ALL, force)?;
        }
        Comm::MetricsLevel { level, force } => {
            ParallelOrchestrator::new(&stowage, config).run(&[level], force)?;
        }
        Comm::Trajectories => {
            run_trajectories(&stowage, config)?;
        }
        Comm::Status => {
            for s in status(&stowage, config) {
                info!(
                    table = %s.name,
                    exists = s.exists(),
                    stale = s.stale,
                    age_secs = ?s.modified.and_then(|m| m.elapsed().ok()).map(|d| d.as_secs()),
                    "cache table"
                );
            }
        }
    }
    Ok(())
}

/// Every table the pipeline writes, checked against the input tables.
pub fn status(stowage: &Stowage, config: &RunConfig) -> Vec<TableStatus> {
    let store = stowage.store();
    let (articles, venues) = (stowage.articles_path(), stowage.venues_path());
    let inputs = [articles.as_path(), venues.as_path()];
    let mut names = Vec::new();
    for kind in EntityKind::ALL {
        names.push(common::annual_table(kind));
        names.extend(
            config
                .periods
                .iter()
                .map(|p| common::period_table(kind, &p.name)),
        );
    }
    names.extend(
        [
            common::TRAJ_RAW,
            common::TRAJ_LIGHT,
            common::TRAJ_HEAVY,
            common::COORDS_GLOBAL,
            common::COORDS_LOCAL,
        ]
        .map(str::to_string),
    );
    names.iter().map(|n| store.status(n, &inputs)).collect()
}

//definitions
//level: one entity kind, with an annual table and one table per named period
//period: a named inclusive year range, open ends follow the detected years
//trajectory: the yearly metric path of one entity, smoothed and projected to 2d
