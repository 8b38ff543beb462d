use std::time::Instant;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tabmove::StreamProcessor;
use tracing::{info, warn};

use crate::{
    common::{
        annual_table, Stowage, COORDS_GLOBAL, COORDS_LOCAL, TRAJ_HEAVY, TRAJ_LIGHT, TRAJ_RAW,
    },
    config::RunConfig,
    error::{Error, Result},
    orchestrator::load_venues,
    projection::TrajectoryProjector,
    records::{EntityKind, MetricsRecord},
    smoothing::TrajectorySmoother,
};

pub const N_METRICS: usize = 11;
/// The leading metrics, the ones projected.
pub const N_TRACKED: usize = 5;

/// An annual metrics row with display names, as smoothed and projected.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TrajectoryRow {
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub name: String,
    pub country_code: String,
    pub year: u16,
    pub num_documents: f64,
    pub fwci_avg: f64,
    pub avg_percentile: f64,
    pub pct_top_10: f64,
    pub pct_top_1: f64,
    pub pct_oa_gold: f64,
    pub pct_oa_diamond: f64,
    pub pct_oa_green: f64,
    pub pct_oa_hybrid: f64,
    pub pct_oa_bronze: f64,
    pub pct_oa_closed: f64,
}

impl TrajectoryRow {
    pub fn from_record(rec: &MetricsRecord, name: &str, country_code: &str) -> Option<Self> {
        let [gold, diamond, green, hybrid, bronze, closed] = rec.pct_oa();
        Some(Self {
            entity_type: rec.entity_type,
            entity_id: rec.entity_id.clone(),
            name: name.to_string(),
            country_code: country_code.to_string(),
            year: rec.year?,
            num_documents: rec.num_documents as f64,
            fwci_avg: rec.fwci_avg,
            avg_percentile: rec.avg_percentile,
            pct_top_10: rec.pct_top_10,
            pct_top_1: rec.pct_top_1,
            pct_oa_gold: gold,
            pct_oa_diamond: diamond,
            pct_oa_green: green,
            pct_oa_hybrid: hybrid,
            pct_oa_bronze: bronze,
            pct_oa_closed: closed,
        })
    }

    pub fn metrics(&self) -> [f64; N_METRICS] {
        [
            self.num_documents,
            self.fwci_avg,
            self.avg_percentile,
            self.pct_top_10,
            self.pct_top_1,
            self.pct_oa_gold,
            self.pct_oa_diamond,
            self.pct_oa_green,
            self.pct_oa_hybrid,
            self.pct_oa_bronze,
            self.pct_oa_closed,
        ]
    }

    pub fn set_metric(&mut self, i: usize, v: f64) {
        let slot = match i {
            0 => &mut self.num_documents,
            1 => &mut self.fwci_avg,
            2 => &mut self.avg_percentile,
            3 => &mut self.pct_top_10,
            4 => &mut self.pct_top_1,
            5 => &mut self.pct_oa_gold,
            6 => &mut self.pct_oa_diamond,
            7 => &mut self.pct_oa_green,
            8 => &mut self.pct_oa_hybrid,
            9 => &mut self.pct_oa_bronze,
            10 => &mut self.pct_oa_closed,
            _ => return,
        };
        *slot = v;
    }

    pub fn tracked(&self) -> [f64; N_TRACKED] {
        [
            self.num_documents,
            self.fwci_avg,
            self.avg_percentile,
            self.pct_top_10,
            self.pct_top_1,
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrajectorySummary {
    pub rows: usize,
    pub global_points: usize,
    pub local_points: usize,
}

/// Joins the annual tables of all levels with display names.
pub fn reshape(
    tables: &[(EntityKind, Vec<MetricsRecord>)],
    venue_names: &HashMap<String, (String, String)>,
    region_name: &str,
) -> Vec<TrajectoryRow> {
    let mut out = Vec::new();
    for (kind, rows) in tables {
        for rec in rows {
            let (name, country) = match kind {
                EntityKind::Venue => venue_names
                    .get(&rec.entity_id)
                    .map(|(n, c)| (n.as_str(), c.as_str()))
                    .unwrap_or((rec.entity_id.as_str(), "")),
                EntityKind::Country => (rec.entity_id.as_str(), rec.entity_id.as_str()),
                EntityKind::Region => (region_name, ""),
            };
            out.extend(TrajectoryRow::from_record(rec, name, country));
        }
    }
    out
}

/// Smooths the annual tables and projects them into the global and local maps.
pub fn run_trajectories(stowage: &Stowage, config: &RunConfig) -> Result<TrajectorySummary> {
    let start = Instant::now();
    let store = stowage.store();
    let tables: Vec<(EntityKind, Vec<MetricsRecord>)> = EntityKind::ALL
        .iter()
        .filter_map(|k| store.read(&annual_table(*k)).map(|rows| (*k, rows)))
        .collect();
    if tables.is_empty() {
        return Err(Error::NoMetrics(stowage.cache.clone()));
    }

    let mut venue_names = HashMap::new();
    let venues_path = stowage.venues_path();
    if venues_path.is_file() {
        for v in load_venues(&venues_path, &StreamProcessor::new(config.batch_size))? {
            let name = v.display_name.clone().unwrap_or_else(|| v.id.clone());
            let country = v.country().unwrap_or("").to_string();
            venue_names.insert(v.id, (name, country));
        }
    } else {
        warn!("venue table missing, venues named by id");
    }

    let raw = reshape(&tables, &venue_names, &config.region_name);
    info!(rows = raw.len(), "trajectory rows loaded");
    let light = TrajectorySmoother::light().smooth(&raw);
    let heavy = TrajectorySmoother::heavy().smooth(&raw);
    store.write(TRAJ_RAW, &raw)?;
    store.write(TRAJ_LIGHT, &light)?;
    store.write(TRAJ_HEAVY, &heavy)?;

    let projector = TrajectoryProjector::new(config.projection.clone());
    let global = projector.global_map(&light);
    let local = projector.local_maps(&light);
    store.write(COORDS_GLOBAL, &global)?;
    store.write(COORDS_LOCAL, &local)?;
    info!(
        global = global.len(),
        local = local.len(),
        secs = start.elapsed().as_secs_f64(),
        "trajectories written"
    );
    Ok(TrajectorySummary {
        rows: raw.len(),
        global_points: global.len(),
        local_points: local.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{accumulator::DocMetrics, records::EntityKey};

    #[test]
    fn reshape_names_rows() {
        let m = DocMetrics {
            num_documents: 4,
            fwci_avg: 1.5,
            pct_oa: [10.0, 0.0, 0.0, 0.0, 0.0, 90.0],
            ..Default::default()
        };
        let tables = vec![
            (
                EntityKind::Venue,
                vec![
                    MetricsRecord::annual(&EntityKey::venue("V1"), 2020, &m),
                    MetricsRecord::annual(&EntityKey::venue("V2"), 2020, &m),
                ],
            ),
            (EntityKind::Country, vec![MetricsRecord::annual(&EntityKey::country("AR"), 2020, &m)]),
            (EntityKind::Region, vec![MetricsRecord::annual(&EntityKey::region("LATAM"), 2020, &m)]),
        ];
        let mut names = HashMap::new();
        names.insert("V1".to_string(), ("Revista Uno".to_string(), "AR".to_string()));
        let rows = reshape(&tables, &names, "Iberoamérica");
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].name, "Revista Uno");
        assert_eq!(rows[0].country_code, "AR");
        assert_eq!(rows[1].name, "V2");
        assert_eq!(rows[2].country_code, "AR");
        assert_eq!(rows[3].name, "Iberoamérica");
        assert_eq!(rows[3].num_documents, 4.0);
        assert_eq!(rows[3].pct_oa_closed, 90.0);
        assert_eq!(rows[0].metrics()[1], 1.5);
    }

    #[test]
    fn metric_slots_line_up() {
        let mut r = TrajectoryRow::default();
        for i in 0..N_METRICS {
            r.set_metric(i, i as f64);
        }
        assert_eq!(r.metrics(), [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);
        assert_eq!(r.tracked(), [0.0, 1.0, 2.0, 3.0, 4.0]);
    }
}
