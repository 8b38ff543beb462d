use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use tqdm::Iter;
use tracing::{debug, info};

use crate::{
    config::ProjectionConfig,
    records::EntityKind,
    trajectory::{TrajectoryRow, N_TRACKED},
    umap::Umap,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapContext {
    Global,
    Country(String),
}

impl Display for MapContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapContext::Global => f.write_str("global"),
            MapContext::Country(c) => write!(f, "country:{}", c),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TrajectoryPoint {
    pub map_context: String,
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub name: String,
    pub year: u16,
    pub x: f64,
    pub y: f64,
}

/// Column-wise z-scores; a column without variance maps to zeros.
pub fn standardize(data: &[[f64; N_TRACKED]]) -> Vec<Vec<f64>> {
    let n = data.len() as f64;
    let mut mean = [0.0; N_TRACKED];
    let mut sd = [0.0; N_TRACKED];
    for c in 0..N_TRACKED {
        mean[c] = data.iter().map(|r| r[c]).sum::<f64>() / n;
        sd[c] = (data.iter().map(|r| (r[c] - mean[c]).powi(2)).sum::<f64>() / n).sqrt();
    }
    data.iter()
        .map(|r| {
            (0..N_TRACKED)
                .map(|c| if sd[c] > 0.0 { (r[c] - mean[c]) / sd[c] } else { 0.0 })
                .collect()
        })
        .collect()
}

pub struct TrajectoryProjector {
    config: ProjectionConfig,
}

impl TrajectoryProjector {
    pub fn new(config: ProjectionConfig) -> Self {
        Self { config }
    }

    pub fn neighbours_for(&self, n_points: usize, context: &MapContext) -> usize {
        let k = match context {
            MapContext::Country(_) if n_points < self.config.small_map_points => {
                (n_points / 2).max(2)
            }
            _ => self.config.n_neighbors,
        };
        k.min(n_points.saturating_sub(1)).max(1)
    }

    /// Embeds one map. Rows with a NaN tracked value are left out; a map that
    /// ends up below the minimum size yields no points.
    pub fn project(&self, context: &MapContext, rows: &[&TrajectoryRow]) -> Vec<TrajectoryPoint> {
        let usable: Vec<&TrajectoryRow> = rows
            .iter()
            .copied()
            .filter(|r| r.tracked().iter().all(|v| !v.is_nan()))
            .collect();
        if usable.len() < self.config.min_points {
            debug!(map = %context, points = usable.len(), "too few points, map skipped");
            return Vec::new();
        }
        let data: Vec<[f64; N_TRACKED]> = usable.iter().map(|r| r.tracked()).collect();
        let umap = Umap {
            n_neighbors: self.neighbours_for(usable.len(), context),
            min_dist: self.config.min_dist,
            n_epochs: self.config.n_epochs,
            seed: self.config.seed,
        };
        let coords = umap.embed(&standardize(&data));
        let map_context = context.to_string();
        usable
            .iter()
            .zip(coords)
            .map(|(r, [x, y])| TrajectoryPoint {
                map_context: map_context.clone(),
                entity_type: r.entity_type,
                entity_id: r.entity_id.clone(),
                name: r.name.clone(),
                year: r.year,
                x,
                y,
            })
            .collect()
    }

    /// Countries and the region on one map.
    pub fn global_map(&self, rows: &[TrajectoryRow]) -> Vec<TrajectoryPoint> {
        let picked: Vec<&TrajectoryRow> = rows
            .iter()
            .filter(|r| matches!(r.entity_type, EntityKind::Country | EntityKind::Region))
            .collect();
        let points = self.project(&MapContext::Global, &picked);
        info!(input = picked.len(), points = points.len(), "global map projected");
        points
    }

    /// One map per country: its venues and its own yearly points.
    pub fn local_maps(&self, rows: &[TrajectoryRow]) -> Vec<TrajectoryPoint> {
        let mut countries: Vec<&str> = rows
            .iter()
            .filter(|r| r.entity_type == EntityKind::Country)
            .map(|r| r.entity_id.as_str())
            .collect();
        countries.sort_unstable();
        countries.dedup();

        let mut out = Vec::new();
        let mut drawn = 0;
        for c in countries.iter().tqdm().desc(Some("local maps")) {
            let picked: Vec<&TrajectoryRow> = rows
                .iter()
                .filter(|r| r.entity_type != EntityKind::Region && r.country_code == *c)
                .collect();
            let points = self.project(&MapContext::Country(c.to_string()), &picked);
            if !points.is_empty() {
                drawn += 1;
            }
            out.extend(points);
        }
        info!(countries = countries.len(), drawn, points = out.len(), "local maps projected");
        out
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;

    fn quick() -> ProjectionConfig {
        ProjectionConfig {
            n_epochs: 60,
            ..Default::default()
        }
    }

    fn row(kind: EntityKind, id: &str, country: &str, year: u16, base: f64) -> TrajectoryRow {
        TrajectoryRow {
            entity_type: kind,
            entity_id: id.to_string(),
            name: id.to_string(),
            country_code: country.to_string(),
            year,
            num_documents: base * 10.0 + year as f64 % 7.0,
            fwci_avg: base + (year % 3) as f64 * 0.1,
            avg_percentile: base * 20.0,
            pct_top_10: base * 2.0,
            pct_top_1: base / 2.0,
            ..Default::default()
        }
    }

    #[test]
    fn small_map_yields_nothing() {
        let rows: Vec<TrajectoryRow> =
            (0..9).map(|i| row(EntityKind::Country, "AR", "AR", 2010 + i, 1.0)).collect();
        let projector = TrajectoryProjector::new(quick());
        assert!(projector.global_map(&rows).is_empty());
        assert!(projector.local_maps(&rows).is_empty());
    }

    #[test]
    fn nan_rows_dropped_before_counting() {
        let mut rows: Vec<TrajectoryRow> =
            (0..10).map(|i| row(EntityKind::Country, "AR", "AR", 2010 + i, 1.0)).collect();
        rows[0].fwci_avg = f64::NAN;
        let projector = TrajectoryProjector::new(quick());
        assert!(projector.global_map(&rows).is_empty());
    }

    #[test]
    fn neighbour_count_shrinks_for_small_local_maps() {
        let projector = TrajectoryProjector::new(ProjectionConfig::default());
        let local = MapContext::Country("AR".to_string());
        assert_eq!(projector.neighbours_for(12, &local), 6);
        assert_eq!(projector.neighbours_for(3, &local), 2);
        assert_eq!(projector.neighbours_for(100, &local), 30);
        assert_eq!(projector.neighbours_for(12, &MapContext::Global), 11);
        assert_eq!(local.to_string(), "country:AR");
    }

    #[test]
    fn maps_hold_the_right_entities() {
        let mut rows = Vec::new();
        for y in 2000..2012 {
            rows.push(row(EntityKind::Country, "AR", "AR", y, 1.0));
            rows.push(row(EntityKind::Country, "BR", "BR", y, 2.0));
            rows.push(row(EntityKind::Region, "LATAM", "", y, 1.5));
            rows.push(row(EntityKind::Venue, "V1", "AR", y, 0.5));
            rows.push(row(EntityKind::Venue, "V9", "UY", y, 0.7));
        }
        let projector = TrajectoryProjector::new(quick());
        let global = projector.global_map(&rows);
        assert_eq!(global.len(), 36);
        assert!(global.iter().all(|p| p.map_context == "global"));
        assert!(global.iter().all(|p| p.entity_type != EntityKind::Venue));

        let local = projector.local_maps(&rows);
        assert_eq!(local.len(), 24 + 12);
        let ar: Vec<&TrajectoryPoint> =
            local.iter().filter(|p| p.map_context == "country:AR").collect();
        assert_eq!(ar.len(), 24);
        assert!(ar.iter().all(|p| p.entity_id == "AR" || p.entity_id == "V1"));
        assert!(local.iter().all(|p| p.entity_id != "V9"));
        assert!(local.iter().all(|p| p.x.is_finite() && p.y.is_finite()));
    }

    #[test]
    fn same_seed_same_coordinates() {
        let rows: Vec<TrajectoryRow> = (0..20)
            .map(|i| row(EntityKind::Country, &format!("C{}", i % 4), "", 2000 + i, (i % 4) as f64))
            .collect();
        let projector = TrajectoryProjector::new(quick());
        assert_eq!(projector.global_map(&rows), projector.global_map(&rows));
    }

    #[test]
    fn separated_groups_stay_apart() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut rows = Vec::new();
        for (g, base) in [(0, 0.0), (1, 50.0)] {
            for i in 0..20u16 {
                let mut r = row(EntityKind::Country, &format!("G{}", g), "", 1990 + i, 1.0);
                r.num_documents = base + rng.gen_range(0.0..1.0);
                r.fwci_avg = base + rng.gen_range(0.0..1.0);
                r.avg_percentile = base + rng.gen_range(0.0..1.0);
                r.pct_top_10 = base + rng.gen_range(0.0..1.0);
                r.pct_top_1 = base + rng.gen_range(0.0..1.0);
                rows.push(r);
            }
        }
        let projector = TrajectoryProjector::new(ProjectionConfig {
            n_neighbors: 10,
            ..Default::default()
        });
        let points = projector.global_map(&rows);
        assert_eq!(points.len(), 40);
        let dist = |p: &TrajectoryPoint, q: &TrajectoryPoint| ((p.x - q.x).powi(2) + (p.y - q.y).powi(2)).sqrt();
        let (mut intra, mut n_intra, mut inter, mut n_inter) = (0.0, 0, 0.0, 0);
        for p in &points {
            for q in &points {
                if std::ptr::eq(p, q) {
                    continue;
                }
                if p.entity_id == q.entity_id {
                    intra += dist(p, q);
                    n_intra += 1;
                } else {
                    inter += dist(p, q);
                    n_inter += 1;
                }
            }
        }
        assert!(intra / (n_intra as f64) < inter / (n_inter as f64));
    }
}
