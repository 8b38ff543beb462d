use hashbrown::HashMap;

use crate::trajectory::{TrajectoryRow, N_METRICS};

pub const LIGHT_WINDOW: usize = 3;
pub const HEAVY_WINDOW: usize = 5;
const TAU: f64 = 1.0;

/// Centered exponentially weighted mean over `window` observations.
///
/// Position `j` of the window weighs `exp(-|j - (window - 1) / 2| / tau)`.
/// Near the edges only the in-range part of the window is used; NaN
/// observations are left out of both sums. A value is NaN only when its whole
/// window is.
pub fn ewm_centered(values: &[f64], window: usize, tau: f64) -> Vec<f64> {
    let window = window.max(1);
    let center = (window as f64 - 1.0) / 2.0;
    let weights: Vec<f64> = (0..window)
        .map(|j| (-(j as f64 - center).abs() / tau).exp())
        .collect();
    let lead = (window / 2) as isize;
    (0..values.len() as isize)
        .map(|t| {
            let (mut num, mut den) = (0.0, 0.0);
            for (j, w) in weights.iter().enumerate() {
                let idx = t - lead + j as isize;
                if idx < 0 || idx >= values.len() as isize {
                    continue;
                }
                let v = values[idx as usize];
                if v.is_nan() {
                    continue;
                }
                num += w * v;
                den += w;
            }
            if den > 0.0 {
                num / den
            } else {
                f64::NAN
            }
        })
        .collect()
}

pub struct TrajectorySmoother {
    window: usize,
    tau: f64,
}

impl TrajectorySmoother {
    pub fn new(window: usize) -> Self {
        Self { window, tau: TAU }
    }

    pub fn light() -> Self {
        Self::new(LIGHT_WINDOW)
    }

    pub fn heavy() -> Self {
        Self::new(HEAVY_WINDOW)
    }

    /// One output row per input row, grouped by entity and sorted by year.
    pub fn smooth(&self, rows: &[TrajectoryRow]) -> Vec<TrajectoryRow> {
        let mut order: Vec<(String, String)> = Vec::new();
        let mut groups: HashMap<(String, String), Vec<&TrajectoryRow>> = HashMap::new();
        for r in rows {
            let k = (r.entity_type.to_string(), r.entity_id.clone());
            groups
                .entry(k.clone())
                .or_insert_with(|| {
                    order.push(k);
                    Vec::new()
                })
                .push(r);
        }

        let mut out = Vec::with_capacity(rows.len());
        for k in order {
            let mut group = groups.remove(&k).unwrap_or_default();
            group.sort_by_key(|r| r.year);
            let mut smoothed: Vec<TrajectoryRow> = group.iter().map(|r| (*r).clone()).collect();
            for m in 0..N_METRICS {
                let series: Vec<f64> = group.iter().map(|r| r.metrics()[m]).collect();
                for (row, v) in smoothed
                    .iter_mut()
                    .zip(ewm_centered(&series, self.window, self.tau))
                {
                    row.set_metric(m, v);
                }
            }
            out.extend(smoothed);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::records::EntityKind;

    #[test]
    fn light_window_weights() {
        let e = (-1.0f64).exp();
        let out = ewm_centered(&[1.0, 2.0, 4.0], 3, 1.0);
        assert_relative_eq!(out[0], (1.0 + 2.0 * e) / (1.0 + e));
        assert_relative_eq!(out[1], (e * 1.0 + 2.0 + e * 4.0) / (1.0 + 2.0 * e));
        assert_relative_eq!(out[2], (e * 2.0 + 4.0) / (1.0 + e));
    }

    #[test]
    fn constant_series_unchanged_and_nan_skipped() {
        for w in [1, 3, 5] {
            let out = ewm_centered(&[3.0; 6], w, 1.0);
            for v in out {
                assert_relative_eq!(v, 3.0, epsilon = 1e-12);
            }
        }
        let out = ewm_centered(&[1.0, f64::NAN, 1.0], 3, 1.0);
        assert_relative_eq!(out[1], 1.0, epsilon = 1e-12);
        assert!(ewm_centered(&[f64::NAN], 5, 1.0)[0].is_nan());
        assert!(ewm_centered(&[], 3, 1.0).is_empty());
    }

    fn row(kind: EntityKind, id: &str, year: u16, docs: f64) -> TrajectoryRow {
        TrajectoryRow {
            entity_type: kind,
            entity_id: id.to_string(),
            name: id.to_string(),
            year,
            num_documents: docs,
            ..Default::default()
        }
    }

    #[test]
    fn every_row_survives_per_entity() {
        let rows = vec![
            row(EntityKind::Venue, "V1", 2022, 3.0),
            row(EntityKind::Country, "AR", 2020, 10.0),
            row(EntityKind::Venue, "V1", 2020, 1.0),
            row(EntityKind::Venue, "V1", 2021, 2.0),
            row(EntityKind::Venue, "V2", 2020, 5.0),
        ];
        for smoother in [TrajectorySmoother::light(), TrajectorySmoother::heavy()] {
            let out = smoother.smooth(&rows);
            assert_eq!(out.len(), rows.len());
            let v1: Vec<&TrajectoryRow> = out.iter().filter(|r| r.entity_id == "V1").collect();
            assert_eq!(v1.iter().map(|r| r.year).collect::<Vec<_>>(), [2020, 2021, 2022]);
            let v2 = out.iter().find(|r| r.entity_id == "V2").unwrap();
            assert_relative_eq!(v2.num_documents, 5.0);
            let ar = out.iter().find(|r| r.entity_id == "AR").unwrap();
            assert_relative_eq!(ar.num_documents, 10.0);
        }
        let light = TrajectorySmoother::light().smooth(&rows);
        assert_relative_eq!(light[1].num_documents, 2.0);
    }
}
