use std::{fs::read_to_string, path::Path};

use serde::{Deserialize, Serialize};
use tabmove::{conservative_threads, DEFAULT_BATCH_SIZE};

use crate::{
    entity_metrics::{Period, YearSpan},
    error::{Error, Result},
};

/// A named period as configured; open bounds follow the detected year span.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PeriodSpec {
    pub name: String,
    #[serde(default)]
    pub start: Option<u16>,
    #[serde(default)]
    pub end: Option<u16>,
}

impl PeriodSpec {
    pub fn new(name: &str, start: Option<u16>, end: Option<u16>) -> Self {
        Self {
            name: name.to_string(),
            start,
            end,
        }
    }

    pub fn resolve(&self, span: &YearSpan) -> Period {
        Period::new(
            &self.name,
            self.start.unwrap_or(span.start),
            self.end.unwrap_or(span.end),
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub batch_size: usize,
    /// Fixed pool size; derived from the machine when absent.
    pub workers: Option<usize>,
    pub worker_fraction: f64,
    pub max_workers: usize,
    pub country_chunks: usize,
    pub venue_chunks: usize,
    pub venue_min_chunk: usize,
    pub start_year: Option<u16>,
    pub end_year: Option<u16>,
    pub periods: Vec<PeriodSpec>,
    pub region_id: String,
    pub region_name: String,
    pub projection: ProjectionConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            workers: None,
            worker_fraction: 0.25,
            max_workers: 8,
            country_chunks: 4,
            venue_chunks: 20,
            venue_min_chunk: 10,
            start_year: None,
            end_year: None,
            periods: vec![
                PeriodSpec::new("full", None, None),
                PeriodSpec::new("recent", Some(2021), Some(2025)),
            ],
            region_id: "LATAM".to_string(),
            region_name: "Iberoamérica".to_string(),
            projection: ProjectionConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn from_json(s: &str) -> Result<Self> {
        let de = &mut serde_json::Deserializer::from_str(s);
        let conf: Self = serde_path_to_error::deserialize(de)
            .map_err(|e| Error::Config(format!("{} at {}", e.inner(), e.path())))?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let s = read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&s)
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".to_string()));
        }
        if let (Some(s), Some(e)) = (self.start_year, self.end_year) {
            if s > e {
                return Err(Error::Config(format!("start_year {} after end_year {}", s, e)));
            }
        }
        let mut names: Vec<&str> = self.periods.iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.periods.len() {
            return Err(Error::Config("period names must be unique".to_string()));
        }
        if let Some(bad) = self
            .periods
            .iter()
            .find(|p| p.name.is_empty() || !p.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        {
            return Err(Error::Config(format!("invalid period name {:?}", bad.name)));
        }
        Ok(())
    }

    pub fn n_workers(&self) -> usize {
        match self.workers {
            Some(n) => n.max(1),
            None => conservative_threads(self.worker_fraction, self.max_workers),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectionConfig {
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub n_epochs: usize,
    pub seed: u64,
    /// Maps with fewer points are not drawn.
    pub min_points: usize,
    /// Local maps below this size get a reduced neighbour count.
    pub small_map_points: usize,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 30,
            min_dist: 0.1,
            n_epochs: 200,
            seed: 42,
            min_points: 10,
            small_map_points: 15,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let conf = RunConfig::from_json(r#"{"batch_size": 10, "projection": {"seed": 7}}"#).unwrap();
        assert_eq!(conf.batch_size, 10);
        assert_eq!(conf.projection.seed, 7);
        assert_eq!(conf.projection.n_neighbors, 30);
        assert_eq!(conf.region_id, "LATAM");
        assert_eq!(conf.periods.len(), 2);
    }

    #[test]
    fn bad_field_reports_path() {
        let err = RunConfig::from_json(r#"{"projection": {"seed": "x"}}"#).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("projection.seed"), "{}", msg);
        assert!(RunConfig::from_json(r#"{"bogus": 1}"#).is_err());
        assert!(RunConfig::from_json(r#"{"start_year": 2020, "end_year": 2010}"#).is_err());
        assert!(RunConfig::from_json(
            r#"{"periods": [{"name": "a"}, {"name": "a", "start": 2000}]}"#
        )
        .is_err());
    }

    #[test]
    fn open_period_bounds_follow_span() {
        let span = YearSpan::new(1990, 2024);
        let conf = RunConfig::default();
        let full = conf.periods[0].resolve(&span);
        assert_eq!((full.start, full.end), (1990, 2024));
        assert_eq!(full.label(), "1990-2024");
        assert_eq!(conf.periods[1].resolve(&span).label(), "2021-2025");
    }

    #[test]
    fn workers_clamped() {
        let conf = RunConfig::default();
        assert_eq!((conf.worker_fraction, conf.max_workers), (0.25, 8));
        assert_eq!(conf.n_workers(), conservative_threads(0.25, 8));
        assert!((1..=8).contains(&conf.n_workers()));
        let fixed = RunConfig {
            workers: Some(0),
            ..Default::default()
        };
        assert_eq!(fixed.n_workers(), 1);
    }
}
