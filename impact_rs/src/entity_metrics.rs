use std::io;

use hashbrown::HashMap;
use tabmove::{BatchSource, ScanStats, StreamProcessor};
use tracing::debug;

use crate::{
    accumulator::YearlyAccumulator,
    common::round6,
    filters::ArticleFilter,
    records::{ArticleRecord, EntityKey, EntityKind, MetricsRecord, VenueRecord, VenueStats},
};

/// Inclusive range of publication years.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearSpan {
    pub start: u16,
    pub end: u16,
}

impl YearSpan {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn years(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    pub name: String,
    pub start: u16,
    pub end: u16,
}

impl Period {
    pub fn new(name: &str, start: u16, end: u16) -> Self {
        Self {
            name: name.to_string(),
            start,
            end,
        }
    }

    pub fn label(&self) -> String {
        format!("{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Membership {
    All,
    Venues(Vec<String>),
}

impl Membership {
    pub fn filter(&self) -> ArticleFilter {
        match self {
            Membership::All => ArticleFilter::All,
            Membership::Venues(ids) => ArticleFilter::venues(ids.iter().map(String::as_str)),
        }
    }
}

/// The venue table, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct VenueIndex {
    venues: Vec<VenueRecord>,
    by_id: HashMap<String, usize>,
}

impl VenueIndex {
    pub fn new(venues: Vec<VenueRecord>) -> Self {
        let by_id = venues
            .iter()
            .enumerate()
            .map(|(i, v)| (v.id.clone(), i))
            .collect();
        Self { venues, by_id }
    }

    pub fn len(&self) -> usize {
        self.venues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.venues.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&VenueRecord> {
        self.by_id.get(id).map(|i| &self.venues[*i])
    }

    pub fn venue_ids(&self) -> Vec<String> {
        self.venues.iter().map(|v| v.id.clone()).collect()
    }

    /// Distinct non-empty country codes, sorted.
    pub fn countries(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .venues
            .iter()
            .filter_map(|v| v.country())
            .map(str::to_string)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn members(&self, key: &EntityKey) -> Membership {
        match key.kind {
            EntityKind::Venue => Membership::Venues(vec![key.id.clone()]),
            EntityKind::Country => Membership::Venues(
                self.venues
                    .iter()
                    .filter(|v| v.country() == Some(key.id.as_str()))
                    .map(|v| v.id.clone())
                    .collect(),
            ),
            EntityKind::Region => Membership::All,
        }
    }

    pub fn stats(&self, membership: &Membership) -> VenueStats {
        let set: Vec<&VenueRecord> = match membership {
            Membership::All => self.venues.iter().collect(),
            Membership::Venues(ids) => ids.iter().filter_map(|id| self.get(id)).collect(),
        };
        if set.is_empty() {
            return VenueStats::default();
        }
        let n = set.len() as f64;
        let share = |f: fn(&VenueRecord) -> bool| {
            round6(set.iter().filter(|v| f(**v)).count() as f64 * 100.0 / n)
        };
        VenueStats {
            num_journals: set.len() as u32,
            pct_scopus: share(|v| v.is_indexed_in_scopus),
            pct_core: share(|v| v.is_core),
            pct_doaj: share(|v| v.is_in_doaj),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityMetrics {
    pub key: EntityKey,
    pub annual: Vec<MetricsRecord>,
    /// `(period name, row)` in configured period order.
    pub periods: Vec<(String, MetricsRecord)>,
    pub scan: ScanStats,
}

/// Annual and period metrics for single entities.
pub struct EntityMetricsComputer<'a> {
    venues: &'a VenueIndex,
    years: YearSpan,
    periods: &'a [Period],
    stream: StreamProcessor,
}

impl<'a> EntityMetricsComputer<'a> {
    pub fn new(
        venues: &'a VenueIndex,
        years: YearSpan,
        periods: &'a [Period],
        stream: StreamProcessor,
    ) -> Self {
        Self {
            venues,
            years,
            periods,
            stream,
        }
    }

    pub fn membership(&self, key: &EntityKey) -> Membership {
        self.venues.members(key)
    }

    /// One scan of `source`; every year of the span gets a row, with or
    /// without articles.
    pub fn compute<S>(&self, key: &EntityKey, source: &mut S) -> io::Result<EntityMetrics>
    where
        S: BatchSource<ArticleRecord> + ?Sized,
    {
        let membership = self.membership(key);
        let mut yearly = YearlyAccumulator::default();
        let scan = self.stream.scan(source, &membership.filter(), &mut yearly)?;

        let annual = self
            .years
            .years()
            .map(|y| MetricsRecord::annual(key, y, &yearly.year(y).finalize()))
            .collect();
        let venue_stats = self.venues.stats(&membership);
        let periods = self
            .periods
            .iter()
            .map(|p| {
                let m = yearly.span(p.start, p.end).finalize();
                (
                    p.name.clone(),
                    MetricsRecord::period(key, &p.label(), &m, &venue_stats),
                )
            })
            .collect();
        debug!(entity = %key, matched = scan.rows_matched, "entity computed");
        Ok(EntityMetrics {
            key: key.clone(),
            annual,
            periods,
            scan,
        })
    }
}
