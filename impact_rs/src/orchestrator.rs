use std::{
    fs::{read_to_string, File},
    io::{self, BufWriter},
    ops::Range,
    path::{Path, PathBuf},
    time::Instant,
};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tabmove::{
    merge, older_than_any, pending_any, read_bin_rows, write_gz_bytes, Accumulator, BinRowWriter,
    ChunkReport, ChunkedPool, CsvSource, MatchAll, Spans, StreamProcessor, Worker,
};
use tracing::{info, warn};

use crate::{
    common::{annual_table, period_table, Stowage},
    config::RunConfig,
    entity_metrics::{EntityMetrics, EntityMetricsComputer, Membership, Period, VenueIndex, YearSpan},
    error::{Error, Result},
    records::{ArticleRecord, EntityKey, EntityKind, MetricsRecord, VenueRecord},
};

/// What the last snapshot build saw of the article table.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SnapshotMeta {
    pub rows: u64,
    pub skipped: usize,
    pub min_year: Option<u16>,
    pub max_year: Option<u16>,
}

struct SnapshotSink {
    writer: BinRowWriter<ArticleRecord>,
    years: Option<(u16, u16)>,
    failure: Option<io::Error>,
}

impl Accumulator<ArticleRecord> for SnapshotSink {
    fn add(&mut self, batch: &[&ArticleRecord]) {
        if self.failure.is_some() {
            return;
        }
        for rec in batch {
            if let Err(e) = self.writer.push(rec) {
                self.failure = Some(e);
                return;
            }
            let y = rec.publication_year;
            self.years = Some(match self.years {
                None => (y, y),
                Some((lo, hi)) => (lo.min(y), hi.max(y)),
            });
        }
    }
}

/// Parses the article csv once into a bincode snapshot, unless the snapshot
/// is newer than the csv already.
pub fn prepare_snapshot(stowage: &Stowage, stream: &StreamProcessor) -> Result<SnapshotMeta> {
    let csv_path = stowage.articles_path();
    let bin_path = stowage.snapshot_path();
    let meta_path = stowage.snapshot_meta_path();
    if !older_than_any(&bin_path, &[&csv_path]) && !older_than_any(&meta_path, &[&csv_path]) {
        if let Ok(meta) = read_to_string(&meta_path)
            .map_err(Error::from)
            .and_then(|s| Ok(serde_json::from_str::<SnapshotMeta>(&s)?))
        {
            info!(rows = meta.rows, "article snapshot up to date");
            return Ok(meta);
        }
    }

    let start = Instant::now();
    let mut sink = SnapshotSink {
        writer: BinRowWriter::create(&bin_path)?,
        years: None,
        failure: None,
    };
    let stats = stream.scan(
        &mut CsvSource::<ArticleRecord>::new(&csv_path),
        &MatchAll,
        &mut sink,
    )?;
    if let Some(e) = sink.failure {
        return Err(e.into());
    }
    let rows = sink.writer.finish()?;
    let meta = SnapshotMeta {
        rows,
        skipped: stats.rows_skipped,
        min_year: sink.years.map(|y| y.0),
        max_year: sink.years.map(|y| y.1),
    };
    serde_json::to_writer_pretty(BufWriter::new(File::create(&meta_path)?), &meta)?;
    info!(
        rows,
        skipped = meta.skipped,
        secs = start.elapsed().as_secs_f64(),
        "article snapshot written"
    );
    Ok(meta)
}

pub fn load_venues(path: &Path, stream: &StreamProcessor) -> io::Result<Vec<VenueRecord>> {
    let mut venues: Vec<VenueRecord> = Vec::new();
    stream.scan(&mut CsvSource::<VenueRecord>::new(path), &MatchAll, &mut venues)?;
    Ok(venues)
}

/// A worker's own copy of the inputs: articles grouped by venue.
pub struct LoadedTables {
    articles: Vec<ArticleRecord>,
    spans: HashMap<String, Range<usize>>,
    pub venues: VenueIndex,
}

impl LoadedTables {
    pub fn new(mut articles: Vec<ArticleRecord>, venues: VenueIndex) -> Self {
        articles.sort_by(|a, b| a.venue_id.cmp(&b.venue_id));
        let mut spans: HashMap<String, Range<usize>> = HashMap::new();
        let mut start = 0;
        for i in 1..=articles.len() {
            if i == articles.len() || articles[i].venue_id != articles[start].venue_id {
                spans.insert(articles[start].venue_id.clone(), start..i);
                start = i;
            }
        }
        Self {
            articles,
            spans,
            venues,
        }
    }

    pub fn source(&self, membership: &Membership) -> Spans<'_, ArticleRecord> {
        match membership {
            Membership::All => Spans(vec![self.articles.as_slice()]),
            Membership::Venues(ids) => Spans(
                ids.iter()
                    .filter_map(|id| self.spans.get(id))
                    .map(|r| &self.articles[r.clone()])
                    .collect(),
            ),
        }
    }
}

struct MetricsWorker<'a> {
    snapshot: PathBuf,
    venues: PathBuf,
    years: YearSpan,
    periods: &'a [Period],
    stream: StreamProcessor,
}

impl<'a> Worker for MetricsWorker<'a> {
    type In = EntityKey;
    type Out = EntityMetrics;
    type State = LoadedTables;

    fn init(&self) -> io::Result<LoadedTables> {
        let articles = read_bin_rows(&self.snapshot)?;
        let venues = VenueIndex::new(load_venues(&self.venues, &self.stream)?);
        Ok(LoadedTables::new(articles, venues))
    }

    fn proc(&self, state: &LoadedTables, key: EntityKey) -> Option<EntityMetrics> {
        let computer =
            EntityMetricsComputer::new(&state.venues, self.years, self.periods, self.stream);
        let mut source = state.source(&computer.membership(&key));
        match computer.compute(&key, &mut source) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(entity = %key, error = %e, "entity failed, left for the next run");
                None
            }
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LevelReport {
    pub level: EntityKind,
    pub total: usize,
    pub cached: usize,
    pub computed: usize,
    pub failed: usize,
    pub secs: f64,
}

#[derive(Serialize, Debug, Clone)]
pub struct RunReport {
    pub start_year: u16,
    pub end_year: u16,
    pub articles: u64,
    pub skipped_rows: usize,
    pub workers: usize,
    pub forced: bool,
    pub levels: Vec<LevelReport>,
    pub secs: f64,
}

struct Prepared {
    snapshot: SnapshotMeta,
    venues: VenueIndex,
    years: YearSpan,
    periods: Vec<Period>,
}

/// The level tables as they stand during a run.
struct LevelTables {
    names: Vec<String>,
    rows: Vec<Vec<MetricsRecord>>,
}

impl LevelTables {
    /// Table 0 is annual, then one per period in `periods` order.
    fn names(level: EntityKind, periods: &[Period]) -> Vec<String> {
        let mut names = vec![annual_table(level)];
        names.extend(periods.iter().map(|p| period_table(level, &p.name)));
        names
    }

    fn absorb(&mut self, results: Vec<EntityMetrics>) {
        let mut fresh: Vec<Vec<MetricsRecord>> = vec![Vec::new(); self.names.len()];
        for m in results {
            fresh[0].extend(m.annual);
            for (i, (_, row)) in m.periods.into_iter().enumerate() {
                fresh[i + 1].push(row);
            }
        }
        for (table, new_rows) in self.rows.iter_mut().zip(fresh) {
            let mut merged = merge(std::mem::take(table), new_rows);
            merged.sort_by(|a, b| {
                (&a.entity_id, a.year, &a.period).cmp(&(&b.entity_id, b.year, &b.period))
            });
            *table = merged;
        }
    }

    fn persist(&self, stowage: &Stowage) -> io::Result<()> {
        let store = stowage.store();
        for (name, rows) in self.names.iter().zip(self.rows.iter()) {
            store.write(name, rows)?;
        }
        Ok(())
    }
}

pub struct ParallelOrchestrator<'a> {
    stowage: &'a Stowage,
    config: &'a RunConfig,
    stream: StreamProcessor,
}

impl<'a> ParallelOrchestrator<'a> {
    pub fn new(stowage: &'a Stowage, config: &'a RunConfig) -> Self {
        Self {
            stowage,
            config,
            stream: StreamProcessor::new(config.batch_size),
        }
    }

    pub fn run(&self, levels: &[EntityKind], force: bool) -> Result<RunReport> {
        let start = Instant::now();
        self.stowage.require_inputs()?;
        let prepared = self.prepare()?;
        let mut report = RunReport {
            start_year: prepared.years.start,
            end_year: prepared.years.end,
            articles: prepared.snapshot.rows,
            skipped_rows: prepared.snapshot.skipped,
            workers: self.config.n_workers(),
            forced: force,
            levels: Vec::new(),
            secs: 0.0,
        };
        for level in levels {
            let lrep = self.run_level(*level, &prepared, force)?;
            info!(
                level = %lrep.level,
                computed = lrep.computed,
                cached = lrep.cached,
                failed = lrep.failed,
                secs = lrep.secs,
                "level done"
            );
            report.levels.push(lrep);
        }
        report.secs = start.elapsed().as_secs_f64();
        write_gz_bytes(&self.stowage.report_path(), &serde_json::to_vec_pretty(&report)?)?;
        info!(secs = report.secs, "metrics run finished");
        Ok(report)
    }

    fn prepare(&self) -> Result<Prepared> {
        let snapshot = prepare_snapshot(self.stowage, &self.stream)?;
        if snapshot.rows == 0 {
            return Err(Error::EmptyArticles(self.stowage.articles_path()));
        }
        let venues = VenueIndex::new(load_venues(&self.stowage.venues_path(), &self.stream)?);
        if venues.is_empty() {
            warn!(path = %self.stowage.venues_path().display(), "venue table has no rows");
        }
        let (lo, hi) = match (snapshot.min_year, snapshot.max_year) {
            (Some(lo), Some(hi)) => (lo, hi),
            _ => return Err(Error::EmptyArticles(self.stowage.articles_path())),
        };
        let years = YearSpan::new(
            self.config.start_year.unwrap_or(lo),
            self.config.end_year.unwrap_or(hi),
        );
        if years.is_empty() {
            return Err(Error::Config(format!(
                "empty year span {}-{}",
                years.start, years.end
            )));
        }
        let periods: Vec<Period> = self.config.periods.iter().map(|p| p.resolve(&years)).collect();
        info!(
            start = years.start,
            end = years.end,
            venues = venues.len(),
            periods = ?periods.iter().map(Period::label).collect::<Vec<_>>(),
            "inputs prepared"
        );
        Ok(Prepared {
            snapshot,
            venues,
            years,
            periods,
        })
    }

    fn entities(&self, level: EntityKind, venues: &VenueIndex) -> Vec<EntityKey> {
        match level {
            EntityKind::Venue => venues.venue_ids().iter().map(|id| EntityKey::venue(id)).collect(),
            EntityKind::Country => venues.countries().iter().map(|c| EntityKey::country(c)).collect(),
            EntityKind::Region => vec![EntityKey::region(&self.config.region_id)],
        }
    }

    fn run_level(&self, level: EntityKind, prepared: &Prepared, force: bool) -> Result<LevelReport> {
        let start = Instant::now();
        let all = self.entities(level, &prepared.venues);
        let names = LevelTables::names(level, &prepared.periods);
        let store = self.stowage.store();
        let existing: Vec<Option<Vec<MetricsRecord>>> = if force {
            vec![None; names.len()]
        } else {
            names.iter().map(|n| store.read(n)).collect()
        };
        let views: Vec<Option<&[MetricsRecord]>> = existing.iter().map(|t| t.as_deref()).collect();
        let pending = pending_any(&all, &views, force);
        let mut tables = LevelTables {
            names,
            rows: existing.into_iter().map(Option::unwrap_or_default).collect(),
        };
        let mut lrep = LevelReport {
            level,
            total: all.len(),
            cached: all.len() - pending.len(),
            computed: 0,
            failed: 0,
            secs: 0.0,
        };
        if all.is_empty() {
            warn!(level = %level, "no entities for level, venue table has none");
            lrep.secs = start.elapsed().as_secs_f64();
            return Ok(lrep);
        }
        if pending.is_empty() {
            info!(level = %level, total = all.len(), "every entity cached, nothing to compute");
            lrep.secs = start.elapsed().as_secs_f64();
            return Ok(lrep);
        }
        info!(level = %level, pending = pending.len(), cached = lrep.cached, "computing level");

        match level {
            EntityKind::Region => {
                let computer = EntityMetricsComputer::new(
                    &prepared.venues,
                    prepared.years,
                    &prepared.periods,
                    self.stream,
                );
                let mut results = Vec::new();
                for key in &pending {
                    let mut source = CsvSource::<ArticleRecord>::new(&self.stowage.articles_path());
                    match computer.compute(key, &mut source) {
                        Ok(m) => results.push(m),
                        Err(e) => warn!(entity = %key, error = %e, "entity failed, left for the next run"),
                    }
                }
                lrep.computed = results.len();
                tables.absorb(results);
                tables.persist(self.stowage)?;
            }
            EntityKind::Country | EntityKind::Venue => {
                let pool = self.pool(level);
                self.log_memory_estimate(pool.n_threads());
                let worker = MetricsWorker {
                    snapshot: self.stowage.snapshot_path(),
                    venues: self.stowage.venues_path(),
                    years: prepared.years,
                    periods: &prepared.periods,
                    stream: self.stream,
                };
                let mut computed = 0;
                pool.run(&worker, pending.clone(), |rep: &ChunkReport, outs| {
                    if rep.outputs < rep.inputs {
                        warn!(failed = rep.inputs - rep.outputs, chunk = rep.index + 1, "entities failed in chunk");
                    }
                    computed += outs.len();
                    tables.absorb(outs);
                    tables.persist(self.stowage)
                })?;
                lrep.computed = computed;
            }
        }
        lrep.failed = pending.len() - lrep.computed;
        lrep.secs = start.elapsed().as_secs_f64();
        Ok(lrep)
    }

    fn pool(&self, level: EntityKind) -> ChunkedPool {
        let n = self.config.n_workers();
        match level {
            EntityKind::Venue => ChunkedPool::new(n, self.config.venue_chunks)
                .with_min_chunk(self.config.venue_min_chunk),
            _ => ChunkedPool::new(n, self.config.country_chunks),
        }
    }

    fn log_memory_estimate(&self, n_threads: usize) {
        let size = self
            .stowage
            .snapshot_path()
            .metadata()
            .map(|m| m.len())
            .unwrap_or(0);
        let mb = (size * (n_threads as u64 + 1)) as f64 / 1e6;
        info!(workers = n_threads, estimated_mb = mb, "starting worker pool");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::tests::article;

    #[test]
    fn spans_group_by_venue() {
        let articles = vec![
            article("a", "V2", 2020, None, None, (false, false), None),
            article("b", "V1", 2020, None, None, (false, false), None),
            article("c", "V2", 2021, None, None, (false, false), None),
            article("d", "V3", 2021, None, None, (false, false), None),
        ];
        let tables = LoadedTables::new(articles, VenueIndex::default());
        let src = tables.source(&Membership::Venues(vec!["V2".to_string(), "V9".to_string()]));
        assert_eq!(src.0.len(), 1);
        let ids: Vec<&str> = src.0[0].iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
        assert_eq!(tables.source(&Membership::All).0[0].len(), 4);
        assert!(tables.source(&Membership::Venues(vec![])).0.is_empty());
    }
}
