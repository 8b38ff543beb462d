use std::{
    io,
    marker::PhantomData,
    path::{Path, PathBuf},
};

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::common::gz_csv_reader;

pub const DEFAULT_BATCH_SIZE: usize = 50_000;
const MAX_LOGGED_SKIPS: usize = 5;

pub trait Predicate<T> {
    fn test(&self, row: &T) -> bool;
}

impl<T, F> Predicate<T> for F
where
    F: Fn(&T) -> bool,
{
    fn test(&self, row: &T) -> bool {
        self(row)
    }
}

pub struct MatchAll;

impl<T> Predicate<T> for MatchAll {
    fn test(&self, _row: &T) -> bool {
        true
    }
}

pub struct And<A, B>(pub A, pub B);

impl<T, A, B> Predicate<T> for And<A, B>
where
    A: Predicate<T>,
    B: Predicate<T>,
{
    fn test(&self, row: &T) -> bool {
        self.0.test(row) && self.1.test(row)
    }
}

/// Folds the matching rows of one batch into running state.
pub trait Accumulator<T> {
    fn add(&mut self, batch: &[&T]);
}

impl<T: Clone> Accumulator<T> for Vec<T> {
    fn add(&mut self, batch: &[&T]) {
        self.extend(batch.iter().map(|r| (*r).clone()));
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub batches: usize,
    pub rows_read: usize,
    pub rows_matched: usize,
    pub rows_skipped: usize,
}

pub trait BatchSource<T> {
    fn for_each_batch(
        &mut self,
        batch_size: usize,
        stats: &mut ScanStats,
        f: &mut dyn FnMut(&[T]),
    ) -> io::Result<()>;
}

impl<'a, T> BatchSource<T> for &'a [T] {
    fn for_each_batch(
        &mut self,
        batch_size: usize,
        stats: &mut ScanStats,
        f: &mut dyn FnMut(&[T]),
    ) -> io::Result<()> {
        for batch in self.chunks(batch_size) {
            stats.batches += 1;
            stats.rows_read += batch.len();
            f(batch);
        }
        Ok(())
    }
}

/// Several disjoint in-memory slices read as one table.
pub struct Spans<'a, T>(pub Vec<&'a [T]>);

impl<'a, T> BatchSource<T> for Spans<'a, T> {
    fn for_each_batch(
        &mut self,
        batch_size: usize,
        stats: &mut ScanStats,
        f: &mut dyn FnMut(&[T]),
    ) -> io::Result<()> {
        for mut span in self.0.iter().copied() {
            span.for_each_batch(batch_size, stats, f)?;
        }
        Ok(())
    }
}

/// Streams a gzipped csv table, holding at most one batch of rows.
///
/// Rows that fail to deserialize are skipped and counted. A read error of
/// the underlying stream ends the scan with what was read so far.
pub struct CsvSource<T> {
    path: PathBuf,
    pt: PhantomData<T>,
}

impl<T> CsvSource<T> {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            pt: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> BatchSource<T> for CsvSource<T> {
    fn for_each_batch(
        &mut self,
        batch_size: usize,
        stats: &mut ScanStats,
        f: &mut dyn FnMut(&[T]),
    ) -> io::Result<()> {
        let mut rdr = gz_csv_reader(&self.path)?;
        let mut buf: Vec<T> = Vec::with_capacity(batch_size);
        for line in rdr.deserialize::<T>() {
            match line {
                Ok(row) => buf.push(row),
                Err(e) if e.is_io_error() => {
                    warn!(path = %self.path.display(), error = %e, "stream broken, scan truncated");
                    break;
                }
                Err(e) => {
                    if stats.rows_skipped < MAX_LOGGED_SKIPS {
                        warn!(path = %self.path.display(), error = %e, "skipping malformed row");
                    }
                    stats.rows_skipped += 1;
                }
            }
            if buf.len() == batch_size {
                stats.batches += 1;
                stats.rows_read += buf.len();
                f(&buf);
                buf.clear();
            }
        }
        if !buf.is_empty() {
            stats.batches += 1;
            stats.rows_read += buf.len();
            f(&buf);
        }
        if stats.rows_skipped > MAX_LOGGED_SKIPS {
            warn!(
                path = %self.path.display(),
                skipped = stats.rows_skipped,
                "malformed rows skipped in total"
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StreamProcessor {
    batch_size: usize,
}

impl Default for StreamProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl StreamProcessor {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn scan<T, S, P, A>(
        &self,
        source: &mut S,
        predicate: &P,
        accumulator: &mut A,
    ) -> io::Result<ScanStats>
    where
        S: BatchSource<T> + ?Sized,
        P: Predicate<T> + ?Sized,
        A: Accumulator<T> + ?Sized,
    {
        let mut stats = ScanStats::default();
        let mut matched = 0;
        source.for_each_batch(self.batch_size, &mut stats, &mut |batch: &[T]| {
            let hits: Vec<&T> = batch.iter().filter(|r| predicate.test(r)).collect();
            matched += hits.len();
            accumulator.add(&hits);
        })?;
        stats.rows_matched = matched;
        Ok(stats)
    }
}
