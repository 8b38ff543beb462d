use std::{
    hash::Hash,
    io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use csv::{StringRecord, Writer};
use hashbrown::HashSet;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::common::{gz_csv_reader, modified, older_than_any, write_gz_csv, CSV_GZ};

const MAX_LOGGED_DROPS: usize = 3;

/// A row of a keyed cache table: unique per `(entity, scope)`.
pub trait CacheRow {
    type Entity: Hash + Eq + Clone;
    type Scope: Hash + Eq;

    fn entity(&self) -> Self::Entity;
    fn scope(&self) -> Self::Scope;
}

/// Entities of `all` that need computing against one cached table.
pub fn pending<R: CacheRow>(all: &[R::Entity], cached: Option<&[R]>, force: bool) -> Vec<R::Entity> {
    pending_any(all, &[cached], force)
}

/// Entities missing from at least one of `tables`; all of them when forced
/// or when any table does not exist yet. Keeps the order of `all`.
pub fn pending_any<R: CacheRow>(
    all: &[R::Entity],
    tables: &[Option<&[R]>],
    force: bool,
) -> Vec<R::Entity> {
    if force || tables.iter().any(|t| t.is_none()) {
        return all.to_vec();
    }
    let present: Vec<HashSet<R::Entity>> = tables
        .iter()
        .flatten()
        .map(|rows| rows.iter().map(|r| r.entity()).collect())
        .collect();
    all.iter()
        .filter(|e| present.iter().any(|set| !set.contains(*e)))
        .cloned()
        .collect()
}

/// Appends `new_rows` to `existing`; on duplicate `(entity, scope)` keys the
/// later row wins and keeps its position among the survivors.
pub fn merge<R: CacheRow>(existing: Vec<R>, new_rows: Vec<R>) -> Vec<R> {
    let mut seen = HashSet::new();
    let mut out: Vec<R> = existing
        .into_iter()
        .chain(new_rows)
        .rev()
        .filter(|r| seen.insert((r.entity(), r.scope())))
        .collect();
    out.reverse();
    out
}

#[derive(Debug, Clone)]
pub struct TableStatus {
    pub name: String,
    pub path: PathBuf,
    pub modified: Option<SystemTime>,
    pub stale: bool,
}

impl TableStatus {
    pub fn exists(&self) -> bool {
        self.modified.is_some()
    }
}

/// One gzipped csv file per named table under a root directory.
pub struct TableStore {
    root: PathBuf,
}

impl TableStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", name, CSV_GZ))
    }

    /// Reads a table aligned to the current schema of `R`.
    ///
    /// Never fails: a missing or unreadable table is `None`, rows that do not
    /// fit the schema after alignment are dropped.
    pub fn read<R>(&self, name: &str) -> Option<Vec<R>>
    where
        R: DeserializeOwned + Serialize + Default,
    {
        let path = self.path(name);
        if !path.is_file() {
            return None;
        }
        match read_aligned(&path) {
            Ok(rows) => Some(rows),
            Err(e) => {
                warn!(table = name, error = %e, "cached table unreadable, treating as absent");
                None
            }
        }
    }

    pub fn write<R: Serialize>(&self, name: &str, rows: &[R]) -> io::Result<usize> {
        let n = write_gz_csv(&self.path(name), rows)?;
        debug!(table = name, rows = n, "table written");
        Ok(n)
    }

    pub fn status(&self, name: &str, inputs: &[&Path]) -> TableStatus {
        let path = self.path(name);
        TableStatus {
            name: name.to_string(),
            modified: modified(&path),
            stale: older_than_any(&path, inputs),
            path,
        }
    }
}

fn read_aligned<R>(path: &Path) -> io::Result<Vec<R>>
where
    R: DeserializeOwned + Serialize + Default,
{
    let target = schema_of::<R>()?;
    let mut rdr = gz_csv_reader(path)?;
    let source = rdr.headers()?.clone();
    let alignment = SchemaAlignment::new(&source, &target);
    if !alignment.is_identity() {
        warn!(
            path = %path.display(),
            missing = ?alignment.missing,
            dropped = ?alignment.dropped,
            "cached table schema differs, aligning"
        );
    }
    let mut out = Vec::new();
    let mut dropped = 0;
    for rec in rdr.records() {
        let rec = rec?;
        let aligned = alignment.align(&rec);
        match aligned.deserialize::<R>(Some(&target)) {
            Ok(row) => out.push(row),
            Err(e) => {
                if dropped < MAX_LOGGED_DROPS {
                    warn!(path = %path.display(), error = %e, "dropping row that does not fit schema");
                }
                dropped += 1;
            }
        }
    }
    if dropped > 0 {
        warn!(path = %path.display(), dropped, kept = out.len(), "rows dropped while aligning");
    }
    Ok(out)
}

/// Header line `R` serializes to.
pub fn schema_of<R: Serialize + Default>() -> io::Result<StringRecord> {
    let mut w = Writer::from_writer(vec![]);
    w.serialize(R::default())?;
    let data = w.into_inner().map_err(|e| e.into_error())?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(data.as_slice());
    match rdr.records().next() {
        Some(rec) => Ok(rec?),
        None => Err(io::Error::new(io::ErrorKind::InvalidData, "empty schema")),
    }
}

/// Maps records of an on-disk header onto a target header by column name.
#[derive(Debug)]
pub struct SchemaAlignment {
    positions: Vec<Option<usize>>,
    pub missing: Vec<String>,
    pub dropped: Vec<String>,
}

impl SchemaAlignment {
    pub fn new(source: &StringRecord, target: &StringRecord) -> Self {
        let positions: Vec<Option<usize>> = target
            .iter()
            .map(|col| source.iter().position(|s| s == col))
            .collect();
        let missing = target
            .iter()
            .zip(positions.iter())
            .filter(|(_, p)| p.is_none())
            .map(|(c, _)| c.to_string())
            .collect();
        let dropped = source
            .iter()
            .filter(|s| !target.iter().any(|t| t == *s))
            .map(|s| s.to_string())
            .collect();
        Self {
            positions,
            missing,
            dropped,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.missing.is_empty()
            && self.dropped.is_empty()
            && self
                .positions
                .iter()
                .enumerate()
                .all(|(i, p)| *p == Some(i))
    }

    pub fn align(&self, rec: &StringRecord) -> StringRecord {
        self.positions
            .iter()
            .map(|p| match p {
                Some(i) => normalize_field(rec.get(*i).unwrap_or("")),
                None => "",
            })
            .collect()
    }
}

/// Brings common foreign spellings of booleans and nulls to one form.
pub fn normalize_field(v: &str) -> &str {
    match v.trim() {
        "True" | "TRUE" => "true",
        "False" | "FALSE" => "false",
        "None" | "null" | "NULL" | "<NA>" => "",
        t => t,
    }
}
