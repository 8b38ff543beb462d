use std::{
    fs::{create_dir_all, rename, File},
    io::{self, BufReader, BufWriter, Read, Write},
    marker::PhantomData,
    path::{Path, PathBuf},
    time::SystemTime,
};

use csv::{Reader, ReaderBuilder, Writer};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{de::DeserializeOwned, Serialize};

pub type GzBuf = BufReader<GzDecoder<File>>;
pub type GzCsvReader = Reader<GzBuf>;

pub const CSV_GZ: &str = "csv.gz";

pub fn get_gz_buf(path: &Path) -> io::Result<GzBuf> {
    let file = File::open(path)?;
    Ok(BufReader::new(GzDecoder::new(file)))
}

pub fn gz_csv_reader(path: &Path) -> io::Result<GzCsvReader> {
    Ok(ReaderBuilder::new()
        .flexible(true)
        .from_reader(get_gz_buf(path)?))
}

/// Writes all rows as a gzipped csv with a header line.
///
/// The data lands in a sibling temp file first and is renamed over `path`
/// once complete, so readers never see a partially written table.
pub fn write_gz_csv<'a, T, I>(path: &Path, rows: I) -> io::Result<usize>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    let encoder = GzEncoder::new(BufWriter::new(File::create(&tmp)?), Compression::default());
    let mut writer = Writer::from_writer(encoder);
    let mut n = 0;
    for row in rows {
        writer.serialize(row)?;
        n += 1;
    }
    let encoder = writer.into_inner().map_err(|e| e.into_error())?;
    encoder.finish()?.flush()?;
    rename(&tmp, path)?;
    Ok(n)
}

pub fn write_gz_bytes(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(&tmp)?), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()?.flush()?;
    rename(&tmp, path)
}

pub fn read_gz_bytes(path: &Path) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    get_gz_buf(path)?.read_to_end(&mut out)?;
    Ok(out)
}

pub fn modified(path: &Path) -> Option<SystemTime> {
    path.metadata().and_then(|m| m.modified()).ok()
}

/// True when `target` is missing or older than any existing source.
pub fn older_than_any(target: &Path, sources: &[&Path]) -> bool {
    match modified(target) {
        None => true,
        Some(t) => sources
            .iter()
            .filter_map(|s| modified(s))
            .any(|s_time| s_time > t),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn bin_err(e: bincode::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// Row-by-row bincode writer: a row count header, then one record after
/// another, so neither side needs the full table as a single value.
pub struct BinRowWriter<T> {
    path: PathBuf,
    tmp: PathBuf,
    inner: BufWriter<File>,
    count: u64,
    pt: PhantomData<T>,
}

impl<T: Serialize> BinRowWriter<T> {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        let tmp = tmp_path(path);
        let mut inner = BufWriter::new(File::create(&tmp)?);
        // placeholder, patched in finish
        inner.write_all(&0u64.to_le_bytes())?;
        Ok(Self {
            path: path.to_path_buf(),
            tmp,
            inner,
            count: 0,
            pt: PhantomData,
        })
    }

    pub fn push(&mut self, row: &T) -> io::Result<()> {
        bincode::serialize_into(&mut self.inner, row).map_err(bin_err)?;
        self.count += 1;
        Ok(())
    }

    pub fn finish(self) -> io::Result<u64> {
        use std::io::{Seek, SeekFrom};
        let mut file = self.inner.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&self.count.to_le_bytes())?;
        file.sync_all()?;
        rename(&self.tmp, &self.path)?;
        Ok(self.count)
    }
}

pub fn read_bin_rows<T: DeserializeOwned>(path: &Path) -> io::Result<Vec<T>> {
    let mut br = BufReader::new(File::open(path)?);
    let mut count_buf = [0u8; 8];
    br.read_exact(&mut count_buf)?;
    let count = u64::from_le_bytes(count_buf) as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(bincode::deserialize_from(&mut br).map_err(bin_err)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Row {
        id: String,
        v: f64,
    }

    #[test]
    fn bin_rows_keep_order() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("rows.bin");
        let mut w = BinRowWriter::create(&p).unwrap();
        for i in 0..5 {
            w.push(&Row {
                id: format!("r{}", i),
                v: i as f64 / 2.0,
            })
            .unwrap();
        }
        assert_eq!(w.finish().unwrap(), 5);
        let rows: Vec<Row> = read_bin_rows(&p).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[3].id, "r3");
        assert!(!tmp_path(&p).exists());
    }

    #[test]
    fn staleness() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.csv.gz");
        let source = dir.path().join("in.csv.gz");
        write_gz_bytes(&source, b"a\n1\n").unwrap();
        assert!(older_than_any(&target, &[&source]));
        std::thread::sleep(std::time::Duration::from_millis(20));
        write_gz_csv::<Row, _>(&target, &[]).unwrap();
        assert!(!older_than_any(&target, &[&source]));
    }
}
