mod cache;
mod common;
pub mod para;
mod stream;

pub use cache::{
    merge, normalize_field, pending, pending_any, schema_of, CacheRow, SchemaAlignment,
    TableStatus, TableStore,
};
pub use common::{
    get_gz_buf, gz_csv_reader, modified, older_than_any, read_bin_rows, read_gz_bytes,
    write_gz_bytes, write_gz_csv, BinRowWriter, GzCsvReader, CSV_GZ,
};
pub use para::{conservative_threads, para_run, ChunkReport, ChunkedPool, Worker};
pub use stream::{
    Accumulator, And, BatchSource, CsvSource, MatchAll, Predicate, ScanStats, Spans,
    StreamProcessor, DEFAULT_BATCH_SIZE,
};

//definitions
//table: gzipped csv with a header line, read by column name
//batch: a bounded run of rows handed to an accumulator at once
//cache row: unique per (entity, scope); entity is the unit of recomputation
