use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Article or venue table absent; nothing is computed.
    #[error("required input table missing: {0}")]
    InputMissing(PathBuf),

    #[error("article table has no usable rows: {0}")]
    EmptyArticles(PathBuf),

    #[error("no annual metrics tables under {0}, run the metrics step first")]
    NoMetrics(PathBuf),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("report encoding error: {0}")]
    Json(#[from] serde_json::Error),
}
