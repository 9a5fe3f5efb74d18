use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures that abort a stage of the pipeline.
///
/// Transport and per-file parse problems are not represented here: they are
/// recovered locally and only show up as status codes and sentinel records.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Settings(#[from] config::ConfigError),
    #[error("catalog {path:?}: {source}")]
    Catalog {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("catalog row {row}: {reason}")]
    CatalogRow { row: u64, reason: String },
    #[error("unparsable result file name '{0}'")]
    ResultName(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("ledger write failed: {0}")]
    LedgerWrite(#[from] rust_xlsxwriter::XlsxError),
    #[error("ledger read failed: {0}")]
    LedgerRead(#[from] calamine::Error),
    #[error("manifest failure: {0}")]
    Manifest(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
