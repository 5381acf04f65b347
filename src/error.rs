//! Error types for popgrid.

use crate::service::BuildKey;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PopGridError>;

/// Errors that fail an operation as a whole.
///
/// Per-line parse failures are not represented here; they are recovered
/// inside the scan and reported as [`RecordError`].
#[derive(Debug, Error)]
pub enum PopGridError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dataset contains no valid records")]
    EmptyDataset,

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Population total overflowed in cell (col {col}, row {row})")]
    PopulationOverflow { col: usize, row: usize },

    #[error("Build of {key} failed: {source}")]
    BuildFailed {
        key: BuildKey,
        #[source]
        source: Box<PopGridError>,
    },
}

impl PopGridError {
    /// The error that actually caused a failed build.
    pub fn root(&self) -> &PopGridError {
        match self {
            PopGridError::BuildFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for PopGridError {
    fn from(err: serde_json::Error) -> Self {
        PopGridError::Config(err.to_string())
    }
}

#[cfg(feature = "toml")]
impl From<toml::de::Error> for PopGridError {
    fn from(err: toml::de::Error) -> Self {
        PopGridError::Config(err.to_string())
    }
}

/// Why a single dataset line was skipped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("expected at least {expected} fields, found {found}")]
    TooFewFields { expected: usize, found: usize },

    #[error("field {field} is not a valid number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("population is negative: {0}")]
    NegativePopulation(i64),

    #[error("{0}")]
    OutOfRange(String),
}
