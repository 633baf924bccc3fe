use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid group key: {0:?}")]
    InvalidGroupKey(String),

    #[error("invalid item id: {0:?}")]
    InvalidItemId(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no input table configured (use --input or set input.path)")]
    #[diagnostic(help("point --input at a .xlsx, .csv, .tsv or .json table of group/run ids"))]
    MissingInput,

    #[error("failed to read input table {path}: {message}")]
    InputRead { path: PathBuf, message: String },

    #[error("malformed input table: {0}")]
    InputFormat(String),

    #[error("input table has no column named {0:?}")]
    MissingColumn(String),

    #[error("input workbook has no sheet named {0:?}")]
    MissingSheet(String),

    #[error("GMrepo request failed: {0}")]
    ApiHttp(String),

    #[error("GMrepo returned status {status}: {message}")]
    ApiStatus { status: u16, message: String },

    #[error("unexpected GMrepo payload: {0}")]
    ApiPayload(String),

    #[error("webdriver request failed: {0}")]
    WebDriver(String),

    #[error("webdriver returned status {status}: {message}")]
    WebDriverStatus { status: u16, message: String },

    #[error("timed out waiting for {0}")]
    DownloadTimeout(String),

    #[error("invalid abundance table: {0}")]
    InvalidTable(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl HarvestError {
    /// Errors raised while building the group index. These abort a run
    /// before anything is dispatched.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            HarvestError::MissingInput
                | HarvestError::InputRead { .. }
                | HarvestError::InputFormat(_)
                | HarvestError::MissingColumn(_)
                | HarvestError::MissingSheet(_)
                | HarvestError::InvalidGroupKey(_)
                | HarvestError::InvalidItemId(_)
        )
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            HarvestError::ConfigRead(_)
                | HarvestError::ConfigParse(_)
                | HarvestError::InvalidConfig(_)
        )
    }

    pub fn is_persistence_error(&self) -> bool {
        matches!(self, HarvestError::Ledger(_) | HarvestError::Filesystem(_))
    }
}
