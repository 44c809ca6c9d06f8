use thiserror::Error;

#[derive(Error, Debug)]
pub enum CardbookError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Column mapping already exists: {0}")]
    DuplicateMapping(String),

    #[error("Invalid matcher pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Row {row}: cannot parse date {value:?} with format {format:?}")]
    DateParse {
        row: usize,
        value: String,
        format: String,
    },

    #[error("Row {row}: cannot parse amount {value:?}")]
    AmountParse { row: usize, value: String },

    #[error("Batch {0} is not ready to commit")]
    NotReady(String),

    #[error("Unmatched description in batch {batch}: {description:?}")]
    UnresolvedDescription { batch: String, description: String },

    #[error("Payments account required when payments are included")]
    MissingPaymentsAccount,

    #[error("Batch {0} was already committed to the ledger")]
    AlreadyCommitted(String),

    #[error("Account already exists: {0}")]
    DuplicatePath(String),

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("No ledger account at path: {0}")]
    AccountNotFound(String),

    #[error("No imported batch for path: {0}")]
    UnknownBatch(String),

    #[error("Posting legs do not sum to zero: {0}")]
    UnbalancedPosting(String),
}

pub type Result<T> = std::result::Result<T, CardbookError>;
