/// Errors that can occur within the store layer.
///
/// The trait methods in the crate root return `anyhow::Result` (matching
/// the other component boundaries); this type classifies the failures the
/// engine cares about, in particular [`StoreError::MalformedFilter`], which
/// the evaluator treats as a per-cycle configuration error.
///
/// # Examples
///
/// ```rust
/// use vigil_store::error::StoreError;
///
/// let err = StoreError::MalformedFilter("status".to_string());
/// assert!(err.to_string().contains("status"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A filter query token is not a `key=value` or `key!=value` pair.
    #[error("Store: malformed filter token '{0}'")]
    MalformedFilter(String),

    /// A required partition database was not found on disk.
    #[error("Store: partition {0} not found")]
    PartitionNotFound(String),

    /// An underlying SQLite error.
    #[error("Store: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Serialization failure on a JSON column (labels, partial states).
    #[error("Store: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored column value could not be parsed back into its domain type.
    #[error("Store: invalid value in column '{column}': {value}")]
    InvalidColumn { column: &'static str, value: String },

    /// Generic store error for cases not covered by other variants.
    #[error("Store: {0}")]
    Other(String),
}

/// Convenience `Result` alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
