/// Errors raised by the evaluation pipeline itself (storage, prediction
/// and notification failures surface through their own crates' types).
///
/// # Examples
///
/// ```rust
/// use vigil_alert::error::EvalError;
///
/// let err = EvalError::UnknownProduct("widgets".to_string());
/// assert!(err.to_string().contains("widgets"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// The alert's stored product type does not match any known product.
    /// A configuration error: fatal for the alert's cycle, retried on the
    /// next tick.
    #[error("Eval: unknown product type: {0}")]
    UnknownProduct(String),
}
