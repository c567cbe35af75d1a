/// Errors from the anomaly prediction client.
///
/// # Examples
///
/// ```rust
/// use vigil_predict::error::PredictError;
///
/// let err = PredictError::Disabled;
/// assert!(err.to_string().contains("disabled"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    /// Transport-level failure after all retries.
    #[error("Predict: request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status after all retries.
    #[error("Predict: service returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The response body did not match the expected shape.
    #[error("Predict: invalid response: {0}")]
    Json(#[from] serde_json::Error),

    /// No prediction service is configured for this deployment.
    #[error("Predict: anomaly prediction is disabled")]
    Disabled,
}

pub type Result<T> = std::result::Result<T, PredictError>;
