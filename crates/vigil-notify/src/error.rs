/// Errors from notification delivery.
///
/// # Examples
///
/// ```rust
/// use vigil_notify::error::NotifyError;
///
/// let err = NotifyError::Api { status: 503 };
/// assert!(err.to_string().contains("503"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Transport-level failure after all retries.
    #[error("Notify: request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status after all retries.
    #[error("Notify: endpoint returned {status}")]
    Api { status: u16 },

    /// The delivery queue is full; the job was dropped.
    #[error("Notify: queue full")]
    QueueFull,
}

pub type Result<T> = std::result::Result<T, NotifyError>;
