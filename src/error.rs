use std::fmt;
use std::time::Duration;

/// Main error type for the Martinet dispatch queue
#[derive(Debug)]
pub enum DispatchError {
    /// The task was discarded by `clear_queue` before its operation ran
    Cancelled,

    /// A bounded queue was at capacity under the `Reject` overflow policy
    QueueFull,

    /// The operation exceeded the configured per-operation timeout
    TimedOut(Duration),

    /// The wrapped send-operation itself failed
    Operation(anyhow::Error),

    /// The dispatcher was dropped while this ticket was still pending
    Disconnected,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Cancelled => write!(f, "Dispatch cancelled: queue cleared"),
            DispatchError::QueueFull => write!(f, "Dispatch rejected: queue at capacity"),
            DispatchError::TimedOut(limit) => {
                write!(f, "Dispatch timed out after {}ms", limit.as_millis())
            }
            DispatchError::Operation(err) => write!(f, "Operation error: {}", err),
            DispatchError::Disconnected => write!(f, "Dispatcher dropped before settlement"),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::Operation(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl DispatchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DispatchError::Cancelled)
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            DispatchError::Cancelled => "cancelled",
            DispatchError::QueueFull => "queue_full",
            DispatchError::TimedOut(_) => "timed_out",
            DispatchError::Operation(_) => "operation_error",
            DispatchError::Disconnected => "disconnected",
        }
    }
}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, DispatchError>;

impl From<anyhow::Error> for DispatchError {
    fn from(err: anyhow::Error) -> Self {
        DispatchError::Operation(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            DispatchError::Cancelled.to_string(),
            "Dispatch cancelled: queue cleared"
        );
        assert_eq!(
            DispatchError::TimedOut(Duration::from_millis(250)).to_string(),
            "Dispatch timed out after 250ms"
        );

        let op_err = DispatchError::Operation(anyhow::anyhow!("chat not found"));
        assert!(op_err.to_string().contains("chat not found"));
    }

    #[test]
    fn test_error_conversion() {
        let err: DispatchError = anyhow::anyhow!("blocked by user").into();
        assert!(matches!(err, DispatchError::Operation(_)));
        assert_eq!(err.error_type(), "operation_error");
    }

    #[test]
    fn test_cancellation_is_distinguishable() {
        let cancelled = DispatchError::Cancelled;
        let failed = DispatchError::Operation(anyhow::anyhow!("boom"));
        assert!(cancelled.is_cancelled());
        assert!(!failed.is_cancelled());
    }

    #[test]
    fn test_operation_error_source() {
        use std::error::Error;
        let err = DispatchError::Operation(anyhow::anyhow!("rate limited upstream"));
        assert!(err.source().is_some());
        assert!(DispatchError::QueueFull.source().is_none());
    }
}
