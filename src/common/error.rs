//! Error types for kino_replanner

use thiserror::Error;

/// Main error type for the local replanner
#[derive(Debug, Error)]
pub enum PlannerError {
    /// No occupancy volume has been received yet
    #[error("Map not ready: no occupancy volume received yet")]
    MapNotReady,
    /// Search exhausted without reaching the goal or the window edge
    #[error("No path found: {0}")]
    NoPathFound(String),
    /// Numerically invalid state (NaN or out of bounds)
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// Repeated window-limited segments never converged to the goal
    #[error("Goal unreachable in window after {0} segments")]
    GoalUnreachableInWindow(usize),
    /// Allocation failure or oversized request while building the distance field
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// Configuration could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
    /// Occupancy snapshot could not be decoded
    #[error("Snapshot error: {0}")]
    Snapshot(String),
    /// Shutdown was requested while an episode was running
    #[error("Shutdown requested")]
    Shutdown,
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlannerError {
    /// Whether the planning loop can carry on after this error.
    ///
    /// Deferrals and search failures are retried; everything else ends the
    /// episode and is reported upstream.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PlannerError::MapNotReady | PlannerError::NoPathFound(_) | PlannerError::InvalidState(_)
        )
    }
}

impl From<serde_json::Error> for PlannerError {
    fn from(e: serde_json::Error) -> Self {
        PlannerError::Snapshot(e.to_string())
    }
}

/// Result type alias for planner operations
pub type PlannerResult<T> = Result<T, PlannerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlannerError::NoPathFound("open set exhausted".to_string());
        assert_eq!(format!("{}", err), "No path found: open set exhausted");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PlannerError = io_err.into();
        assert!(matches!(err, PlannerError::Io(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_recoverable_split() {
        assert!(PlannerError::MapNotReady.is_recoverable());
        assert!(PlannerError::InvalidState("nan".into()).is_recoverable());
        assert!(!PlannerError::ResourceExhausted("oom".into()).is_recoverable());
        assert!(!PlannerError::Shutdown.is_recoverable());
    }
}
