use thiserror::Error;

use crate::store::StoreFailure;

/// Canonical error type for drill setup and orchestration.
///
/// Per-operation store failures that happen inside a running drill are never
/// surfaced through this type; they are recorded as outcomes instead. This
/// type covers everything that aborts a run.
#[derive(Debug, Error)]
pub enum DrillError {
    /// Configuration failed to load or did not pass validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A setup stage (client construction, provisioning, seeding) failed.
    #[error("setup failed during {stage}: {message}")]
    Setup {
        /// Setup stage name (e.g. `"connect"`).
        stage: &'static str,
        /// Human-readable failure details.
        message: String,
    },

    /// The store rejected a request issued outside the operation loops.
    #[error(transparent)]
    Store(#[from] StoreFailure),

    /// Worker scheduling failed in a way the engine cannot recover from.
    #[error("scheduling error: {0}")]
    Scheduling(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error occurred.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl DrillError {
    /// Creates a `Setup` variant.
    #[must_use]
    pub fn setup(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Setup {
            stage,
            message: message.into(),
        }
    }

    /// Creates an `InvalidConfig` variant.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Returns true when the error came from the store itself.
    #[must_use]
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

impl From<config::ConfigError> for DrillError {
    fn from(err: config::ConfigError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

impl From<serde_json::Error> for DrillError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Convenient result alias for drill operations.
pub type DrillResult<T> = Result<T, DrillError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::status;

    #[test]
    fn test_setup_error_display() {
        let err = DrillError::setup("connect", "endpoint unreachable");
        assert_eq!(
            err.to_string(),
            "setup failed during connect: endpoint unreachable"
        );
    }

    #[test]
    fn test_store_failure_converts() {
        let failure = StoreFailure::new(status::SERVICE_UNAVAILABLE, 0, "partition offline");
        let err: DrillError = failure.into();
        assert!(err.is_store_failure());
        assert!(err.to_string().contains("503"));
    }
}
