//! Error types shared across transports.

use std::time::Duration;

use crate::Category;

/// Convenience alias used throughout clamgate for fallible operations
/// whose failures are reported rather than matched on.
pub type Result<T> = eyre::Result<T>;

/// Failure of one scan attempt, classified for transport mapping.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScanError {
    /// The daemon did not reply within the configured deadline. The reply
    /// is drained in the background; the scan itself may still finish.
    #[error("scan operation timed out after {:.0} seconds", .configured.as_secs_f64())]
    Timeout { configured: Duration },

    /// The daemon reached a verdict of ERROR, or the scan session failed
    /// mid-flight (connection drop, malformed reply).
    #[error("{description}")]
    Engine {
        description: String,
        elapsed_secs: f64,
    },

    /// The caller abandoned the request before a verdict arrived.
    #[error("request canceled by client")]
    Canceled,

    /// The daemon could not be reached at all.
    #[error("clamd unavailable: {0}")]
    Unavailable(String),

    /// The payload exceeds the configured size ceiling.
    #[error("File too large. Maximum size is {ceiling} bytes")]
    TooLarge { ceiling: u64 },
}

impl ScanError {
    #[must_use]
    pub const fn category(&self) -> Category {
        match self {
            Self::Timeout { .. } => Category::Timeout,
            Self::Engine { .. } => Category::EngineError,
            Self::Canceled => Category::Canceled,
            Self::Unavailable(_) | Self::TooLarge { .. } => Category::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_renders_whole_seconds() {
        let err = ScanError::Timeout {
            configured: Duration::from_secs(300),
        };
        assert_eq!(
            err.to_string(),
            "scan operation timed out after 300 seconds"
        );
    }

    #[test]
    fn engine_error_renders_bare_description() {
        let err = ScanError::Engine {
            description: "Can't allocate memory ERROR".to_string(),
            elapsed_secs: 0.5,
        };
        assert_eq!(err.to_string(), "Can't allocate memory ERROR");
    }

    #[test]
    fn too_large_names_the_ceiling() {
        let err = ScanError::TooLarge { ceiling: 209_715_200 };
        assert_eq!(
            err.to_string(),
            "File too large. Maximum size is 209715200 bytes"
        );
    }
}
