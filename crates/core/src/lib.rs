//! Shared types for the clamgate scan gateway: configuration, scan
//! outcomes, and the transport-neutral outcome classification.

pub mod config;
pub mod error;

pub use config::Config;
pub use error::{Result, ScanError};

/// Verdict of a completed daemon scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    Infected,
}

/// Outcome of one successful scan attempt. Daemon-reported engine errors
/// never appear here; they surface as [`ScanError::Engine`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    pub verdict: ScanVerdict,
    /// Signature name for infected payloads, empty for clean ones.
    pub description: String,
    /// Wall-clock seconds around the daemon round trip.
    pub elapsed_secs: f64,
}

impl ScanOutcome {
    /// Daemon-style status token carried on binary transport replies.
    #[must_use]
    pub const fn status_label(&self) -> &'static str {
        match self.verdict {
            ScanVerdict::Clean => "OK",
            ScanVerdict::Infected => "FOUND",
        }
    }

    #[must_use]
    pub const fn category(&self) -> Category {
        match self.verdict {
            ScanVerdict::Clean => Category::Ok,
            ScanVerdict::Infected => Category::Found,
        }
    }
}

/// Discrete status category used for metrics labels and response payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Ok,
    Found,
    Timeout,
    EngineError,
    Canceled,
    Error,
}

impl Category {
    /// Label string used in metrics and textual-transport payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Found => "found",
            Self::Timeout => "timeout",
            Self::EngineError => "engine_error",
            Self::Canceled => "canceled",
            Self::Error => "error",
        }
    }
}

/// Total mapping from any scan attempt outcome to its category.
#[must_use]
pub fn classify(outcome: &std::result::Result<ScanOutcome, ScanError>) -> Category {
    match outcome {
        Ok(result) => result.category(),
        Err(err) => err.category(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn clean() -> ScanOutcome {
        ScanOutcome {
            verdict: ScanVerdict::Clean,
            description: String::new(),
            elapsed_secs: 0.01,
        }
    }

    #[test]
    fn clean_outcome_is_ok() {
        assert_eq!(classify(&Ok(clean())), Category::Ok);
        assert_eq!(clean().status_label(), "OK");
    }

    #[test]
    fn infected_outcome_is_found() {
        let outcome = ScanOutcome {
            verdict: ScanVerdict::Infected,
            description: "Eicar-Test-Signature".to_string(),
            elapsed_secs: 0.02,
        };
        assert_eq!(classify(&Ok(outcome.clone())), Category::Found);
        assert_eq!(outcome.status_label(), "FOUND");
    }

    #[test]
    fn error_variants_map_to_distinct_categories() {
        let timeout = ScanError::Timeout {
            configured: Duration::from_secs(30),
        };
        let engine = ScanError::Engine {
            description: "broken".to_string(),
            elapsed_secs: 1.0,
        };
        assert_eq!(classify(&Err(timeout)), Category::Timeout);
        assert_eq!(classify(&Err(engine)), Category::EngineError);
        assert_eq!(classify(&Err(ScanError::Canceled)), Category::Canceled);
        assert_eq!(
            classify(&Err(ScanError::Unavailable("no socket".to_string()))),
            Category::Error
        );
        assert_eq!(
            classify(&Err(ScanError::TooLarge { ceiling: 100 })),
            Category::Error
        );
    }

    #[test]
    fn category_labels_are_stable() {
        for (category, label) in [
            (Category::Ok, "ok"),
            (Category::Found, "found"),
            (Category::Timeout, "timeout"),
            (Category::EngineError, "engine_error"),
            (Category::Canceled, "canceled"),
            (Category::Error, "error"),
        ] {
            assert_eq!(category.as_str(), label);
        }
    }
}
