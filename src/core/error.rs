//! Error types for the aggregation engine.
//!
//! Only `InvalidConfiguration` is fatal, and only at construction time.
//! Everything else degrades to stale-but-available data or is returned to
//! the single caller that triggered it.

use std::time::Duration;

use thiserror::Error;

use super::alerts::model::AlertId;
use super::model::Category;

/// Failure of a single signal source pull.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Http(String),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SourceError::Decode(err.to_string())
        } else {
            SourceError::Http(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("{category} source unavailable: {reason}")]
    SourceUnavailable { category: Category, reason: SourceError },

    #[error("cycle failed: {0}")]
    CycleFailure(String),

    #[error("alert {0} not found")]
    NotFound(AlertId),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MonitorError {
    /// Fatal errors stop construction; everything else is recoverable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MonitorError::InvalidConfiguration(_))
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_configuration_errors_are_fatal() {
        assert!(MonitorError::InvalidConfiguration("weights".into()).is_fatal());
        assert!(!MonitorError::NotFound(AlertId(7)).is_fatal());
        assert!(!MonitorError::CycleFailure("boom".into()).is_fatal());
    }

    #[test]
    fn test_source_unavailable_message_names_category() {
        let err = MonitorError::SourceUnavailable {
            category: Category::Seismic,
            reason: SourceError::Timeout(Duration::from_secs(10)),
        };
        let msg = err.to_string();
        assert!(msg.contains("Seismic"));
        assert!(msg.contains("10s"));
    }

    #[test]
    fn test_not_found_uses_alert_id_display() {
        assert_eq!(MonitorError::NotFound(AlertId(3)).to_string(), "alert alert_3 not found");
    }
}
