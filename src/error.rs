//! Error types for each stage of the scan pipeline

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Camera acquisition and frame capture failures
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
}

impl CaptureError {
    pub fn user_message(&self) -> &'static str {
        "Unable to access camera. Please ensure you have granted permissions."
    }
}

/// Failures of a single identification request
#[derive(Debug, Error)]
pub enum IdentifyError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("upstream error: {message}")]
    Upstream {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("could not parse model response: {message}")]
    Parse {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

impl IdentifyError {
    pub fn upstream(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Upstream {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Message suitable for showing to the user. Transport and parse failures share one
    /// message; the detail stays available through `source()`.
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(detail) => detail.clone(),
            Self::Upstream { .. } | Self::Parse { .. } => {
                "Failed to identify card. Please try scanning again.".to_string()
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Configuration(_))
    }
}

impl From<reqwest::Error> for IdentifyError {
    fn from(err: reqwest::Error) -> Self {
        Self::upstream(format!("request to model failed: {err}"), err)
    }
}

/// Collection persistence failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("persistence error: stored collection is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("persistence error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("persistence error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Failures surfaced by the scan orchestrator
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("an identification is already in progress")]
    Busy,

    #[error("no identified card is waiting for confirmation")]
    NothingPending,

    #[error("camera is not started")]
    CameraStopped,

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Identify(#[from] IdentifyError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn upstream_keeps_source_for_diagnostics() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = IdentifyError::upstream("request failed", io);

        assert_eq!(
            err.user_message(),
            "Failed to identify card. Please try scanning again."
        );
        assert_eq!(err.source().unwrap().to_string(), "reset by peer");
        assert!(err.is_retryable());
    }

    #[test]
    fn configuration_is_not_retryable() {
        let err = IdentifyError::Configuration("GEMINI_API_KEY is missing".to_string());
        assert!(!err.is_retryable());
        assert_eq!(err.user_message(), "GEMINI_API_KEY is missing");
    }
}
