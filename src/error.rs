//! Error taxonomy shared by the collector and persistence layers.
//!
//! None of these escape `collect`/`persist`: they are captured into
//! [`CollectionResult`](crate::collector::CollectionResult) and
//! [`UploadResult`](crate::persistence::UploadResult) so the run summary can
//! report them per endpoint.

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinError;

/// Whether a failed upload is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadErrorClass {
    /// Network failures and 5xx responses from the store
    Transient,
    /// Authorization, missing bucket, malformed or already-existing key
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineError {
    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("credential resolution failed: {message}")]
    Auth { message: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("format detection failed: {message}")]
    FormatDetection { message: String },

    #[error("serialization failed: {message}")]
    Serialization { message: String },

    #[error("upload failed ({class:?}): {message}")]
    Upload {
        class: UploadErrorClass,
        message: String,
    },

    #[error("cancelled: {message}")]
    Cancelled { message: String },

    /// A worker task panicked; points at a bug, not at the endpoint
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn format_detection(message: impl Into<String>) -> Self {
        Self::FormatDetection {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable machine-readable code, used in logs and summaries
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Config { .. } => "CONFIG_ERROR",
            PipelineError::Auth { .. } => "AUTH_ERROR",
            PipelineError::Network { .. } => "NETWORK_ERROR",
            PipelineError::Http { .. } => "HTTP_ERROR",
            PipelineError::FormatDetection { .. } => "FORMAT_DETECTION_ERROR",
            PipelineError::Serialization { .. } => "SERIALIZATION_ERROR",
            PipelineError::Upload {
                class: UploadErrorClass::Transient,
                ..
            } => "UPLOAD_ERROR_TRANSIENT",
            PipelineError::Upload {
                class: UploadErrorClass::Permanent,
                ..
            } => "UPLOAD_ERROR_PERMANENT",
            PipelineError::Cancelled { .. } => "CANCELLED",
            PipelineError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Upload classification, if this is an upload failure
    pub fn upload_class(&self) -> Option<UploadErrorClass> {
        match self {
            PipelineError::Upload { class, .. } => Some(*class),
            _ => None,
        }
    }
}

impl From<JoinError> for PipelineError {
    fn from(err: JoinError) -> Self {
        if err.is_panic() {
            PipelineError::internal(format!("worker panicked: {err}"))
        } else {
            PipelineError::cancelled(format!("worker aborted: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_distinguish_upload_classes() {
        let transient = PipelineError::Upload {
            class: UploadErrorClass::Transient,
            message: "503".into(),
        };
        let permanent = PipelineError::Upload {
            class: UploadErrorClass::Permanent,
            message: "403".into(),
        };

        assert_eq!(transient.code(), "UPLOAD_ERROR_TRANSIENT");
        assert_eq!(permanent.code(), "UPLOAD_ERROR_PERMANENT");
        assert_eq!(permanent.upload_class(), Some(UploadErrorClass::Permanent));
        assert_eq!(PipelineError::network("reset").upload_class(), None);
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let err = PipelineError::Http {
            status: 404,
            message: "Not Found".into(),
        };
        let json = serde_json::to_value(&err).unwrap();

        assert_eq!(json["kind"], "http");
        assert_eq!(json["status"], 404);
        assert_eq!(err.to_string(), "HTTP 404: Not Found");
    }

    #[tokio::test]
    async fn test_join_error_keeps_panic_apart_from_cancel() {
        fn explode() -> usize {
            panic!("row index out of range")
        }

        let panicked = tokio::spawn(async { explode() }).await.unwrap_err();
        let err = PipelineError::from(panicked);
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert!(err.to_string().contains("row index out of range"));

        let handle = tokio::spawn(std::future::pending::<()>());
        handle.abort();
        let aborted = handle.await.unwrap_err();
        assert_eq!(PipelineError::from(aborted).code(), "CANCELLED");
    }
}
