//! Error taxonomy for photo operations.

use thiserror::Error;

/// Errors surfaced by the workflow layer
///
/// Adapter failures arrive as `anyhow::Error` and are wrapped according to the
/// store that produced them; the full context chain is kept in the message.
#[derive(Error, Debug)]
pub enum PhotoError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Not authorized to access this {0}")]
    Forbidden(&'static str),

    #[error("Photo not found or already in album")]
    NotAssociable,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("Database error: {0:#}")]
    Database(anyhow::Error),

    #[error("Image generation failed: {0:#}")]
    Generation(anyhow::Error),

    #[error("Internal error: {0:#}")]
    Internal(anyhow::Error),
}

impl PhotoError {
    pub fn validation(message: impl Into<String>) -> Self {
        PhotoError::Validation(message.into())
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            PhotoError::Validation(_) => "VALIDATION_ERROR",
            PhotoError::NotFound(_) => "NOT_FOUND",
            PhotoError::Forbidden(_) => "FORBIDDEN",
            PhotoError::NotAssociable => "NOT_ASSOCIABLE",
            PhotoError::Conflict(_) => "CONFLICT",
            PhotoError::Unauthorized(_) => "UNAUTHORIZED",
            PhotoError::Storage(_) => "STORAGE_ERROR",
            PhotoError::Database(_) => "DATABASE_ERROR",
            PhotoError::Generation(_) => "GENERATION_ERROR",
            PhotoError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller caused the failure
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            PhotoError::Storage(_)
                | PhotoError::Database(_)
                | PhotoError::Generation(_)
                | PhotoError::Internal(_)
        )
    }
}

pub type PhotoResult<T> = Result<T, PhotoError>;

/// Outcome of one step of a multi-store sequence
#[derive(Debug)]
pub enum StepOutcome {
    /// Step completed
    Ok,
    /// Best-effort step failed; the sequence continues
    Degraded(String),
    /// Required step failed; the sequence stops
    Fatal(PhotoError),
}

impl StepOutcome {
    /// Wrap the result of a best-effort step
    pub fn best_effort<T>(result: anyhow::Result<T>, step: &str) -> Self {
        match result {
            Ok(_) => StepOutcome::Ok,
            Err(e) => StepOutcome::Degraded(format!("{step}: {e:#}")),
        }
    }

    /// Wrap the result of a required step
    pub fn required<T>(result: PhotoResult<T>) -> Self {
        match result {
            Ok(_) => StepOutcome::Ok,
            Err(e) => StepOutcome::Fatal(e),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, StepOutcome::Ok)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StepOutcome::Fatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_error_messages() {
        assert_eq!(PhotoError::NotFound("Photo").to_string(), "Photo not found");
        assert_eq!(
            PhotoError::Forbidden("photo").to_string(),
            "Not authorized to access this photo"
        );

        let err = PhotoError::Storage(anyhow!("connection reset").context("Failed to upload"));
        assert_eq!(
            err.to_string(),
            "Storage error: Failed to upload: connection reset"
        );
    }

    #[test]
    fn test_client_error_classification() {
        assert!(PhotoError::validation("bad").is_client_error());
        assert!(PhotoError::NotAssociable.is_client_error());
        assert!(!PhotoError::Database(anyhow!("down")).is_client_error());
        assert_eq!(PhotoError::NotAssociable.code(), "NOT_ASSOCIABLE");
    }

    #[test]
    fn test_step_outcomes() {
        let ok: anyhow::Result<()> = Ok(());
        assert!(StepOutcome::best_effort(ok, "write metadata").is_ok());

        let failed: anyhow::Result<()> = Err(anyhow!("timeout"));
        match StepOutcome::best_effort(failed, "write metadata") {
            StepOutcome::Degraded(warning) => assert_eq!(warning, "write metadata: timeout"),
            other => panic!("expected degraded, got {other:?}"),
        }

        let fatal: PhotoResult<()> = Err(PhotoError::NotFound("Photo"));
        assert!(StepOutcome::required(fatal).is_fatal());
    }
}
