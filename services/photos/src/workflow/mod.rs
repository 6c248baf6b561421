//! Orchestration of operations that span the relational, object and document
//! stores.
//!
//! There is no transaction across stores. Each sequence runs its steps in a
//! fixed order, every step reports a [`StepOutcome`], and only required steps
//! can stop the sequence. The relational row is the record of truth; the
//! object and the metadata document follow it.

mod albums;
mod photos;
mod users;

pub use albums::{AlbumPhotoCount, AlbumWorkflow};
pub use photos::{PhotoWorkflow, SignedUrl, StoredPhoto, ThumbnailUrls, UploadedFile};
pub use users::{Credentials, NewUser, UserService, UserUpdate};

use crate::error::{PhotoError, PhotoResult, StepOutcome};
use crate::models::Page;
use metrics::counter;
use tracing::warn;
use uuid::Uuid;

/// Shortest signed URL lifetime accepted from callers
pub const MIN_URL_EXPIRATION_SECS: u64 = 60;
/// Longest signed URL lifetime accepted from callers
pub const MAX_URL_EXPIRATION_SECS: u64 = 86_400;

/// Resolve a step outcome, recording degraded steps
///
/// Degraded steps are logged and collected into `warnings`; a fatal outcome
/// becomes the sequence's error.
pub(crate) fn settle(
    step: &'static str,
    outcome: StepOutcome,
    photo_id: Uuid,
    warnings: &mut Vec<String>,
) -> PhotoResult<()> {
    match outcome {
        StepOutcome::Ok => Ok(()),
        StepOutcome::Degraded(warning) => {
            warn!(photo_id = %photo_id, step, warning = %warning, "Best-effort step failed");
            counter!("photos.steps.degraded", "step" => step).increment(1);
            warnings.push(warning);
            Ok(())
        }
        StepOutcome::Fatal(err) => Err(err),
    }
}

/// Check a client-supplied pagination window
pub fn check_page(skip: i64, limit: i64) -> PhotoResult<Page> {
    if skip < 0 {
        return Err(PhotoError::validation("skip must be greater than or equal to 0"));
    }
    if !(1..=Page::MAX_LIMIT).contains(&limit) {
        return Err(PhotoError::validation(format!(
            "limit must be between 1 and {}",
            Page::MAX_LIMIT
        )));
    }
    Ok(Page::new(skip, limit))
}

/// Check a client-supplied signed URL lifetime
pub fn check_expiration(secs: u64) -> PhotoResult<u64> {
    if !(MIN_URL_EXPIRATION_SECS..=MAX_URL_EXPIRATION_SECS).contains(&secs) {
        return Err(PhotoError::validation(format!(
            "expiration must be between {} and {} seconds",
            MIN_URL_EXPIRATION_SECS, MAX_URL_EXPIRATION_SECS
        )));
    }
    Ok(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_page_bounds() {
        assert_eq!(check_page(0, 100).unwrap(), Page::default());
        assert_eq!(check_page(20, 1000).unwrap(), Page::new(20, 1000));
        assert!(check_page(-1, 10).is_err());
        assert!(check_page(0, 0).is_err());
        assert!(check_page(0, 1001).is_err());
    }

    #[test]
    fn test_check_expiration_bounds() {
        assert_eq!(check_expiration(60).unwrap(), 60);
        assert_eq!(check_expiration(86_400).unwrap(), 86_400);
        assert!(check_expiration(59).is_err());
        assert!(check_expiration(86_401).is_err());
    }

    #[test]
    fn test_settle_collects_warnings() {
        let mut warnings = Vec::new();
        let id = Uuid::new_v4();

        settle("write_metadata", StepOutcome::Ok, id, &mut warnings).unwrap();
        settle(
            "write_metadata",
            StepOutcome::Degraded("write metadata: timeout".to_string()),
            id,
            &mut warnings,
        )
        .unwrap();
        assert_eq!(warnings, vec!["write metadata: timeout".to_string()]);

        let err = settle(
            "mark_processed",
            StepOutcome::Fatal(PhotoError::NotFound("Photo")),
            id,
            &mut warnings,
        )
        .unwrap_err();
        assert!(matches!(err, PhotoError::NotFound("Photo")));
    }
}
