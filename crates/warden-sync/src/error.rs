//! Sync error taxonomy.
//!
//! Every failure mode the engine reacts to is a distinct variant;
//! callers branch on kind, never on message text.  Row-level errors
//! are caught per object and accumulated as task messages; only
//! [`SyncError::StopSync`] unwinds past a single object.

use thiserror::Error;

use warden_mapping::MappingError;
use warden_store::StoreError;

/// Error raised while synchronizing objects to a remote directory.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration-level impossibility (invalid record shape, bad
    /// credentials, rejected request).  Aborts the current unit of
    /// work and any remaining pages of the same run.
    #[error("stopping sync: {message}")]
    StopSync { message: String },

    /// The remote system reports the object already exists.
    /// Recoverable by look-up-and-link; escalates per object when the
    /// look-up is ambiguous.
    #[error("object already exists: {message}")]
    ObjectExists { message: String },

    /// The remote object vanished; the next write re-creates it.
    #[error("object not found: {message}")]
    NotFound { message: String },

    /// Network or server-side failure; the object fails for this run
    /// and is safe to retry on the next one.
    #[error("transient error: {message}")]
    Transient {
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// A specific mapping expression failed; carries the mapping's
    /// identity so operators can fix the configuration.
    #[error("property mapping '{mapping}' failed: {message}")]
    MappingFailed { mapping: String, message: String },

    /// Control flow: a mapping decided this object should not be
    /// synced.  Not a failure.
    #[error("object skipped by property mapping")]
    SkipObject,

    /// A mutating request was suppressed because the provider is in
    /// dry-run mode.  Reported as a message, never as a failure.
    #[error("dry run: {message}")]
    DryRun { message: String },

    /// Storage-layer failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient { .. })
    }

    /// Whether this error aborts the remaining pages of a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::StopSync { .. })
    }

    /// Whether this outcome is control flow rather than a failure.
    pub fn is_benign(&self) -> bool {
        matches!(self, SyncError::SkipObject | SyncError::DryRun { .. })
    }

    pub fn stop(message: impl Into<String>) -> Self {
        SyncError::StopSync {
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        SyncError::Transient {
            message: message.into(),
            retry_after_secs: None,
        }
    }
}

impl From<MappingError> for SyncError {
    fn from(e: MappingError) -> Self {
        match e {
            MappingError::SkipObject => SyncError::SkipObject,
            MappingError::Compile { mapping, message }
            | MappingError::Evaluation { mapping, message } => {
                SyncError::MappingFailed { mapping, message }
            }
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Transient {
            message: e.to_string(),
            retry_after_secs: None,
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(SyncError::transient("503").is_transient());
        assert!(!SyncError::transient("503").is_fatal());
        assert!(SyncError::stop("bad mapping output").is_fatal());
        assert!(SyncError::SkipObject.is_benign());
        assert!(SyncError::DryRun {
            message: "POST /Users".into()
        }
        .is_benign());
        assert!(!SyncError::NotFound {
            message: "gone".into()
        }
        .is_transient());
    }

    #[test]
    fn test_mapping_error_conversion() {
        let e: SyncError = MappingError::Evaluation {
            mapping: "scim-user".into(),
            message: "boom".into(),
        }
        .into();
        match e {
            SyncError::MappingFailed { mapping, .. } => assert_eq!(mapping, "scim-user"),
            other => panic!("Unexpected: {other:?}"),
        }

        let skip: SyncError = MappingError::SkipObject.into();
        assert!(skip.is_benign());
    }
}
