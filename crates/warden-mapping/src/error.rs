//! Mapping error types.

use thiserror::Error;

/// Error raised while compiling or evaluating property mappings.
#[derive(Debug, Clone, Error)]
pub enum MappingError {
    /// An expression failed to parse.  Carries the offending mapping's
    /// name so operators can fix the configuration.
    #[error("mapping '{mapping}' failed to compile: {message}")]
    Compile { mapping: String, message: String },

    /// An expression raised an ordinary runtime error during
    /// evaluation.  Carries the offending mapping's name.
    #[error("mapping '{mapping}' failed to evaluate: {message}")]
    Evaluation { mapping: String, message: String },

    /// Control-flow signal: the mapping author decided this object
    /// should not be synced at all.  Never wrapped; propagates to the
    /// caller unchanged.
    #[error("object skipped by mapping")]
    SkipObject,
}

impl MappingError {
    /// Whether this is the skip-object control-flow signal rather than
    /// a real failure.
    pub fn is_skip(&self) -> bool {
        matches!(self, MappingError::SkipObject)
    }
}

/// Result type for mapping operations.
pub type MappingResult<T> = Result<T, MappingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_classification() {
        assert!(MappingError::SkipObject.is_skip());
        assert!(!MappingError::Evaluation {
            mapping: "m".into(),
            message: "boom".into()
        }
        .is_skip());
    }

    #[test]
    fn test_error_display_carries_mapping_identity() {
        let err = MappingError::Evaluation {
            mapping: "scim-user-base".into(),
            message: "division by zero".into(),
        };
        assert!(err.to_string().contains("scim-user-base"));
    }
}
