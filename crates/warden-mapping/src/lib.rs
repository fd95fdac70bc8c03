//! # Warden Mapping
//!
//! Property-mapping expressions: user-authored transforms that shape a
//! local object into a fragment of a provider's external schema.
//!
//! Expressions are written in Rhai, compiled once per manager, and
//! evaluated in a sandboxed engine with resource limits.  Evaluation
//! order is name order, and later fragments override earlier ones when
//! the caller merges them.

pub mod error;
pub mod manager;
pub mod merge;

pub use error::{MappingError, MappingResult};
pub use manager::{MappingContext, MappingManager, PropertyMapping};
pub use merge::{deep_merge, normalize};
