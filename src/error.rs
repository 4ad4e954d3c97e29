//! Planner Error Types
//!
//! All errors surfaced by the planning core. Structural and capacity errors
//! abort planning and drop any partially built plans; a rule that cannot
//! apply is not an error (rules report a no-op outcome instead).

use thiserror::Error;

/// Errors raised while building, optimizing, or (de)serializing a plan.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlannerError {
    /// A bind parameter or expression references an unknown variable
    #[error("Bad parameter: {message}")]
    BadParameter { message: String },

    /// Collection named in FOR/INSERT/UPDATE/REPLACE/REMOVE not found
    #[error("Collection not found: {name}")]
    NoSuchCollection { name: String },

    /// Referenced index id not found during deserialization
    #[error("Index '{id}' not found on collection '{collection}'")]
    NoSuchIndex { collection: String, id: String },

    /// LIMIT offset/count negative or non-numeric
    #[error("Number out of range: {message}")]
    NumberOutOfRange { message: String },

    /// Deserialization encountered an unknown node type tag
    #[error("Unsupported node type: {type_name}")]
    UnsupportedNodeType { type_name: String },

    /// Invariant violation; these are assertions that should be unreachable
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// Allocation failure while building plans
    #[error("Out of memory during query planning")]
    OutOfMemory,

    /// Cooperative cancellation was requested
    #[error("Query planning cancelled")]
    Cancelled,
}

impl PlannerError {
    /// Stable numeric error code, part of the user-visible `{code, message}`
    /// error surface.
    pub fn code(&self) -> u16 {
        match self {
            PlannerError::BadParameter { .. } => 1551,
            PlannerError::NoSuchCollection { .. } => 1203,
            PlannerError::NoSuchIndex { .. } => 1212,
            PlannerError::NumberOutOfRange { .. } => 1504,
            PlannerError::UnsupportedNodeType { .. } => 1561,
            PlannerError::Internal { .. } => 4,
            PlannerError::OutOfMemory => 3,
            PlannerError::Cancelled => 1500,
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        PlannerError::Internal {
            message: message.into(),
        }
    }

    pub(crate) fn bad_parameter(message: impl Into<String>) -> Self {
        PlannerError::BadParameter {
            message: message.into(),
        }
    }
}

/// Result type for planner operations
pub type PlannerResult<T> = Result<T, PlannerError>;
