//! Error types for the Procedure layer
//!
//! Only configuration and driver operations fail. `begin`, `handle` and
//! `reset` are total: their no-op cases are classified as
//! [`SoftRejection`](crate::SoftRejection) instead.

use crate::OwnerName;

/// Errors that can occur in Procedure operations
#[derive(Debug, thiserror::Error)]
pub enum ProcedureError {
    #[error("Unknown owner: {0}")]
    UnknownOwner(OwnerName),

    #[error("Unknown component '{component}' for command '{command}'")]
    UnknownComponent { component: String, command: String },

    #[error("Registry has been dropped")]
    RegistryDropped,

    #[error("Procedure '{0}' has been released")]
    Released(OwnerName),

    #[error("Duplicate owner name in definition: {0}")]
    DuplicateOwner(OwnerName),

    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Driver is no longer running")]
    DriverClosed,
}

/// Result type alias for procedure operations
pub type ProcedureResult<T> = Result<T, ProcedureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_released_is_distinct_from_unknown_owner() {
        let released = ProcedureError::Released(OwnerName::new("Intro"));
        assert_eq!(released.to_string(), "Procedure 'Intro' has been released");
        assert!(!matches!(released, ProcedureError::UnknownOwner(_)));
    }
}
