//! Error types for the attestation workflow.
//!
//! Defines the taxonomy shared by all workflow components, with stable codes
//! for client disambiguation, retry classification, and messages safe to put
//! in front of recipients.

use presenza_core::{CoreError, RequestStatus};
use thiserror::Error;

/// Result type alias for workflow operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Workflow error taxonomy with codes in the display output.
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    /// Input rejected before any write (E2001).
    #[error("[E2001] Validation failed: {message}")]
    Validation {
        /// What was rejected and why
        message: String,
    },

    /// Referenced entity does not exist (E2101).
    #[error("[E2101] Not found: {message}")]
    NotFound {
        /// Which lookup came back empty
        message: String,
    },

    /// Operation conflicts with the current lifecycle status (E2201).
    #[error("[E2201] Conflict: {message}")]
    Conflict {
        /// The status that blocked the operation
        message: String,
    },

    /// Deadline passed or the session no longer accepts signatures (E2301).
    #[error("[E2301] Expired: {message}")]
    Expired {
        /// Which gate the request failed
        message: String,
    },

    /// Reported position falls outside the session geofence (E2401).
    #[error(
        "[E2401] Location invalid: {distance_m:.0}m from reference exceeds allowed {allowed_radius_m:.0}m"
    )]
    LocationInvalid {
        /// Measured distance from the reference point in meters
        distance_m: f64,
        /// Radius the session allows in meters
        allowed_radius_m: f64,
    },

    /// Downstream dependency failed; the operation may be retried (E2501).
    #[error("[E2501] Dependency failure: {message}")]
    Dependency {
        /// What the dependency reported
        message: String,
    },
}

impl WorkflowError {
    /// Creates a validation error from a message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Creates a not-found error from a message.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    /// Creates a conflict error from a message.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict { message: message.into() }
    }

    /// Creates the conflict reported when a request already settled.
    pub fn already(status: RequestStatus) -> Self {
        Self::Conflict { message: format!("request is already {status}") }
    }

    /// Creates an expiry error from a message.
    pub fn expired(message: impl Into<String>) -> Self {
        Self::Expired { message: message.into() }
    }

    /// Creates a geofence failure carrying the measured distance.
    pub fn location_invalid(distance_m: f64, allowed_radius_m: f64) -> Self {
        Self::LocationInvalid { distance_m, allowed_radius_m }
    }

    /// Creates a dependency error from a message.
    pub fn dependency(message: impl Into<String>) -> Self {
        Self::Dependency { message: message.into() }
    }

    /// Returns the error code (E2001-E2501).
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "E2001",
            Self::NotFound { .. } => "E2101",
            Self::Conflict { .. } => "E2201",
            Self::Expired { .. } => "E2301",
            Self::LocationInvalid { .. } => "E2401",
            Self::Dependency { .. } => "E2501",
        }
    }

    /// Returns whether retrying the same call can succeed.
    ///
    /// Only dependency failures are transient. Every other variant is a
    /// deterministic verdict on the request and will repeat.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Dependency { .. })
    }

    /// Message safe to show to the recipient who hit the error.
    ///
    /// An expired link and an already-settled request read differently on
    /// purpose: the first invites no action, the second explains why a second
    /// attempt cannot count.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { .. } => "The submitted attestation is incomplete or invalid.".into(),
            Self::NotFound { .. } => "This signing link is not recognized.".into(),
            Self::Conflict { .. } => {
                "This request has already been completed or withdrawn; it cannot be signed again."
                    .into()
            },
            Self::Expired { .. } => "This signing link has expired.".into(),
            Self::LocationInvalid { distance_m, allowed_radius_m } => format!(
                "Your reported position is {distance_m:.0}m from the session location; signing requires being within {allowed_radius_m:.0}m."
            ),
            Self::Dependency { .. } => "A temporary problem occurred. Please try again.".into(),
        }
    }
}

impl From<CoreError> for WorkflowError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(message) => Self::NotFound { message },
            CoreError::ConstraintViolation(message) => Self::Conflict { message },
            CoreError::InvalidInput(message) => Self::Validation { message },
            CoreError::Database(message) => Self::Dependency { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(WorkflowError::validation("x").code(), "E2001");
        assert_eq!(WorkflowError::not_found("x").code(), "E2101");
        assert_eq!(WorkflowError::conflict("x").code(), "E2201");
        assert_eq!(WorkflowError::expired("x").code(), "E2301");
        assert_eq!(WorkflowError::location_invalid(340.0, 100.0).code(), "E2401");
        assert_eq!(WorkflowError::dependency("x").code(), "E2501");
    }

    #[test]
    fn only_dependency_failures_are_retryable() {
        assert!(WorkflowError::dependency("smtp down").is_retryable());

        assert!(!WorkflowError::validation("x").is_retryable());
        assert!(!WorkflowError::not_found("x").is_retryable());
        assert!(!WorkflowError::conflict("x").is_retryable());
        assert!(!WorkflowError::expired("x").is_retryable());
        assert!(!WorkflowError::location_invalid(340.0, 100.0).is_retryable());
    }

    #[test]
    fn display_carries_code_and_rounded_distance() {
        let error = WorkflowError::location_invalid(512.4, 100.0);
        assert_eq!(
            error.to_string(),
            "[E2401] Location invalid: 512m from reference exceeds allowed 100m"
        );

        let conflict = WorkflowError::already(RequestStatus::Signed);
        assert_eq!(conflict.to_string(), "[E2201] Conflict: request is already signed");
    }

    #[test]
    fn expired_and_settled_read_differently_to_users() {
        let expired = WorkflowError::expired("deadline passed").user_message();
        let settled = WorkflowError::already(RequestStatus::Signed).user_message();
        assert_ne!(expired, settled);
        assert!(expired.contains("expired"));
        assert!(settled.contains("already"));
    }

    #[test]
    fn core_errors_map_onto_workflow_variants() {
        let not_found = WorkflowError::from(CoreError::NotFound("gone".into()));
        assert_eq!(not_found.code(), "E2101");

        let conflict = WorkflowError::from(CoreError::ConstraintViolation("dup token".into()));
        assert_eq!(conflict.code(), "E2201");

        let validation = WorkflowError::from(CoreError::InvalidInput("bad lat".into()));
        assert_eq!(validation.code(), "E2001");

        let dependency = WorkflowError::from(CoreError::Database("pool timeout".into()));
        assert_eq!(dependency.code(), "E2501");
        assert!(dependency.is_retryable());
    }
}
