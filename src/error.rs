//! Error types for Warden.
//!
//! All errors are strongly typed using thiserror. The taxonomy mirrors the
//! pipeline: intake-time errors are returned synchronously to the submitting
//! producer and never reach the detector; commit-time and estimator errors
//! are handled inside arbitration and are never surfaced to producers as
//! terminal failures.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::proposal::{ProducerId, ProposalId};
use crate::resource::{ResourceId, ZoneId};

/// Validation errors raised while checking a proposal's fields.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid time window: start ({start}) must be before end ({end})")]
    InvalidTimeWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Priority {value} is out of range [1, 10]")]
    PriorityOutOfRange {
        value: u8,
    },

    #[error("Risk value {value} is out of range [0.0, 1.0]")]
    RiskOutOfRange {
        value: f32,
    },

    #[error("Uncertainty value {value} is out of range [0.0, 1.0]")]
    UncertaintyOutOfRange {
        value: f32,
    },

    #[error("Proposal claims no resources")]
    EmptyClaims,

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Rationale cannot be empty")]
    EmptyRationale,

    #[error("Requested window ended at {end}, which is already in the past")]
    WindowElapsed {
        end: DateTime<Utc>,
    },

    #[error("Deadline ({deadline}) falls before the requested window ends ({window_end})")]
    DeadlineBeforeWindow {
        deadline: DateTime<Utc>,
        window_end: DateTime<Utc>,
    },

    #[error("Claimed resource is unknown to the world model: {id}")]
    UnknownResource {
        id: ResourceId,
    },
}

/// Intake-time rejections. These have no side effects on shared state.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Malformed proposal: {0}")]
    Malformed(#[from] ValidationError),

    #[error("Stale proposal: world snapshot is {age_secs}s old, staleness bound is {bound_secs}s")]
    Stale {
        age_secs: i64,
        bound_secs: i64,
    },

    #[error("Duplicate proposal: producer {producer} already has active proposal {existing} for this intent")]
    Duplicate {
        producer: ProducerId,
        existing: ProposalId,
    },
}

/// World-model errors.
///
/// `StaleWrite` is the optimistic-concurrency failure: the caller's snapshot
/// no longer reflects the zone it is writing to. It triggers re-detection,
/// never a producer-visible failure.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("Resource not found: {id}")]
    ResourceNotFound {
        id: ResourceId,
    },

    #[error("Zone not found: {id}")]
    ZoneNotFound {
        id: ZoneId,
    },

    #[error("Stale write: zone {zone} advanced to version {actual}, caller read version {snapshot}")]
    StaleWrite {
        zone: ZoneId,
        snapshot: u64,
        actual: u64,
    },

    #[error("World model backend error: {message}")]
    Backend {
        message: String,
    },
}

/// Estimator-call failures. Arbitration degrades instead of propagating these.
#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("Estimator call timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Estimator queue is full (capacity {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Estimator worker disconnected")]
    Disconnected,

    #[error("Estimator failed: {message}")]
    Failed {
        message: String,
    },
}

/// Errors on the human-review boundary.
#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("Unknown decision request: {id}")]
    UnknownRequest {
        id: uuid::Uuid,
    },

    #[error("Unsafe modification rejected: {reason}")]
    UnsafeModification {
        reason: String,
    },
}

/// Runtime submission errors (worker pool backpressure).
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Submission queue is full (capacity {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Runtime workers disconnected")]
    Disconnected,

    #[error("Waiting for a submission result timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Top-level error type for Warden.
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("Intake error: {0}")]
    Intake(#[from] IntakeError),

    #[error("World model error: {0}")]
    World(#[from] WorldError),

    #[error("Estimator error: {0}")]
    Estimator(#[from] EstimatorError),

    #[error("Escalation error: {0}")]
    Escalation(#[from] EscalationError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl WardenError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is an intake-time rejection.
    #[must_use]
    pub const fn is_intake(&self) -> bool {
        matches!(self, Self::Intake(_))
    }

    /// Returns true if retrying the same call may succeed.
    ///
    /// Intake rejections are deterministic and never retryable. A stale
    /// write is retryable by design: the arbiter re-runs detection against
    /// the advanced world state.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Intake(_) => false,
            Self::World(e) => matches!(e, WorldError::StaleWrite { .. }),
            Self::Estimator(e) => matches!(
                e,
                EstimatorError::Timeout { .. } | EstimatorError::QueueFull { .. }
            ),
            Self::Escalation(_) => false,
            Self::Runtime(e) => matches!(
                e,
                RuntimeError::QueueFull { .. } | RuntimeError::Timeout { .. }
            ),
            Self::Internal { .. } => false,
        }
    }
}

impl From<ValidationError> for WardenError {
    fn from(err: ValidationError) -> Self {
        Self::Intake(IntakeError::Malformed(err))
    }
}

/// Result type alias for Warden operations.
pub type WardenResult<T> = Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_priority() {
        let err = ValidationError::PriorityOutOfRange { value: 12 };
        let msg = format!("{err}");
        assert!(msg.contains("12"));
        assert!(msg.contains("out of range"));
    }

    #[test]
    fn test_intake_error_stale() {
        let err = IntakeError::Stale {
            age_secs: 90,
            bound_secs: 30,
        };
        let msg = format!("{err}");
        assert!(msg.contains("90"));
        assert!(msg.contains("30"));
    }

    #[test]
    fn test_world_error_stale_write() {
        let err = WorldError::StaleWrite {
            zone: ZoneId::new(),
            snapshot: 3,
            actual: 7,
        };
        let msg = format!("{err}");
        assert!(msg.contains("version 7"));
        assert!(msg.contains("version 3"));
    }

    #[test]
    fn test_intake_errors_not_retryable() {
        let err: WardenError = IntakeError::Malformed(ValidationError::EmptyClaims).into();
        assert!(err.is_intake());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_stale_write_retryable() {
        let err: WardenError = WorldError::StaleWrite {
            zone: ZoneId::new(),
            snapshot: 1,
            actual: 2,
        }
        .into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_estimator_timeout_retryable() {
        let err: WardenError = EstimatorError::Timeout { duration_ms: 250 }.into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unsafe_modification_not_retryable() {
        let err: WardenError = EscalationError::UnsafeModification {
            reason: "approves a locked resource".to_string(),
        }
        .into();
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("locked resource"));
    }

    #[test]
    fn test_internal_error() {
        let err = WardenError::internal("inconsistent group state");
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("inconsistent group state"));
    }
}
