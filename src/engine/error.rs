use crate::lifecycle;
use crate::model::{BookingStatus, ConflictInfo};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Malformed input. `field` names the offending request field.
    Validation {
        field: &'static str,
        message: String,
    },
    ResourceUnavailable {
        resource_id: String,
        reason: &'static str,
    },
    RequesterInvalid {
        requester_id: String,
        reason: &'static str,
    },
    CapacityExceeded {
        resource_id: String,
        requested: u32,
        available: u32,
        conflicts: Vec<ConflictInfo>,
    },
    PriceMismatch {
        expected: f64,
        actual: f64,
    },
    DuplicateIdentifier(String),
    IllegalTransition {
        booking_id: String,
        from: BookingStatus,
        to: BookingStatus,
    },
    NotFound(String),
    LimitExceeded(&'static str),
    /// Collaborator timed out or is unavailable. Safe to retry.
    Transient(String),
}

impl EngineError {
    /// Machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } | EngineError::LimitExceeded(_) => "validation_error",
            EngineError::ResourceUnavailable { .. } => "resource_unavailable",
            EngineError::RequesterInvalid { .. } => "requester_invalid",
            EngineError::CapacityExceeded { .. } => "capacity_exceeded",
            EngineError::PriceMismatch { .. } => "price_mismatch",
            EngineError::DuplicateIdentifier(_) => "duplicate_identifier",
            EngineError::IllegalTransition { .. } => "illegal_transition",
            EngineError::NotFound(_) => "not_found",
            EngineError::Transient(_) => "transient_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }

    pub fn conflicts(&self) -> &[ConflictInfo] {
        match self {
            EngineError::CapacityExceeded { conflicts, .. } => conflicts,
            _ => &[],
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation { field, message } => write!(f, "invalid {field}: {message}"),
            EngineError::ResourceUnavailable { resource_id, reason } => {
                write!(f, "resource {resource_id} unavailable: {reason}")
            }
            EngineError::RequesterInvalid { requester_id, reason } => {
                write!(f, "requester {requester_id} invalid: {reason}")
            }
            EngineError::CapacityExceeded {
                resource_id,
                requested,
                available,
                conflicts,
            } => {
                write!(
                    f,
                    "capacity exceeded on {resource_id}: requested {requested}, available {available}"
                )?;
                if !conflicts.is_empty() {
                    let ids: Vec<&str> = conflicts.iter().map(|c| c.booking_id.as_str()).collect();
                    write!(f, "; conflicting bookings: {}", ids.join(", "))?;
                }
                Ok(())
            }
            EngineError::PriceMismatch { expected, actual } => {
                write!(f, "price mismatch: expected {expected:.2}, got {actual:.2}")
            }
            EngineError::DuplicateIdentifier(id) => write!(f, "duplicate booking identifier: {id}"),
            EngineError::IllegalTransition { booking_id, from, to } => {
                write!(f, "illegal transition for {booking_id}: {from} -> {to}")?;
                if from.is_terminal() {
                    return write!(f, " ({from} is final)");
                }
                let allowed: Vec<&str> = lifecycle::successors(*from)
                    .into_iter()
                    .map(BookingStatus::as_str)
                    .collect();
                write!(f, " (allowed: {})", allowed.join(", "))
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Transient(e) => write!(f, "transient error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
