use crate::limits::*;
use crate::model::*;

use super::availability::{conflicting, remaining_capacity};
use super::EngineError;

/// Shape checks on a booking about to be persisted.
pub(crate) fn validate_booking(booking: &Booking) -> Result<(), EngineError> {
    if booking.window.start >= booking.window.end {
        return Err(EngineError::Validation {
            field: "window",
            message: format!("{} is empty", booking.window),
        });
    }
    if booking.window.nights() > MAX_WINDOW_NIGHTS {
        return Err(EngineError::LimitExceeded("window too long"));
    }
    if booking.quantity == 0 {
        return Err(EngineError::Validation {
            field: "quantity",
            message: "must be at least 1".into(),
        });
    }
    if booking.quantity > MAX_QUANTITY {
        return Err(EngineError::LimitExceeded("quantity too large"));
    }
    if booking.status_reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
        return Err(EngineError::LimitExceeded("status reason too long"));
    }
    Ok(())
}

/// Reject when the overlapping capacity-consuming bookings leave fewer than
/// `quantity` units. Caller holds the ledger's write lock.
pub(crate) fn check_capacity(
    ledger: &ResourceLedger,
    window: &Window,
    quantity: u32,
) -> Result<(), EngineError> {
    let available = remaining_capacity(ledger.total_quantity, &ledger.bookings, window);
    if available < quantity {
        return Err(EngineError::CapacityExceeded {
            resource_id: ledger.id.clone(),
            requested: quantity,
            available,
            conflicts: conflicting(ledger, window),
        });
    }
    Ok(())
}
