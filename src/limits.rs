//! Hard limits on inputs and engine state.

/// Largest quantity a single booking may reserve.
pub const MAX_QUANTITY: u32 = 500;

/// Longest window a single booking may span, in nights/days.
pub const MAX_WINDOW_NIGHTS: i64 = 366;

/// Max length of resource, requester and booking identifiers.
pub const MAX_ID_LEN: usize = 128;

/// Max length of an audit `status_reason`.
pub const MAX_REASON_LEN: usize = 1024;

/// Max length of each passthrough `extra` field.
pub const MAX_EXTRA_LEN: usize = 2048;

/// Max bookings (all statuses) kept on one resource ledger.
pub const MAX_BOOKINGS_PER_RESOURCE: usize = 100_000;

/// Max length of a single protocol line in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Absolute tolerance, in currency units, when reconciling a client amount.
pub const PRICE_TOLERANCE: f64 = 0.01;

/// Minimum digit width of a booking identifier's numeric suffix.
pub const SEQUENCE_WIDTH: usize = 4;

/// Attempts at re-allocating an identifier after a duplicate is detected on insert.
pub const MAX_DUPLICATE_RETRIES: u32 = 5;
