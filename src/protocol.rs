//! Newline-delimited JSON request/response format.
//!
//! Each request line is one object tagged by `"op"`; each response line is
//! `{"ok": true, ...}` or `{"ok": false, "error": {...}}`.

use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::model::*;

/// Parsed command from one request line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    CreateBooking(BookingRequest),
    Confirm {
        booking_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
    Cancel {
        booking_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
    Reject {
        booking_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
    Complete {
        booking_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
    Annotate {
        booking_id: String,
        reason: String,
    },
    GetBooking {
        booking_id: String,
    },
    ListBookings {
        resource_id: String,
    },
    Availability {
        resource_id: String,
        start_date: String,
        end_date: String,
    },
    Calendar {
        resource_id: String,
        start_date: String,
        end_date: String,
    },
    Ping,
}

pub fn parse_command(line: &str) -> Result<Command, EngineError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation {
            field: "request",
            message: "empty request".into(),
        });
    }
    serde_json::from_str(trimmed).map_err(|e| EngineError::Validation {
        field: "request",
        message: e.to_string(),
    })
}

/// Successful payloads. Serialized flat next to `"ok": true`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Receipt(BookingReceipt),
    Bookings {
        resource_id: String,
        bookings: Vec<Booking>,
    },
    Available {
        resource_id: String,
        window: Window,
        available: u32,
    },
    Calendar {
        resource_id: String,
        calendar: Vec<CalendarSpan>,
    },
    Pong {
        pong: bool,
    },
}

#[derive(Debug, Serialize)]
struct Success<'a> {
    ok: bool,
    #[serde(flatten)]
    reply: &'a Reply,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    conflicts: Vec<ConflictInfo>,
}

#[derive(Debug, Serialize)]
struct Failure {
    ok: bool,
    error: ErrorBody,
}

pub fn encode_reply(reply: &Reply) -> String {
    serde_json::to_string(&Success { ok: true, reply })
        .unwrap_or_else(|e| encode_error(&EngineError::Transient(format!("encode failed: {e}"))))
}

pub fn encode_error(err: &EngineError) -> String {
    let failure = Failure {
        ok: false,
        error: ErrorBody {
            kind: err.kind(),
            message: err.to_string(),
            conflicts: err.conflicts().to_vec(),
        },
    };
    // Only plain strings and numbers, cannot fail
    serde_json::to_string(&failure).unwrap_or_default()
}
