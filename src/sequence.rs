use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::engine::EngineError;
use crate::limits::SEQUENCE_WIDTH;
use crate::model::ResourceKind;

/// `<prefix><zero-padded seq>`. Widens past the pad width instead of wrapping.
pub fn format_id(kind: ResourceKind, seq: u64) -> String {
    format!("{}{:0width$}", kind.prefix(), seq, width = SEQUENCE_WIDTH)
}

/// Numeric suffix of an identifier issued for `kind`.
pub fn parse_seq(kind: ResourceKind, id: &str) -> Option<u64> {
    let digits = id.strip_prefix(kind.prefix())?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Identifier following `last`, or the first one when nothing was issued yet.
pub fn next_after(kind: ResourceKind, last: Option<&str>) -> Result<String, EngineError> {
    let seq = match last {
        None => 0,
        Some(id) => parse_seq(kind, id).ok_or_else(|| EngineError::Validation {
            field: "booking_id",
            message: format!("malformed {} identifier: {id}", kind.as_str()),
        })?,
    };
    Ok(format_id(kind, seq + 1))
}

/// Last issued identifier per resource kind. Allocation and rollback for a
/// kind are serialized by one short lock.
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    last: Mutex<[Option<String>; 3]>,
}

fn seq_of(kind: ResourceKind, last: Option<&str>) -> u64 {
    last.and_then(|id| parse_seq(kind, id)).unwrap_or(0)
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, [Option<String>; 3]> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an identifier that is already in use. The sequence never moves
    /// backwards, and identifiers of unknown kinds are ignored.
    pub fn observe(&self, id: &str) {
        let Some(kind) = ResourceKind::from_booking_id(id) else {
            return;
        };
        let Some(seq) = parse_seq(kind, id) else {
            return;
        };
        let mut last = self.lock();
        let slot = &mut last[kind.index()];
        if seq > seq_of(kind, slot.as_deref()) {
            *slot = Some(id.to_string());
        }
    }

    /// Issue the identifier following the last one issued for `kind`.
    pub fn allocate(&self, kind: ResourceKind) -> Result<String, EngineError> {
        let mut last = self.lock();
        let slot = &mut last[kind.index()];
        let id = next_after(kind, slot.as_deref())?;
        *slot = Some(id.clone());
        Ok(id)
    }

    /// Take back `id` after its write failed. Only the most recent
    /// identifier can be returned; returns false when a later one was
    /// already issued.
    pub fn release(&self, kind: ResourceKind, id: &str) -> bool {
        let mut last = self.lock();
        let slot = &mut last[kind.index()];
        if slot.as_deref() != Some(id) {
            return false;
        }
        *slot = match seq_of(kind, Some(id)) {
            0 | 1 => None,
            seq => Some(format_id(kind, seq - 1)),
        };
        true
    }

    pub fn last_issued(&self, kind: ResourceKind) -> Option<String> {
        self.lock()[kind.index()].clone()
    }
}
