use crate::limits::*;
use crate::model::*;

use super::availability::calendar;
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_booking(&self, booking_id: &str) -> Option<Booking> {
        let resource_id = self.get_resource_for_booking(booking_id)?;
        let ledger = self.get_ledger(&resource_id)?;
        let guard = ledger.read().await;
        guard.booking(booking_id).cloned()
    }

    /// Every booking on a resource, ordered by start date.
    pub async fn list_bookings(&self, resource_id: &str) -> Vec<Booking> {
        let Some(ledger) = self.get_ledger(resource_id) else {
            return Vec::new();
        };
        let guard = ledger.read().await;
        guard.bookings.clone()
    }

    pub async fn find_overlapping(
        &self,
        resource_id: &str,
        window: &Window,
        statuses: &[BookingStatus],
    ) -> Vec<Booking> {
        let Some(ledger) = self.get_ledger(resource_id) else {
            return Vec::new();
        };
        let guard = ledger.read().await;
        guard
            .overlapping(window)
            .filter(|b| statuses.contains(&b.status))
            .cloned()
            .collect()
    }

    /// Free units per date over `window`, as runs of equal value.
    pub async fn calendar(&self, resource_id: &str, window: &Window) -> Result<Vec<CalendarSpan>, EngineError> {
        if window.nights() > MAX_WINDOW_NIGHTS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let ledger = self
            .get_ledger(resource_id)
            .ok_or_else(|| EngineError::NotFound(resource_id.to_string()))?;
        let guard = ledger.read().await;
        Ok(calendar(&guard, window))
    }

    pub fn last_issued(&self, kind: ResourceKind) -> Option<String> {
        self.issued.last_issued(kind)
    }

    pub fn resource_count(&self) -> usize {
        self.ledgers.len()
    }
}
