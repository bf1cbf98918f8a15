use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info, warn};

use crate::lifecycle::{self, INITIAL_STATUS};
use crate::limits::*;
use crate::model::*;

use super::availability::derive_nightly;
use super::conflict::{check_capacity, validate_booking};
use super::{Engine, EngineError, SharedLedger, WalCommand};

impl Engine {
    /// Register a resource or record a change to its kind or total quantity.
    /// A no-op when nothing changed.
    pub async fn sync_resource(
        &self,
        resource_id: &str,
        kind: ResourceKind,
        total_quantity: u32,
    ) -> Result<(), EngineError> {
        if resource_id.is_empty() || resource_id.len() > MAX_ID_LEN {
            return Err(EngineError::LimitExceeded("resource id length"));
        }
        let event = Event::ResourceSynced {
            id: resource_id.to_string(),
            kind,
            total_quantity,
        };
        let _gate = self.commit_gate.read().await;

        if let Some(ledger) = self.get_ledger(resource_id) {
            let mut guard = ledger.write().await;
            if guard.kind == kind && guard.total_quantity == total_quantity {
                return Ok(());
            }
            info!(
                "resource {resource_id}: total quantity {} -> {total_quantity}",
                guard.total_quantity
            );
            return self.persist_and_apply(&mut guard, &event).await;
        }

        // First sighting. Concurrent first syncs may both journal the event.
        self.wal_append(&event).await?;
        let ledger = self
            .ledgers
            .entry(resource_id.to_string())
            .or_insert_with(|| {
                Arc::new(RwLock::new(ResourceLedger::new(
                    resource_id.to_string(),
                    kind,
                    total_quantity,
                )))
            })
            .clone();
        let mut guard = ledger.write().await;
        guard.kind = kind;
        guard.total_quantity = total_quantity;
        debug!("registered resource {resource_id} ({}, {total_quantity})", kind.as_str());
        Ok(())
    }

    /// Persist a new booking that already carries its identifier.
    ///
    /// Identifier claim, capacity re-check, WAL append and ledger update run
    /// under the resource's write lock.
    pub async fn insert(&self, booking: Booking) -> Result<Booking, EngineError> {
        if booking.id.is_empty() || booking.id.len() > MAX_ID_LEN {
            return Err(EngineError::LimitExceeded("booking id length"));
        }
        let ledger = self.ledger_for_insert(&booking)?;
        let _gate = self.commit_gate.read().await;

        // Unique constraint on the identifier, claimed before the capacity check
        if !self.claim_id(&booking.id, &booking.resource_id) {
            return Err(EngineError::DuplicateIdentifier(booking.id));
        }

        let mut guard = ledger.write().await;
        let result = match self.check_insert(&guard, &booking) {
            Ok(()) => self.persist_insert(&mut guard, &booking).await,
            Err(e) => Err(e),
        };
        drop(guard);

        match result {
            Ok(()) => {
                self.issued.observe(&booking.id);
                Ok(booking)
            }
            Err(e) => {
                self.booking_to_resource.remove(&booking.id);
                Err(e)
            }
        }
    }

    /// Issue the next identifier for the booking's kind and persist it, as one
    /// step under the resource's write lock. The identifier is drawn only after
    /// the capacity check passes, and handed back if the WAL append fails.
    pub async fn allocate_and_insert(&self, mut booking: Booking) -> Result<Booking, EngineError> {
        let ledger = self.ledger_for_insert(&booking)?;
        let _gate = self.commit_gate.read().await;
        let mut guard = ledger.write().await;
        self.check_insert(&guard, &booking)?;

        booking.id = self.claim_next_id(booking.kind, &booking.resource_id)?;
        if let Err(e) = self.persist_insert(&mut guard, &booking).await {
            self.booking_to_resource.remove(&booking.id);
            if !self.issued.release(booking.kind, &booking.id) {
                warn!("identifier {} lost after a failed write", booking.id);
            }
            return Err(e);
        }
        Ok(booking)
    }

    /// Allocate until an identifier is free in the index. Collisions only come
    /// from explicit-id inserts that ran ahead of the counter.
    fn claim_next_id(&self, kind: ResourceKind, resource_id: &str) -> Result<String, EngineError> {
        for attempt in 1..=MAX_DUPLICATE_RETRIES {
            let id = self.issued.allocate(kind)?;
            if self.claim_id(&id, resource_id) {
                return Ok(id);
            }
            warn!(attempt, "identifier {id} already taken, allocating the next one");
        }
        Err(EngineError::Transient(format!(
            "no free {} identifier after {MAX_DUPLICATE_RETRIES} attempts",
            kind.as_str()
        )))
    }

    fn claim_id(&self, id: &str, resource_id: &str) -> bool {
        match self.booking_to_resource.entry(id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(resource_id.to_string());
                true
            }
        }
    }

    fn ledger_for_insert(&self, booking: &Booking) -> Result<SharedLedger, EngineError> {
        validate_booking(booking)?;
        if booking.status != INITIAL_STATUS {
            return Err(EngineError::Validation {
                field: "status",
                message: format!("new bookings start as {INITIAL_STATUS}, got {}", booking.status),
            });
        }
        self.get_ledger(&booking.resource_id)
            .ok_or_else(|| EngineError::ResourceUnavailable {
                resource_id: booking.resource_id.clone(),
                reason: "not registered",
            })
    }

    fn check_insert(&self, guard: &ResourceLedger, booking: &Booking) -> Result<(), EngineError> {
        if guard.bookings.len() >= MAX_BOOKINGS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many bookings on resource"));
        }
        if guard.kind != booking.kind {
            return Err(EngineError::Validation {
                field: "kind",
                message: format!(
                    "resource {} is a {}, booking is for a {}",
                    guard.id,
                    guard.kind.as_str(),
                    booking.kind.as_str()
                ),
            });
        }
        check_capacity(guard, &booking.window, booking.quantity)
    }

    async fn persist_insert(&self, guard: &mut ResourceLedger, booking: &Booking) -> Result<(), EngineError> {
        let event = Event::BookingInserted {
            booking: booking.clone(),
        };
        self.persist_and_apply(guard, &event).await
    }

    /// Move a booking to `new_status`, applying the transition's ledger effect.
    pub async fn update_status(
        &self,
        booking_id: &str,
        new_status: BookingStatus,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("status reason too long"));
        }
        let _gate = self.commit_gate.read().await;
        let mut guard = self.resolve_booking_write(booking_id).await?;
        let current = guard
            .booking(booking_id)
            .ok_or_else(|| EngineError::NotFound(booking_id.to_string()))?;

        if !lifecycle::can_transition(current.status, new_status) {
            return Err(EngineError::IllegalTransition {
                booking_id: booking_id.to_string(),
                from: current.status,
                to: new_status,
            });
        }

        let event = Event::StatusChanged {
            id: booking_id.to_string(),
            resource_id: guard.id.clone(),
            status: new_status,
            reason,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard
            .booking(booking_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(booking_id.to_string()))
    }

    /// Set the audit reason. Allowed in every status, terminal ones included.
    pub async fn annotate(&self, booking_id: &str, reason: String) -> Result<Booking, EngineError> {
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("status reason too long"));
        }
        let _gate = self.commit_gate.read().await;
        let mut guard = self.resolve_booking_write(booking_id).await?;
        if guard.booking(booking_id).is_none() {
            return Err(EngineError::NotFound(booking_id.to_string()));
        }
        let event = Event::ReasonAnnotated {
            id: booking_id.to_string(),
            resource_id: guard.id.clone(),
            reason,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard
            .booking(booking_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(booking_id.to_string()))
    }

    /// Confirmed bookings whose window ended on or before `today`.
    pub fn collect_finished(&self, today: NaiveDate) -> Vec<String> {
        let mut finished = Vec::new();
        for entry in self.ledgers.iter() {
            let ledger = entry.value().clone();
            if let Ok(guard) = ledger.try_read() {
                for b in &guard.bookings {
                    if b.status == BookingStatus::Confirmed && b.window.end <= today {
                        finished.push(b.id.clone());
                    }
                }
            }
        }
        finished
    }

    /// Re-derive every cached per-date ledger from its booking set and repair
    /// any drift. Returns the number of resources repaired.
    pub async fn reconcile(&self) -> usize {
        let ledgers: Vec<_> = self.ledgers.iter().map(|e| e.value().clone()).collect();
        let mut repaired = 0;
        for ledger in ledgers {
            let mut guard = ledger.write().await;
            let derived = derive_nightly(&guard);
            if derived != guard.nightly {
                warn!(
                    "ledger drift on {}: {} cached dates, {} derived; repairing",
                    guard.id,
                    guard.nightly.len(),
                    derived.len()
                );
                guard.nightly = derived;
                metrics::counter!(crate::observability::LEDGER_REPAIRS_TOTAL).increment(1);
                repaired += 1;
            }
        }
        repaired
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Held until the compacted file is swapped in
        let _gate = self.commit_gate.write().await;
        let ledgers: Vec<_> = self.ledgers.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for ledger in ledgers {
            let guard = ledger.read().await;
            events.push(Event::ResourceSynced {
                id: guard.id.clone(),
                kind: guard.kind,
                total_quantity: guard.total_quantity,
            });
            for booking in &guard.bookings {
                events.push(Event::BookingInserted {
                    booking: booking.clone(),
                });
            }
        }
        let resources = self.ledgers.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Transient("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Transient("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Transient(format!("WAL compaction failed: {e}")))?;
        info!("compacted WAL to {resources} resources");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
