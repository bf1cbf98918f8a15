//! Narrow interfaces to the collaborators the booking core consumes.

use async_trait::async_trait;

use crate::engine::EngineError;
use crate::model::*;

/// Read-only view of listings, owned by the listing subsystem.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, resource_id: &str) -> Result<Option<Resource>, EngineError>;

    async fn is_approved(&self, resource_id: &str) -> Result<bool, EngineError> {
        Ok(self
            .get(resource_id)
            .await?
            .is_some_and(|r| r.approval.is_bookable()))
    }
}

/// Read-only view of accounts, owned by the auth subsystem.
#[async_trait]
pub trait RequesterStore: Send + Sync {
    async fn get(&self, requester_id: &str) -> Result<Option<Requester>, EngineError>;

    async fn is_blocked(&self, requester_id: &str) -> Result<bool, EngineError> {
        Ok(self.get(requester_id).await?.is_some_and(|r| r.blocked))
    }
}

/// Persistent booking set. The inserts are the atomicity boundary: they
/// re-validate capacity and identifier uniqueness under the same lock as the
/// write.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Record the kind and current total quantity of a resource.
    async fn sync_resource(
        &self,
        resource_id: &str,
        kind: ResourceKind,
        total_quantity: u32,
    ) -> Result<(), EngineError>;

    async fn find_overlapping(
        &self,
        resource_id: &str,
        window: &Window,
        statuses: &[BookingStatus],
    ) -> Result<Vec<Booking>, EngineError>;

    async fn last_issued_id(&self, kind: ResourceKind) -> Result<Option<String>, EngineError>;

    /// Insert a booking that already carries its identifier.
    async fn insert(&self, booking: Booking) -> Result<Booking, EngineError>;

    /// Assign the next identifier for the booking's kind and insert. The
    /// identifier is only drawn once the capacity check has passed.
    async fn allocate_and_insert(&self, booking: Booking) -> Result<Booking, EngineError>;

    async fn update_status(
        &self,
        booking_id: &str,
        new_status: BookingStatus,
        reason: Option<String>,
    ) -> Result<Booking, EngineError>;

    /// Replace the audit reason without changing status.
    async fn annotate(&self, booking_id: &str, reason: String) -> Result<Booking, EngineError>;

    async fn get_booking(&self, booking_id: &str) -> Result<Option<Booking>, EngineError>;
}
