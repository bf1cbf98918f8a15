use async_trait::async_trait;

use crate::model::*;
use crate::store::BookingStore;

use super::{Engine, EngineError};

#[async_trait]
impl BookingStore for Engine {
    async fn sync_resource(
        &self,
        resource_id: &str,
        kind: ResourceKind,
        total_quantity: u32,
    ) -> Result<(), EngineError> {
        Engine::sync_resource(self, resource_id, kind, total_quantity).await
    }

    async fn find_overlapping(
        &self,
        resource_id: &str,
        window: &Window,
        statuses: &[BookingStatus],
    ) -> Result<Vec<Booking>, EngineError> {
        Ok(Engine::find_overlapping(self, resource_id, window, statuses).await)
    }

    async fn last_issued_id(&self, kind: ResourceKind) -> Result<Option<String>, EngineError> {
        Ok(self.last_issued(kind))
    }

    async fn insert(&self, booking: Booking) -> Result<Booking, EngineError> {
        Engine::insert(self, booking).await
    }

    async fn allocate_and_insert(&self, booking: Booking) -> Result<Booking, EngineError> {
        Engine::allocate_and_insert(self, booking).await
    }

    async fn update_status(
        &self,
        booking_id: &str,
        new_status: BookingStatus,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        Engine::update_status(self, booking_id, new_status, reason).await
    }

    async fn annotate(&self, booking_id: &str, reason: String) -> Result<Booking, EngineError> {
        Engine::annotate(self, booking_id, reason).await
    }

    async fn get_booking(&self, booking_id: &str) -> Result<Option<Booking>, EngineError> {
        Ok(Engine::get_booking(self, booking_id).await)
    }
}
