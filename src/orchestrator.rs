//! Booking orchestration: the validation pipeline in front of the booking store.
//!
//! Every rejection point of a create request maps to one [`EngineError`] kind.
//! Reads from collaborator stores are bounded by a timeout and retried with
//! backoff on transient failures. Writes are never abandoned half-way: each
//! store write runs in its own spawned task which is awaited to completion, so
//! a caller dropping the request future cannot split a WAL append from its
//! in-memory apply.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tracing::{debug, info, info_span, warn, Instrument};
use ulid::Ulid;

use crate::clock::Clock;
use crate::engine::{remaining_capacity, EngineError};
use crate::lifecycle::INITIAL_STATUS;
use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::pricing::{self, PriceCheck};
use crate::store::{BookingStore, RequesterStore, ResourceStore};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Timeout and retry settings for collaborator calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Upper bound on a single read.
    pub timeout: Duration,
    /// Attempts per call, first one included.
    pub max_attempts: u32,
    /// Sleep before the second attempt; doubled after each failure.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2000),
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

pub struct Orchestrator {
    resources: Arc<dyn ResourceStore>,
    requesters: Arc<dyn RequesterStore>,
    bookings: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl Orchestrator {
    /// Build an orchestrator over the given stores. Fails when the booking
    /// store cannot report where its identifier sequences stand.
    pub async fn new(
        resources: Arc<dyn ResourceStore>,
        requesters: Arc<dyn RequesterStore>,
        bookings: Arc<dyn BookingStore>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Result<Self, EngineError> {
        for kind in ResourceKind::ALL {
            match bookings.last_issued_id(kind).await? {
                Some(last) => info!("{} identifiers continue after {last}", kind.as_str()),
                None => debug!("no {} identifiers issued yet", kind.as_str()),
            }
        }
        Ok(Self {
            resources,
            requesters,
            bookings,
            clock,
            policy,
        })
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    // ── Create ───────────────────────────────────────────────────

    /// Validate `request` and persist it as a new booking in the initial status.
    pub async fn create_booking(&self, request: BookingRequest) -> Result<BookingReceipt, EngineError> {
        let request_id = Ulid::new();
        let span = info_span!(
            "create_booking",
            %request_id,
            resource_id = %request.resource_id,
            requester_id = %request.requester_id,
        );
        async move {
            let mut kind = None;
            let result = self.create_booking_steps(request, &mut kind).await;
            let kind_label = kind.map_or("unknown", ResourceKind::as_str);
            match &result {
                Ok(receipt) => {
                    info!(booking_id = %receipt.booking.id, "booking accepted");
                    metrics::counter!(observability::BOOKINGS_TOTAL, "kind" => kind_label, "outcome" => "accepted")
                        .increment(1);
                }
                Err(e) => {
                    info!(kind = e.kind(), "booking rejected: {e}");
                    metrics::counter!(observability::BOOKINGS_TOTAL, "kind" => kind_label, "outcome" => e.kind())
                        .increment(1);
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn create_booking_steps(
        &self,
        request: BookingRequest,
        kind_seen: &mut Option<ResourceKind>,
    ) -> Result<BookingReceipt, EngineError> {
        check_request_limits(&request)?;

        // 1. Resource exists and is bookable
        let resource = self.fetch_bookable_resource(&request.resource_id).await?;
        *kind_seen = Some(resource.kind);

        // 2. Requester exists and is not blocked
        self.check_requester(&request.requester_id).await?;

        // 3. Window
        let window = self.parse_window(&request)?;

        // 4. Quantity and guest bounds
        check_quantity(&resource, request.quantity, request.guests)?;

        // 5. Capacity
        let capacity = resource.capacity();
        let store = self.bookings.clone();
        let (rid, kind) = (resource.id.clone(), resource.kind);
        self.write("sync_resource", move || {
            let store = store.clone();
            let rid = rid.clone();
            async move { store.sync_resource(&rid, kind, capacity).await }
        })
        .await?;

        let overlapping = self
            .read("find_overlapping", || {
                self.bookings
                    .find_overlapping(&resource.id, &window, &BookingStatus::ACTIVE)
            })
            .await?;
        let available = remaining_capacity(capacity, &overlapping, &window);
        if available < request.quantity {
            return Err(EngineError::CapacityExceeded {
                resource_id: resource.id.clone(),
                requested: request.quantity,
                available,
                conflicts: overlapping.iter().map(ConflictInfo::from).collect(),
            });
        }

        // 6. Price
        if let PriceCheck::Mismatch { expected, actual } =
            pricing::validate(resource.rate, request.quantity, window.nights(), request.client_amount)
        {
            return Err(EngineError::PriceMismatch { expected, actual });
        }

        // 7 + 8. The store re-checks capacity, then allocates and persists atomically
        let booking = Booking {
            id: String::new(),
            resource_id: resource.id.clone(),
            kind: resource.kind,
            requester_id: request.requester_id,
            window,
            quantity: request.quantity,
            guests: request.guests,
            unit_rate: resource.rate,
            total_amount: pricing::expected_amount(resource.rate, request.quantity, window.nights()),
            status: INITIAL_STATUS,
            created_at: self.clock.now(),
            status_reason: None,
            extra: request.extra,
        };
        let store = self.bookings.clone();
        let booking = self
            .write("allocate_and_insert", move || {
                let store = store.clone();
                let candidate = booking.clone();
                async move { store.allocate_and_insert(candidate).await }
            })
            .await?;

        Ok(BookingReceipt {
            booking,
            resource: ResourceDisplay::from(&resource),
        })
    }

    async fn fetch_bookable_resource(&self, resource_id: &str) -> Result<Resource, EngineError> {
        let resource = self
            .read("resource lookup", || self.resources.get(resource_id))
            .await?
            .ok_or_else(|| EngineError::ResourceUnavailable {
                resource_id: resource_id.to_string(),
                reason: "not found",
            })?;
        if !self
            .read("approval check", || self.resources.is_approved(resource_id))
            .await?
        {
            return Err(EngineError::ResourceUnavailable {
                resource_id: resource_id.to_string(),
                reason: "not approved for booking",
            });
        }
        Ok(resource)
    }

    async fn check_requester(&self, requester_id: &str) -> Result<(), EngineError> {
        self.read("requester lookup", || self.requesters.get(requester_id))
            .await?
            .ok_or_else(|| EngineError::RequesterInvalid {
                requester_id: requester_id.to_string(),
                reason: "not found",
            })?;
        if self
            .read("block check", || self.requesters.is_blocked(requester_id))
            .await?
        {
            return Err(EngineError::RequesterInvalid {
                requester_id: requester_id.to_string(),
                reason: "blocked",
            });
        }
        Ok(())
    }

    fn parse_window(&self, request: &BookingRequest) -> Result<Window, EngineError> {
        let start = parse_date("start_date", &request.start_date)?;
        let end = parse_date("end_date", &request.end_date)?;
        let today = self.clock.today();
        if start < today {
            return Err(EngineError::Validation {
                field: "start_date",
                message: format!("{start} is in the past (today is {today})"),
            });
        }
        let window = Window::try_new(start, end).ok_or_else(|| EngineError::Validation {
            field: "end_date",
            message: format!("{end} must be after {start}"),
        })?;
        if window.nights() > MAX_WINDOW_NIGHTS {
            return Err(EngineError::Validation {
                field: "end_date",
                message: format!("window of {} nights exceeds {MAX_WINDOW_NIGHTS}", window.nights()),
            });
        }
        if request.duration_units != window.nights() {
            return Err(EngineError::Validation {
                field: "duration_units",
                message: format!(
                    "declared {} but {window} spans {}",
                    request.duration_units,
                    window.nights()
                ),
            });
        }
        Ok(window)
    }

    // ── Transitions ──────────────────────────────────────────────

    pub async fn confirm(&self, booking_id: &str, reason: Option<String>) -> Result<BookingReceipt, EngineError> {
        self.transition(booking_id, BookingStatus::Confirmed, reason).await
    }

    pub async fn cancel(&self, booking_id: &str, reason: Option<String>) -> Result<BookingReceipt, EngineError> {
        self.transition(booking_id, BookingStatus::Cancelled, reason).await
    }

    pub async fn reject(&self, booking_id: &str, reason: Option<String>) -> Result<BookingReceipt, EngineError> {
        self.transition(booking_id, BookingStatus::Rejected, reason).await
    }

    pub async fn complete(&self, booking_id: &str, reason: Option<String>) -> Result<BookingReceipt, EngineError> {
        self.transition(booking_id, BookingStatus::Completed, reason).await
    }

    /// Apply one state-machine transition. Illegal moves come back as
    /// [`EngineError::IllegalTransition`].
    pub async fn transition(
        &self,
        booking_id: &str,
        to: BookingStatus,
        reason: Option<String>,
    ) -> Result<BookingReceipt, EngineError> {
        let request_id = Ulid::new();
        let span = info_span!("transition", %request_id, booking_id, to = to.as_str());
        async move {
            let store = self.bookings.clone();
            let id = booking_id.to_string();
            let booking = self
                .write("update_status", move || {
                    let store = store.clone();
                    let id = id.clone();
                    let reason = reason.clone();
                    async move { store.update_status(&id, to, reason).await }
                })
                .await
                .inspect_err(|e| info!(kind = e.kind(), "transition refused: {e}"))?;
            info!("booking {} is now {}", booking.id, booking.status);
            metrics::counter!(observability::TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
            Ok(self.with_display(booking).await)
        }
        .instrument(span)
        .await
    }

    /// Replace the audit reason. Works on terminal bookings too.
    pub async fn annotate(&self, booking_id: &str, reason: String) -> Result<BookingReceipt, EngineError> {
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::Validation {
                field: "reason",
                message: format!("longer than {MAX_REASON_LEN} bytes"),
            });
        }
        let store = self.bookings.clone();
        let id = booking_id.to_string();
        let booking = self
            .write("annotate", move || {
                let store = store.clone();
                let id = id.clone();
                let reason = reason.clone();
                async move { store.annotate(&id, reason).await }
            })
            .await?;
        debug!("annotated {}", booking.id);
        Ok(self.with_display(booking).await)
    }

    // ── Reads ────────────────────────────────────────────────────

    pub async fn get_booking(&self, booking_id: &str) -> Result<BookingReceipt, EngineError> {
        let booking = self
            .read("get_booking", || self.bookings.get_booking(booking_id))
            .await?
            .ok_or_else(|| EngineError::NotFound(booking_id.to_string()))?;
        Ok(self.with_display(booking).await)
    }

    /// Remaining units of `resource_id` over `window`.
    pub async fn availability(&self, resource_id: &str, window: &Window) -> Result<u32, EngineError> {
        let resource = self
            .read("resource lookup", || self.resources.get(resource_id))
            .await?
            .ok_or_else(|| EngineError::ResourceUnavailable {
                resource_id: resource_id.to_string(),
                reason: "not found",
            })?;
        let overlapping = self
            .read("find_overlapping", || {
                self.bookings
                    .find_overlapping(resource_id, window, &BookingStatus::ACTIVE)
            })
            .await?;
        Ok(remaining_capacity(resource.capacity(), &overlapping, window))
    }

    /// Join listing display fields onto a booking. Falls back to the booking's
    /// own rate when the listing is gone or cannot be read.
    async fn with_display(&self, booking: Booking) -> BookingReceipt {
        let resource = match self
            .read("resource lookup", || self.resources.get(&booking.resource_id))
            .await
        {
            Ok(Some(r)) => ResourceDisplay::from(&r),
            Ok(None) => ResourceDisplay::fallback(&booking),
            Err(e) => {
                warn!(booking_id = %booking.id, "listing lookup for {} failed: {e}", booking.resource_id);
                ResourceDisplay::fallback(&booking)
            }
        };
        BookingReceipt { booking, resource }
    }

    // ── Collaborator calls ───────────────────────────────────────

    /// Run a read with a timeout, retrying transient failures with backoff.
    async fn read<T, F, Fut>(&self, what: &'static str, op: F) -> Result<T, EngineError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let mut backoff = self.policy.backoff;
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.policy.timeout, op()).await {
                Ok(r) => r,
                Err(_) => Err(EngineError::Transient(format!(
                    "{what} timed out after {:?}",
                    self.policy.timeout
                ))),
            };
            match result {
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    warn!(attempt, "{what}: {e}, retrying in {backoff:?}");
                    metrics::counter!(observability::TRANSIENT_RETRIES_TOTAL, "call" => what).increment(1);
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Run a write to completion in a spawned task, retrying transient failures
    /// with backoff. No timeout: a write that started is never abandoned.
    async fn write<T, F, Fut>(&self, what: &'static str, op: F) -> Result<T, EngineError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, EngineError>> + Send + 'static,
        T: Send + 'static,
    {
        let started = Instant::now();
        let mut backoff = self.policy.backoff;
        let mut attempt = 1;
        loop {
            let result = match tokio::spawn(op()).await {
                Ok(r) => r,
                Err(e) => Err(EngineError::Transient(format!("{what} task failed: {e}"))),
            };
            match result {
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    warn!(attempt, "{what}: {e}, retrying in {backoff:?}");
                    metrics::counter!(observability::TRANSIENT_RETRIES_TOTAL, "call" => what).increment(1);
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                other => {
                    debug!("{what} finished in {:?}", started.elapsed());
                    return other;
                }
            }
        }
    }
}

// ── Pure validation ──────────────────────────────────────────────

fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|e| EngineError::Validation {
        field,
        message: format!("{value:?} is not a YYYY-MM-DD date: {e}"),
    })
}

/// Window for read-only queries: no past-date or duration checks.
pub fn parse_query_window(start_date: &str, end_date: &str) -> Result<Window, EngineError> {
    let start = parse_date("start_date", start_date)?;
    let end = parse_date("end_date", end_date)?;
    let window = Window::try_new(start, end).ok_or_else(|| EngineError::Validation {
        field: "end_date",
        message: format!("{end} must be after {start}"),
    })?;
    if window.nights() > MAX_WINDOW_NIGHTS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(window)
}

fn check_request_limits(request: &BookingRequest) -> Result<(), EngineError> {
    let too_long = |field: &'static str, max: usize| EngineError::Validation {
        field,
        message: format!("must be 1..={max} bytes"),
    };
    if request.resource_id.is_empty() || request.resource_id.len() > MAX_ID_LEN {
        return Err(too_long("resource_id", MAX_ID_LEN));
    }
    if request.requester_id.is_empty() || request.requester_id.len() > MAX_ID_LEN {
        return Err(too_long("requester_id", MAX_ID_LEN));
    }
    let extras = [
        ("extra.nationality", &request.extra.nationality),
        ("extra.emergency_contact", &request.extra.emergency_contact),
        ("extra.special_requests", &request.extra.special_requests),
    ];
    for (field, value) in extras {
        if value.as_ref().is_some_and(|v| v.len() > MAX_EXTRA_LEN) {
            return Err(EngineError::Validation {
                field,
                message: format!("longer than {MAX_EXTRA_LEN} bytes"),
            });
        }
    }
    Ok(())
}

fn check_quantity(resource: &Resource, quantity: u32, guests: Option<u32>) -> Result<(), EngineError> {
    if quantity == 0 {
        return Err(EngineError::Validation {
            field: "quantity",
            message: "must be at least 1".into(),
        });
    }
    if quantity > MAX_QUANTITY {
        return Err(EngineError::Validation {
            field: "quantity",
            message: format!("{quantity} exceeds the limit of {MAX_QUANTITY}"),
        });
    }
    match resource.kind {
        ResourceKind::Hotel => {
            if quantity > resource.total_quantity {
                return Err(EngineError::Validation {
                    field: "quantity",
                    message: format!(
                        "{quantity} rooms requested, category has {}",
                        resource.total_quantity
                    ),
                });
            }
            if let Some(guests) = guests {
                if guests == 0 {
                    return Err(EngineError::Validation {
                        field: "guests",
                        message: "must be at least 1".into(),
                    });
                }
                if let Some(per_unit) = resource.max_guests_per_unit
                    && u64::from(guests) > u64::from(quantity) * u64::from(per_unit)
                {
                    return Err(EngineError::Validation {
                        field: "guests",
                        message: format!("{guests} guests exceed {quantity} x {per_unit}"),
                    });
                }
            }
        }
        ResourceKind::Guide | ResourceKind::Vehicle => {
            if quantity != 1 {
                return Err(EngineError::Validation {
                    field: "quantity",
                    message: format!("a {} is booked one at a time", resource.kind.as_str()),
                });
            }
        }
    }
    Ok(())
}
