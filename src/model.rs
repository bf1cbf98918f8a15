use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Half-open date interval `[start, end)`. Each date in it is one billable
/// night (hotels) or day (guides, vehicles).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Window {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "Window start must be before end");
        Self { start, end }
    }

    /// `None` for zero or negative length windows.
    pub fn try_new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Length in billing periods (nights or days).
    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Every billable date in the window, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d < end)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Canonical conflict test, used for every overlap check in the crate.
pub fn overlaps(a: &Window, b: &Window) -> bool {
    a.overlaps(b)
}

// ── Resources ────────────────────────────────────────────────────

/// The three bookable inventories. Guides and vehicles are capacity-1 resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Hotel,
    Guide,
    Vehicle,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Hotel, ResourceKind::Guide, ResourceKind::Vehicle];

    /// Identifier prefix for bookings of this kind.
    pub fn prefix(self) -> &'static str {
        match self {
            ResourceKind::Hotel => "HB",
            ResourceKind::Guide => "GB",
            ResourceKind::Vehicle => "VB",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Hotel => "hotel",
            ResourceKind::Guide => "guide",
            ResourceKind::Vehicle => "vehicle",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            ResourceKind::Hotel => 0,
            ResourceKind::Guide => 1,
            ResourceKind::Vehicle => 2,
        }
    }

    pub fn from_booking_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| id.starts_with(k.prefix()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Inactive,
}

impl ApprovalStatus {
    pub fn is_bookable(self) -> bool {
        matches!(self, ApprovalStatus::Approved)
    }
}

/// Snapshot of a listing as supplied by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub kind: ResourceKind,
    pub name: String,
    #[serde(default)]
    pub contact: Option<String>,
    /// Rooms in the category. Ignored for guides and vehicles.
    #[serde(default = "one")]
    pub total_quantity: u32,
    /// Price per night (hotels) or per day (guides, vehicles).
    pub rate: f64,
    /// Guests a single room holds. `None` means unbounded.
    #[serde(default)]
    pub max_guests_per_unit: Option<u32>,
    pub approval: ApprovalStatus,
}

fn one() -> u32 {
    1
}

impl Resource {
    pub fn room_category(id: &str, name: &str, total_quantity: u32, rate_per_night: f64) -> Self {
        Self {
            id: id.into(),
            kind: ResourceKind::Hotel,
            name: name.into(),
            contact: None,
            total_quantity,
            rate: rate_per_night,
            max_guests_per_unit: None,
            approval: ApprovalStatus::Approved,
        }
    }

    pub fn guide(id: &str, name: &str, daily_rate: f64) -> Self {
        Self {
            kind: ResourceKind::Guide,
            ..Self::room_category(id, name, 1, daily_rate)
        }
    }

    pub fn vehicle(id: &str, name: &str, rate_per_day: f64) -> Self {
        Self {
            kind: ResourceKind::Vehicle,
            ..Self::room_category(id, name, 1, rate_per_day)
        }
    }

    /// Units that may be reserved at the same instant.
    pub fn capacity(&self) -> u32 {
        match self.kind {
            ResourceKind::Hotel => self.total_quantity,
            ResourceKind::Guide | ResourceKind::Vehicle => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub blocked: bool,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Requested,
    Confirmed,
    Cancelled,
    Completed,
    Rejected,
}

impl BookingStatus {
    /// Statuses that count against a resource's quantity.
    pub const ACTIVE: [BookingStatus; 2] = [BookingStatus::Requested, BookingStatus::Confirmed];

    pub fn reserves_capacity(self) -> bool {
        matches!(self, BookingStatus::Requested | BookingStatus::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Cancelled | BookingStatus::Completed | BookingStatus::Rejected
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Requested => "requested",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
            BookingStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Passthrough fields carried with a booking but never validated by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extra {
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub emergency_contact: Option<String>,
    #[serde(default)]
    pub special_requests: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub resource_id: String,
    pub kind: ResourceKind,
    pub requester_id: String,
    pub window: Window,
    pub quantity: u32,
    pub guests: Option<u32>,
    pub unit_rate: f64,
    pub total_amount: f64,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub status_reason: Option<String>,
    pub extra: Extra,
}

impl Booking {
    pub fn reserves_capacity(&self) -> bool {
        self.status.reserves_capacity()
    }
}

/// Inbound booking request, before any validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub resource_id: String,
    pub requester_id: String,
    pub start_date: String,
    pub end_date: String,
    pub quantity: u32,
    #[serde(default)]
    pub guests: Option<u32>,
    pub duration_units: i64,
    pub client_amount: f64,
    #[serde(default)]
    pub extra: Extra,
}

/// Display fields joined onto a booking for presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDisplay {
    pub name: String,
    pub contact: Option<String>,
    pub rate: f64,
}

impl ResourceDisplay {
    /// Display fields taken from the booking itself, for when the listing
    /// cannot be read.
    pub fn fallback(booking: &Booking) -> Self {
        Self {
            name: booking.resource_id.clone(),
            contact: None,
            rate: booking.unit_rate,
        }
    }
}

impl From<&Resource> for ResourceDisplay {
    fn from(r: &Resource) -> Self {
        Self {
            name: r.name.clone(),
            contact: r.contact.clone(),
            rate: r.rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingReceipt {
    pub booking: Booking,
    pub resource: ResourceDisplay,
}

/// An existing booking that blocks a request, reported back for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub booking_id: String,
    pub window: Window,
    pub quantity: u32,
    pub status: BookingStatus,
}

impl From<&Booking> for ConflictInfo {
    fn from(b: &Booking) -> Self {
        Self {
            booking_id: b.id.clone(),
            window: b.window,
            quantity: b.quantity,
            status: b.status,
        }
    }
}

/// Run of consecutive dates sharing the same free units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSpan {
    pub window: Window,
    pub free: u32,
}

// ── Per-resource ledger ──────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ResourceLedger {
    pub id: String,
    pub kind: ResourceKind,
    pub total_quantity: u32,
    /// Every booking recorded on this resource, sorted by `window.start`.
    pub bookings: Vec<Booking>,
    /// Cached units reserved per date by capacity-consuming bookings.
    /// Always re-derivable from `bookings`.
    pub nightly: BTreeMap<NaiveDate, u32>,
}

impl ResourceLedger {
    pub fn new(id: String, kind: ResourceKind, total_quantity: u32) -> Self {
        Self {
            id,
            kind,
            total_quantity,
            bookings: Vec::new(),
            nightly: BTreeMap::new(),
        }
    }

    /// Insert booking maintaining sort order by window.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.window.start, |b| b.window.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: &str) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: &str) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Return only bookings whose window overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Window) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.window.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.window.end > query.start)
    }

    /// Overlapping bookings in capacity-consuming statuses.
    pub fn active_overlapping(&self, query: &Window) -> impl Iterator<Item = &Booking> {
        self.overlapping(query).filter(|b| b.reserves_capacity())
    }

    pub fn consume(&mut self, window: &Window, quantity: u32) {
        for day in window.days() {
            *self.nightly.entry(day).or_insert(0) += quantity;
        }
    }

    pub fn release(&mut self, window: &Window, quantity: u32) {
        for day in window.days() {
            if let Some(units) = self.nightly.get_mut(&day) {
                *units = units.saturating_sub(quantity);
                if *units == 0 {
                    self.nightly.remove(&day);
                }
            }
        }
    }

    /// Cached units reserved on `day`.
    pub fn reserved_on(&self, day: NaiveDate) -> u32 {
        self.nightly.get(&day).copied().unwrap_or(0)
    }
}

// ── WAL records ──────────────────────────────────────────────────

/// One WAL record. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ResourceSynced {
        id: String,
        kind: ResourceKind,
        total_quantity: u32,
    },
    BookingInserted {
        booking: Booking,
    },
    StatusChanged {
        id: String,
        resource_id: String,
        status: BookingStatus,
        reason: Option<String>,
    },
    ReasonAnnotated {
        id: String,
        resource_id: String,
        reason: String,
    },
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    pub fn window(from: (u32, u32), to: (u32, u32)) -> Window {
        Window::new(day(from.0, from.1), day(to.0, to.1))
    }

    pub fn booking(id: &str, resource_id: &str, w: Window, quantity: u32, status: BookingStatus) -> Booking {
        Booking {
            id: id.into(),
            resource_id: resource_id.into(),
            kind: ResourceKind::from_booking_id(id).unwrap_or(ResourceKind::Hotel),
            requester_id: "guest@example.com".into(),
            window: w,
            quantity,
            guests: None,
            unit_rate: 100.0,
            total_amount: 100.0 * quantity as f64 * w.nights() as f64,
            status,
            created_at: DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap(),
            status_reason: None,
            extra: Extra::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn window_basics() {
        let w = window((6, 1), (6, 3));
        assert_eq!(w.nights(), 2);
        // Half-open: the end date is not a billable day
        assert_eq!(w.days().collect::<Vec<_>>(), vec![day(6, 1), day(6, 2)]);
    }

    #[test]
    fn try_new_rejects_empty_and_inverted() {
        assert!(Window::try_new(day(6, 3), day(6, 3)).is_none());
        assert!(Window::try_new(day(6, 4), day(6, 3)).is_none());
        assert!(Window::try_new(day(6, 3), day(6, 4)).is_some());
    }

    #[test]
    fn overlap_iff_strict_bounds() {
        let a = window((6, 1), (6, 3));
        let b = window((6, 2), (6, 4));
        let c = window((6, 3), (6, 5));
        assert!(overlaps(&a, &b));
        assert!(overlaps(&b, &a));
        assert!(!overlaps(&a, &c)); // checkout-day handoff
        assert!(!overlaps(&c, &a));
    }

    #[test]
    fn overlap_containment() {
        let outer = window((6, 1), (6, 30));
        let inner = window((6, 10), (6, 11));
        assert!(overlaps(&outer, &inner));
        assert!(overlaps(&inner, &outer));
    }

    #[test]
    fn overlap_matches_formula_exhaustively() {
        // every pair of windows drawn from 6 consecutive days
        let days: Vec<NaiveDate> = (1..=6).map(|d| day(6, d)).collect();
        for a0 in 0..6 {
            for a1 in (a0 + 1)..6 {
                for b0 in 0..6 {
                    for b1 in (b0 + 1)..6 {
                        let a = Window::new(days[a0], days[a1]);
                        let b = Window::new(days[b0], days[b1]);
                        let expected = days[a0] < days[b1] && days[a1] > days[b0];
                        assert_eq!(overlaps(&a, &b), expected, "{a} vs {b}");
                    }
                }
            }
        }
    }

    #[test]
    fn resource_capacity_by_kind() {
        assert_eq!(Resource::room_category("H1", "Deluxe", 7, 5000.0).capacity(), 7);
        let mut g = Resource::guide("G1", "Asha", 1500.0);
        g.total_quantity = 4;
        assert_eq!(g.capacity(), 1);
        assert_eq!(Resource::vehicle("V1", "Jeep", 3000.0).capacity(), 1);
    }

    #[test]
    fn status_flags() {
        assert!(BookingStatus::Requested.reserves_capacity());
        assert!(BookingStatus::Confirmed.reserves_capacity());
        assert!(!BookingStatus::Cancelled.reserves_capacity());
        assert!(BookingStatus::Completed.is_terminal());
        assert!(!BookingStatus::Confirmed.is_terminal());
    }

    #[test]
    fn kind_from_booking_id() {
        assert_eq!(ResourceKind::from_booking_id("HB0001"), Some(ResourceKind::Hotel));
        assert_eq!(ResourceKind::from_booking_id("VB0420"), Some(ResourceKind::Vehicle));
        assert_eq!(ResourceKind::from_booking_id("XX0001"), None);
    }

    #[test]
    fn ledger_keeps_bookings_sorted() {
        let mut l = ResourceLedger::new("H1".into(), ResourceKind::Hotel, 3);
        l.insert_booking(booking("HB0001", "H1", window((6, 10), (6, 12)), 1, BookingStatus::Requested));
        l.insert_booking(booking("HB0002", "H1", window((6, 1), (6, 2)), 1, BookingStatus::Requested));
        l.insert_booking(booking("HB0003", "H1", window((6, 5), (6, 6)), 1, BookingStatus::Requested));
        let ids: Vec<_> = l.bookings.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["HB0002", "HB0003", "HB0001"]);
    }

    #[test]
    fn overlapping_skips_adjacent_and_far() {
        let mut l = ResourceLedger::new("H1".into(), ResourceKind::Hotel, 3);
        l.insert_booking(booking("HB0001", "H1", window((6, 1), (6, 3)), 1, BookingStatus::Requested));
        l.insert_booking(booking("HB0002", "H1", window((6, 4), (6, 8)), 1, BookingStatus::Requested));
        l.insert_booking(booking("HB0003", "H1", window((7, 1), (7, 2)), 1, BookingStatus::Requested));

        let hits: Vec<_> = l.overlapping(&window((6, 3), (6, 5))).map(|b| b.id.as_str()).collect();
        assert_eq!(hits, vec!["HB0002"]);
    }

    #[test]
    fn active_overlapping_ignores_released_statuses() {
        let mut l = ResourceLedger::new("H1".into(), ResourceKind::Hotel, 3);
        l.insert_booking(booking("HB0001", "H1", window((6, 1), (6, 3)), 1, BookingStatus::Cancelled));
        l.insert_booking(booking("HB0002", "H1", window((6, 1), (6, 3)), 2, BookingStatus::Confirmed));
        l.insert_booking(booking("HB0003", "H1", window((6, 1), (6, 3)), 1, BookingStatus::Rejected));
        let hits: Vec<_> = l.active_overlapping(&window((6, 2), (6, 3))).map(|b| b.id.as_str()).collect();
        assert_eq!(hits, vec!["HB0002"]);
    }

    #[test]
    fn nightly_consume_and_release() {
        let mut l = ResourceLedger::new("H1".into(), ResourceKind::Hotel, 3);
        l.consume(&window((6, 1), (6, 3)), 2);
        l.consume(&window((6, 2), (6, 4)), 1);
        assert_eq!(l.reserved_on(day(6, 1)), 2);
        assert_eq!(l.reserved_on(day(6, 2)), 3);
        assert_eq!(l.reserved_on(day(6, 3)), 1);
        assert_eq!(l.reserved_on(day(6, 4)), 0);

        l.release(&window((6, 1), (6, 3)), 2);
        assert_eq!(l.reserved_on(day(6, 1)), 0);
        assert_eq!(l.reserved_on(day(6, 2)), 1);
        assert!(!l.nightly.contains_key(&day(6, 1)));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingInserted {
            booking: booking("GB0007", "G1", window((6, 1), (6, 3)), 1, BookingStatus::Requested),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
