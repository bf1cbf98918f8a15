use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::model::*;

// ── Capacity Calculator ───────────────────────────────────────────

/// Units still bookable for `window`: `total_quantity` minus the quantity of
/// every capacity-consuming booking that overlaps it.
/// Sums every overlapping booking, not the per-date peak: two bookings on
/// disjoint nights inside `window` both count.
pub fn remaining_capacity<'a>(
    total_quantity: u32,
    bookings: impl IntoIterator<Item = &'a Booking>,
    window: &Window,
) -> u32 {
    let reserved: u64 = bookings
        .into_iter()
        .filter(|b| b.reserves_capacity() && b.window.overlaps(window))
        .map(|b| u64::from(b.quantity))
        .sum();
    u64::from(total_quantity).saturating_sub(reserved) as u32
}

/// Capacity-consuming bookings overlapping `window`, the ones a rejection reports.
pub fn conflicting(ledger: &ResourceLedger, window: &Window) -> Vec<ConflictInfo> {
    ledger.active_overlapping(window).map(ConflictInfo::from).collect()
}

// ── Per-date ledger ───────────────────────────────────────────────

/// Sweep-line over weighted windows: piecewise-constant reserved units.
/// Returns sorted, disjoint spans with a non-zero load; adjacent spans with
/// equal load are merged.
pub fn reserved_profile(allocs: &[(Window, u32)]) -> Vec<(Window, u32)> {
    if allocs.is_empty() {
        return Vec::new();
    }

    // Build sweep-line events: +qty at start, -qty at end
    let mut events: Vec<(NaiveDate, i64)> = Vec::with_capacity(allocs.len() * 2);
    for (w, qty) in allocs {
        if *qty == 0 {
            continue;
        }
        events.push((w.start, i64::from(*qty)));
        events.push((w.end, -i64::from(*qty)));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut result: Vec<(Window, u32)> = Vec::new();
    let mut load: i64 = 0;
    let mut seg_start: Option<NaiveDate> = None;

    let mut i = 0;
    while i < events.len() {
        let at = events[i].0;
        // Close the running segment before applying every delta at `at`
        if let Some(start) = seg_start.take()
            && at > start
            && load > 0
        {
            push_merged(&mut result, Window::new(start, at), load as u32);
        }
        while i < events.len() && events[i].0 == at {
            load += events[i].1;
            i += 1;
        }
        seg_start = Some(at);
    }

    result
}

fn push_merged(out: &mut Vec<(Window, u32)>, window: Window, load: u32) {
    if let Some((last, last_load)) = out.last_mut()
        && last.end == window.start
        && *last_load == load
    {
        last.end = window.end;
        return;
    }
    out.push((window, load));
}

/// Re-derive the per-date cache from the booking set.
pub fn derive_nightly(ledger: &ResourceLedger) -> BTreeMap<NaiveDate, u32> {
    let allocs: Vec<(Window, u32)> = ledger
        .bookings
        .iter()
        .filter(|b| b.reserves_capacity())
        .map(|b| (b.window, b.quantity))
        .collect();

    let mut nightly = BTreeMap::new();
    for (window, load) in reserved_profile(&allocs) {
        for day in window.days() {
            nightly.insert(day, load);
        }
    }
    nightly
}

/// Free units per date over `window`, collapsed into runs of equal value.
/// Reads the cached per-date ledger.
pub fn calendar(ledger: &ResourceLedger, window: &Window) -> Vec<CalendarSpan> {
    let mut spans: Vec<CalendarSpan> = Vec::new();
    for day in window.days() {
        let free = ledger.total_quantity.saturating_sub(ledger.reserved_on(day));
        if let Some(last) = spans.last_mut()
            && last.free == free
        {
            last.window.end = next_day(day);
            continue;
        }
        spans.push(CalendarSpan {
            window: Window::new(day, next_day(day)),
            free,
        });
    }
    spans
}

fn next_day(day: NaiveDate) -> NaiveDate {
    day.succ_opt().unwrap_or(NaiveDate::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    fn ledger_with(total: u32, bookings: Vec<Booking>) -> ResourceLedger {
        let mut l = ResourceLedger::new("H1".into(), ResourceKind::Hotel, total);
        for b in bookings {
            if b.reserves_capacity() {
                l.consume(&b.window, b.quantity);
            }
            l.insert_booking(b);
        }
        l
    }

    // ── remaining_capacity ───────────────────────────────────

    #[test]
    fn empty_resource_has_full_capacity() {
        assert_eq!(remaining_capacity(5, &[], &window((6, 1), (6, 3))), 5);
    }

    #[test]
    fn sums_overlapping_active_bookings() {
        let bookings = vec![
            booking("HB0001", "H1", window((6, 1), (6, 3)), 2, BookingStatus::Requested),
            booking("HB0002", "H1", window((6, 2), (6, 5)), 1, BookingStatus::Confirmed),
            booking("HB0003", "H1", window((6, 5), (6, 6)), 3, BookingStatus::Confirmed),
        ];
        assert_eq!(remaining_capacity(4, &bookings, &window((6, 1), (6, 4))), 1);
        // HB0003 starts on the query's end date: adjacent, not counted
        assert_eq!(remaining_capacity(4, &bookings, &window((6, 4), (6, 5))), 3);
    }

    #[test]
    fn ignores_released_statuses() {
        let bookings = vec![
            booking("HB0001", "H1", window((6, 1), (6, 3)), 2, BookingStatus::Cancelled),
            booking("HB0002", "H1", window((6, 1), (6, 3)), 2, BookingStatus::Rejected),
            booking("HB0003", "H1", window((6, 1), (6, 3)), 2, BookingStatus::Completed),
        ];
        assert_eq!(remaining_capacity(2, &bookings, &window((6, 1), (6, 3))), 2);
    }

    #[test]
    fn never_negative() {
        let bookings = vec![booking("HB0001", "H1", window((6, 1), (6, 3)), 5, BookingStatus::Requested)];
        assert_eq!(remaining_capacity(2, &bookings, &window((6, 1), (6, 3))), 0);
    }

    #[test]
    fn single_unit_resource_is_boolean() {
        let bookings = vec![booking("GB0001", "G1", window((6, 1), (6, 3)), 1, BookingStatus::Confirmed)];
        assert_eq!(remaining_capacity(1, &bookings, &window((6, 2), (6, 4))), 0);
        assert_eq!(remaining_capacity(1, &bookings, &window((6, 3), (6, 4))), 1);
    }

    // ── reserved_profile ─────────────────────────────────────

    #[test]
    fn profile_of_nothing_is_empty() {
        assert!(reserved_profile(&[]).is_empty());
    }

    #[test]
    fn profile_stacks_overlaps() {
        let profile = reserved_profile(&[
            (window((6, 1), (6, 3)), 2),
            (window((6, 2), (6, 4)), 1),
        ]);
        assert_eq!(
            profile,
            vec![
                (window((6, 1), (6, 2)), 2),
                (window((6, 2), (6, 3)), 3),
                (window((6, 3), (6, 4)), 1),
            ]
        );
    }

    #[test]
    fn profile_merges_equal_adjacent_loads() {
        let profile = reserved_profile(&[
            (window((6, 1), (6, 3)), 1),
            (window((6, 3), (6, 5)), 1),
        ]);
        assert_eq!(profile, vec![(window((6, 1), (6, 5)), 1)]);
    }

    #[test]
    fn profile_skips_gaps() {
        let profile = reserved_profile(&[
            (window((6, 1), (6, 2)), 1),
            (window((6, 4), (6, 5)), 2),
        ]);
        assert_eq!(
            profile,
            vec![(window((6, 1), (6, 2)), 1), (window((6, 4), (6, 5)), 2)]
        );
    }

    // ── nightly cache ────────────────────────────────────────

    #[test]
    fn derived_matches_incremental_cache() {
        let l = ledger_with(
            3,
            vec![
                booking("HB0001", "H1", window((6, 1), (6, 4)), 1, BookingStatus::Requested),
                booking("HB0002", "H1", window((6, 2), (6, 3)), 2, BookingStatus::Confirmed),
                booking("HB0003", "H1", window((6, 2), (6, 9)), 3, BookingStatus::Cancelled),
            ],
        );
        assert_eq!(derive_nightly(&l), l.nightly);
        assert_eq!(l.reserved_on(day(6, 2)), 3);
    }

    #[test]
    fn calendar_collapses_runs() {
        let l = ledger_with(
            2,
            vec![booking("HB0001", "H1", window((6, 2), (6, 4)), 1, BookingStatus::Requested)],
        );
        let cal = calendar(&l, &window((6, 1), (6, 6)));
        assert_eq!(
            cal,
            vec![
                CalendarSpan { window: window((6, 1), (6, 2)), free: 2 },
                CalendarSpan { window: window((6, 2), (6, 4)), free: 1 },
                CalendarSpan { window: window((6, 4), (6, 6)), free: 2 },
            ]
        );
    }

    #[test]
    fn conflicting_reports_active_overlaps_only() {
        let l = ledger_with(
            2,
            vec![
                booking("HB0001", "H1", window((6, 1), (6, 3)), 2, BookingStatus::Requested),
                booking("HB0002", "H1", window((6, 1), (6, 3)), 1, BookingStatus::Cancelled),
            ],
        );
        let c = conflicting(&l, &window((6, 2), (6, 4)));
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].booking_id, "HB0001");
        assert_eq!(c[0].quantity, 2);
    }
}
