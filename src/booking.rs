// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Booking records and per-car scheduling.
//!
//! Implemented state machine:
//!
//  Pending ──confirm──► Confirmed ──progress──► InProgress ──complete──► Completed
//     │                     │                        │
//     └───────cancel────────┴──────────cancel────────┴──► Cancelled
//!
//! `Completed` and `Cancelled` are terminal. Each car's bookings live inside
//! a [`CarSchedule`] guarded by a single mutex, so the overlap check and the
//! insert that follows it are one critical section: two concurrent requests
//! for overlapping dates on the same car cannot both succeed.

use crate::base::{BookingId, CarId, UserId};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Terminal states can never be left.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Explicit transition table.
    ///
    /// The legacy system accepted any status write from an authorized actor,
    /// including resurrecting cancelled bookings; this table deliberately
    /// rejects those writes.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, InProgress)
                | (Confirmed, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Cancelled)
        )
    }
}

/// Half-open date range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Half-open interval overlap test: touching ranges do not overlap.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Number of billable days: duration rounded up, floored to one day.
    ///
    /// Degenerate ranges (`end <= start`) are coerced to a single day rather
    /// than rejected.
    pub fn rental_days(&self) -> i64 {
        const DAY_SECONDS: i64 = 86_400;
        let seconds = (self.end - self.start).num_seconds();
        if seconds <= 0 {
            1
        } else {
            (seconds + DAY_SECONDS - 1) / DAY_SECONDS
        }
    }
}

/// Computes the total price for a range: `rental_days * price_per_day`.
pub fn quote(range: &DateRange, price_per_day: Decimal) -> Decimal {
    Decimal::from(range.rental_days()) * price_per_day
}

/// A reservation of one car by one user for a date range.
///
/// This is a plain snapshot; the authoritative copy lives inside the owning
/// [`CarSchedule`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Booking {
    pub id: BookingId,
    pub user_id: UserId,
    pub car_id: CarId,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub pickup_location: Option<String>,
    pub dropoff_location: Option<String>,
    pub total_price: Decimal,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn range(&self) -> DateRange {
        DateRange::new(self.start_date, self.end_date)
    }
}

#[derive(Debug)]
struct ScheduleData {
    #[allow(dead_code)]
    car_id: CarId,
    bookings: HashMap<BookingId, Booking>,
}

impl ScheduleData {
    fn new(car_id: CarId) -> Self {
        Self {
            car_id,
            bookings: HashMap::new(),
        }
    }

    /// True if any non-cancelled booking overlaps the range.
    fn conflicts(&self, range: &DateRange) -> bool {
        self.bookings
            .values()
            .any(|b| b.status != BookingStatus::Cancelled && b.range().overlaps(range))
    }

    fn assert_invariants(&self) {
        #[cfg(debug_assertions)]
        {
            let active: Vec<&Booking> = self
                .bookings
                .values()
                .filter(|b| b.status != BookingStatus::Cancelled)
                .collect();
            for (i, a) in active.iter().enumerate() {
                for b in &active[i + 1..] {
                    debug_assert!(
                        !a.range().overlaps(&b.range()),
                        "Invariant violated: bookings {} and {} overlap",
                        a.id,
                        b.id
                    );
                }
            }
        }
    }
}

/// Per-car booking ledger.
///
/// All reads and writes for one car's bookings go through the inner mutex;
/// the conflict check and the insert are never separated.
#[derive(Debug)]
pub(crate) struct CarSchedule {
    inner: Mutex<ScheduleData>,
}

impl CarSchedule {
    pub(crate) fn new(car_id: CarId) -> Self {
        Self {
            inner: Mutex::new(ScheduleData::new(car_id)),
        }
    }

    /// Inserts a booking unless its range conflicts with an existing
    /// non-cancelled booking.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DateConflict`] on overlap; no mutation occurs.
    pub(crate) fn try_insert(&self, booking: Booking) -> Result<(), LedgerError> {
        let mut data = self.inner.lock();
        if data.conflicts(&booking.range()) {
            return Err(LedgerError::DateConflict);
        }
        data.bookings.insert(booking.id, booking);
        data.assert_invariants();
        Ok(())
    }

    /// Applies a status transition, enforcing the transition table.
    pub(crate) fn transition(
        &self,
        booking_id: BookingId,
        next: BookingStatus,
    ) -> Result<Booking, LedgerError> {
        let mut data = self.inner.lock();
        let booking = data
            .bookings
            .get_mut(&booking_id)
            .ok_or(LedgerError::NotFound)?;
        if !booking.status.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition);
        }
        booking.status = next;
        booking.updated_at = Some(Utc::now());
        Ok(booking.clone())
    }

    /// Cancels a booking from any non-terminal state.
    ///
    /// Cancelling an already-cancelled booking is an idempotent no-op and
    /// returns `Ok(None)`. A `Completed` booking cannot be cancelled.
    pub(crate) fn cancel(&self, booking_id: BookingId) -> Result<Option<Booking>, LedgerError> {
        let mut data = self.inner.lock();
        let booking = data
            .bookings
            .get_mut(&booking_id)
            .ok_or(LedgerError::NotFound)?;
        match booking.status {
            BookingStatus::Completed => Err(LedgerError::InvalidTransition),
            BookingStatus::Cancelled => Ok(None),
            _ => {
                booking.status = BookingStatus::Cancelled;
                booking.updated_at = Some(Utc::now());
                Ok(Some(booking.clone()))
            }
        }
    }

    /// Settlement hook: a paid payment confirms a still-pending booking.
    ///
    /// Bookings that already advanced (or were cancelled in the meantime)
    /// are left untouched.
    pub(crate) fn confirm_on_payment(&self, booking_id: BookingId) -> Option<Booking> {
        let mut data = self.inner.lock();
        let booking = data.bookings.get_mut(&booking_id)?;
        if booking.status != BookingStatus::Pending {
            return None;
        }
        booking.status = BookingStatus::Confirmed;
        booking.updated_at = Some(Utc::now());
        Some(booking.clone())
    }

    /// Settlement hook: a failed payment cancels the booking unless it has
    /// already reached a terminal state.
    pub(crate) fn cancel_on_payment_failure(&self, booking_id: BookingId) -> Option<Booking> {
        let mut data = self.inner.lock();
        let booking = data.bookings.get_mut(&booking_id)?;
        if booking.status.is_terminal() {
            return None;
        }
        booking.status = BookingStatus::Cancelled;
        booking.updated_at = Some(Utc::now());
        Some(booking.clone())
    }

    pub(crate) fn snapshot(&self, booking_id: BookingId) -> Option<Booking> {
        self.inner.lock().bookings.get(&booking_id).cloned()
    }

    pub(crate) fn bookings(&self) -> Vec<Booking> {
        self.inner.lock().bookings.values().cloned().collect()
    }

    /// True while any booking is `Confirmed` or `InProgress`; such cars
    /// cannot be deleted from the catalog.
    pub(crate) fn has_active_bookings(&self) -> bool {
        self.inner.lock().bookings.values().any(|b| {
            matches!(
                b.status,
                BookingStatus::Confirmed | BookingStatus::InProgress
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, d, 0, 0, 0).unwrap()
    }

    fn booking(id: u64, start: u32, end: u32, status: BookingStatus) -> Booking {
        Booking {
            id: BookingId(id),
            user_id: UserId(1),
            car_id: CarId(1),
            start_date: day(start),
            end_date: day(end),
            pickup_location: None,
            dropoff_location: None,
            total_price: dec!(100.00),
            status,
            notes: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    // === DateRange ===

    #[test]
    fn overlapping_ranges_detected() {
        let a = DateRange::new(day(1), day(5));
        let b = DateRange::new(day(3), day(7));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
    }

    #[test]
    fn touching_ranges_do_not_overlap() {
        let a = DateRange::new(day(1), day(5));
        let b = DateRange::new(day(5), day(8));
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn contained_range_overlaps() {
        let a = DateRange::new(day(1), day(10));
        let b = DateRange::new(day(3), day(4));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
    }

    #[test]
    fn rental_days_whole_days() {
        assert_eq!(DateRange::new(day(1), day(4)).rental_days(), 3);
    }

    #[test]
    fn rental_days_rounds_partial_day_up() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
        assert_eq!(DateRange::new(start, end).rental_days(), 3);
    }

    #[test]
    fn rental_days_floors_to_one() {
        assert_eq!(DateRange::new(day(1), day(1)).rental_days(), 1);
        assert_eq!(DateRange::new(day(4), day(1)).rental_days(), 1);
    }

    #[test]
    fn quote_multiplies_days_by_price() {
        let range = DateRange::new(day(1), day(4));
        assert_eq!(quote(&range, dec!(100.00)), dec!(300.00));
    }

    // === Transition table ===

    #[test]
    fn transition_table_allows_forward_path() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
    }

    #[test]
    fn transition_table_allows_cancellation_from_non_terminal() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(InProgress.can_transition_to(Cancelled));
    }

    #[test]
    fn terminal_states_cannot_be_left() {
        use BookingStatus::*;
        for next in [Pending, Confirmed, InProgress, Completed, Cancelled] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn no_skipping_ahead() {
        use BookingStatus::*;
        assert!(!Pending.can_transition_to(InProgress));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Confirmed.can_transition_to(Completed));
    }

    // === CarSchedule ===

    #[test]
    fn insert_then_conflicting_insert_rejected() {
        let schedule = CarSchedule::new(CarId(1));
        schedule
            .try_insert(booking(1, 1, 5, BookingStatus::Confirmed))
            .unwrap();

        let result = schedule.try_insert(booking(2, 3, 7, BookingStatus::Pending));
        assert_eq!(result, Err(LedgerError::DateConflict));
        assert!(schedule.snapshot(BookingId(2)).is_none());
    }

    #[test]
    fn touching_booking_accepted() {
        let schedule = CarSchedule::new(CarId(1));
        schedule
            .try_insert(booking(1, 1, 5, BookingStatus::Confirmed))
            .unwrap();
        schedule
            .try_insert(booking(2, 5, 8, BookingStatus::Pending))
            .unwrap();
    }

    #[test]
    fn cancelled_booking_frees_its_dates() {
        let schedule = CarSchedule::new(CarId(1));
        schedule
            .try_insert(booking(1, 1, 5, BookingStatus::Pending))
            .unwrap();
        schedule.cancel(BookingId(1)).unwrap();

        schedule
            .try_insert(booking(2, 2, 6, BookingStatus::Pending))
            .unwrap();
    }

    #[test]
    fn cancel_completed_rejected() {
        let schedule = CarSchedule::new(CarId(1));
        schedule
            .try_insert(booking(1, 1, 5, BookingStatus::Completed))
            .unwrap();

        let result = schedule.cancel(BookingId(1));
        assert_eq!(result, Err(LedgerError::InvalidTransition));
        assert_eq!(
            schedule.snapshot(BookingId(1)).unwrap().status,
            BookingStatus::Completed
        );
    }

    #[test]
    fn cancel_cancelled_is_noop() {
        let schedule = CarSchedule::new(CarId(1));
        schedule
            .try_insert(booking(1, 1, 5, BookingStatus::Pending))
            .unwrap();
        assert!(schedule.cancel(BookingId(1)).unwrap().is_some());
        assert!(schedule.cancel(BookingId(1)).unwrap().is_none());
    }

    #[test]
    fn transition_rejects_resurrection() {
        let schedule = CarSchedule::new(CarId(1));
        schedule
            .try_insert(booking(1, 1, 5, BookingStatus::Cancelled))
            .unwrap();

        let result = schedule.transition(BookingId(1), BookingStatus::Confirmed);
        assert_eq!(result, Err(LedgerError::InvalidTransition));
    }

    #[test]
    fn confirm_on_payment_only_from_pending() {
        let schedule = CarSchedule::new(CarId(1));
        schedule
            .try_insert(booking(1, 1, 5, BookingStatus::Pending))
            .unwrap();
        schedule
            .try_insert(booking(2, 6, 9, BookingStatus::Cancelled))
            .unwrap();

        assert_eq!(
            schedule.confirm_on_payment(BookingId(1)).unwrap().status,
            BookingStatus::Confirmed
        );
        assert!(schedule.confirm_on_payment(BookingId(2)).is_none());
    }

    #[test]
    fn payment_failure_does_not_cancel_terminal_booking() {
        let schedule = CarSchedule::new(CarId(1));
        schedule
            .try_insert(booking(1, 1, 5, BookingStatus::Completed))
            .unwrap();

        assert!(schedule.cancel_on_payment_failure(BookingId(1)).is_none());
        assert_eq!(
            schedule.snapshot(BookingId(1)).unwrap().status,
            BookingStatus::Completed
        );
    }

    #[test]
    fn has_active_bookings_tracks_confirmed_and_in_progress() {
        let schedule = CarSchedule::new(CarId(1));
        schedule
            .try_insert(booking(1, 1, 5, BookingStatus::Pending))
            .unwrap();
        assert!(!schedule.has_active_bookings());

        schedule
            .transition(BookingId(1), BookingStatus::Confirmed)
            .unwrap();
        assert!(schedule.has_active_bookings());
    }
}
