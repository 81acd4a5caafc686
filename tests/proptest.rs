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

//! Property-based tests for the booking engine.
//!
//! These tests verify invariants that should hold for any sequence of
//! booking requests and settlements.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use rental_ledger_rs::{
    BookingRequest, BookingStatus, CarId, CarSpec, Engine, PaymentStatus, UserId, commission_split,
    quote,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Generate a positive daily price (0.01 to 1000.00).
fn arb_price() -> impl Strategy<Value = Decimal> {
    (1i64..=100_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Generate a commission rate in [0, 1] with 4 decimal places.
fn arb_rate() -> impl Strategy<Value = Decimal> {
    (0i64..=10_000i64).prop_map(|bps| Decimal::new(bps, 4))
}

/// Generate a booking window as (start offset in hours, length in hours).
fn arb_window() -> impl Strategy<Value = (i64, i64)> {
    (0i64..24 * 60, 1i64..24 * 14)
}

fn listed_car(engine: &Engine, price: Decimal) -> CarId {
    let car_id = engine
        .register_car(
            UserId(1),
            CarSpec {
                make: "Kia".into(),
                model: "Sportage".into(),
                year: 2020,
                price_per_day: price,
                location: None,
            },
        )
        .unwrap();
    engine.approve_car(car_id, true).unwrap();
    car_id
}

fn request(car_id: CarId, start_hours: i64, len_hours: i64) -> BookingRequest {
    BookingRequest {
        car_id,
        start_date: epoch() + Duration::hours(start_hours),
        end_date: epoch() + Duration::hours(start_hours + len_hours),
        pickup_location: None,
        dropoff_location: None,
        notes: None,
    }
}

// =============================================================================
// Schedule Invariant Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Accepted bookings for one car never overlap, whatever the request mix.
    #[test]
    fn accepted_bookings_never_overlap(
        windows in prop::collection::vec(arb_window(), 1..25),
    ) {
        let engine = Engine::new();
        let car_id = listed_car(&engine, dec!(50.00));

        for (i, (start, len)) in windows.iter().enumerate() {
            let _ = engine.create_booking(UserId(100 + i as u32), request(car_id, *start, *len));
        }

        let bookings = engine.bookings_by_car_owner(UserId(1));
        for (i, a) in bookings.iter().enumerate() {
            for b in bookings.iter().skip(i + 1) {
                prop_assert!(
                    a.booking.start_date >= b.booking.end_date
                        || a.booking.end_date <= b.booking.start_date,
                    "bookings {} and {} overlap",
                    a.booking.id,
                    b.booking.id,
                );
            }
        }
    }

    /// A rejected request always overlaps some accepted booking.
    #[test]
    fn rejections_are_justified(
        windows in prop::collection::vec(arb_window(), 2..15),
    ) {
        let engine = Engine::new();
        let car_id = listed_car(&engine, dec!(50.00));

        for (i, (start, len)) in windows.iter().enumerate() {
            let req = request(car_id, *start, *len);
            let (req_start, req_end) = (req.start_date, req.end_date);

            if engine.create_booking(UserId(100 + i as u32), req).is_err() {
                let conflicting = engine
                    .bookings_by_car_owner(UserId(1))
                    .iter()
                    .any(|v| req_start < v.booking.end_date && req_end > v.booking.start_date);
                prop_assert!(conflicting, "rejection without a conflicting booking");
            }
        }
    }
}

// =============================================================================
// Pricing Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// The quoted total charges the ceiling of the rental length in days.
    #[test]
    fn quote_charges_rounded_up_days(
        price in arb_price(),
        (start, len) in arb_window(),
    ) {
        let engine = Engine::new();
        let car_id = listed_car(&engine, price);

        let view = engine
            .create_booking(UserId(2), request(car_id, start, len))
            .unwrap();

        let expected_days = ((len + 23) / 24).max(1);
        prop_assert_eq!(
            view.booking.total_price,
            Decimal::from(expected_days) * price
        );
    }

    /// Quoting is deterministic for a given range and price.
    #[test]
    fn quote_is_deterministic(
        price in arb_price(),
        (start, len) in arb_window(),
    ) {
        let req = request(CarId(1), start, len);
        let range = rental_ledger_rs::DateRange::new(req.start_date, req.end_date);
        prop_assert_eq!(quote(&range, price), quote(&range, price));
    }
}

// =============================================================================
// Commission Split Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// Fee plus payout always reconstructs the amount exactly.
    #[test]
    fn split_sums_to_amount(
        amount in arb_price(),
        rate in arb_rate(),
    ) {
        let (fee, payout) = commission_split(amount, rate);
        prop_assert_eq!(fee + payout, amount);
        prop_assert!(fee >= Decimal::ZERO);
        prop_assert!(payout >= Decimal::ZERO);
    }

    /// The fee is exactly amount times rate.
    #[test]
    fn fee_is_amount_times_rate(
        amount in arb_price(),
        rate in arb_rate(),
    ) {
        let (fee, _) = commission_split(amount, rate);
        prop_assert_eq!(fee, amount * rate);
    }
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// Whatever transition sequence is attempted, the booking only ever moves
    /// along the allowed edges and never leaves a terminal state.
    #[test]
    fn transitions_follow_the_table(
        attempts in prop::collection::vec(0usize..5, 1..12),
    ) {
        let statuses = [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::InProgress,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
        ];

        let engine = Engine::new();
        let car_id = listed_car(&engine, dec!(50.00));
        let id = engine
            .create_booking(UserId(2), request(car_id, 0, 48))
            .unwrap()
            .booking
            .id;

        let mut current = BookingStatus::Pending;
        for idx in attempts {
            let target = statuses[idx];
            let result = engine.update_booking_status(id, UserId(1), target, false);

            let allowed = matches!(
                (current, target),
                (BookingStatus::Pending, BookingStatus::Confirmed | BookingStatus::Cancelled)
                    | (BookingStatus::Confirmed, BookingStatus::InProgress | BookingStatus::Cancelled)
                    | (BookingStatus::InProgress, BookingStatus::Completed | BookingStatus::Cancelled)
            );
            prop_assert_eq!(result.is_ok(), allowed);
            if allowed {
                current = target;
            }
            prop_assert_eq!(engine.get_booking(id).unwrap().booking.status, current);
        }
    }

    /// Settling a payment twice never succeeds, for any pair of outcomes.
    #[test]
    fn second_settlement_always_rejected(
        first_paid in any::<bool>(),
        second_paid in any::<bool>(),
    ) {
        let engine = Engine::new();
        let car_id = listed_car(&engine, dec!(50.00));
        let view = engine
            .create_booking(UserId(2), request(car_id, 0, 48))
            .unwrap();
        let payment_id = view.payment.unwrap().id;

        let outcome = |paid| if paid { PaymentStatus::Paid } else { PaymentStatus::Failed };

        engine
            .update_payment_status(payment_id, UserId(1), outcome(first_paid), None, None)
            .unwrap();
        let result =
            engine.update_payment_status(payment_id, UserId(1), outcome(second_paid), None, None);
        prop_assert!(result.is_err());

        let payment = engine.get_payment(payment_id).unwrap();
        prop_assert_eq!(payment.status, outcome(first_paid));
    }
}
