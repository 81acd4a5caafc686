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

//! # Rental Ledger
//!
//! This library provides the booking and settlement engine of a car-rental
//! marketplace: conflict-checked bookings over a vehicle catalog, a strict
//! booking status lifecycle, one-way payment settlement with a commission
//! split, and an outbox of notification and email events.
//!
//! ## Core Components
//!
//! - [`Engine`]: Central processor owning cars, bookings, and payments
//! - [`BookingStatus`] / [`PaymentStatus`]: The two status machines
//! - [`Outbox`] and [`Dispatcher`]: Queued side effects and their delivery
//! - [`LedgerError`]: Error types for rejected operations
//!
//! ## Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use rental_ledger_rs::{BookingRequest, CarSpec, Engine, UserId};
//! use rust_decimal_macros::dec;
//!
//! let engine = Engine::new();
//!
//! // List a car and approve it.
//! let owner = UserId(1);
//! let car_id = engine
//!     .register_car(
//!         owner,
//!         CarSpec {
//!             make: "Toyota".into(),
//!             model: "RAV4".into(),
//!             year: 2021,
//!             price_per_day: dec!(100.00),
//!             location: Some("Kigali".into()),
//!         },
//!     )
//!     .unwrap();
//! engine.approve_car(car_id, true).unwrap();
//!
//! // Book three days.
//! let booking = engine
//!     .create_booking(
//!         UserId(2),
//!         BookingRequest {
//!             car_id,
//!             start_date: Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap(),
//!             end_date: Utc.with_ymd_and_hms(2024, 6, 4, 10, 0, 0).unwrap(),
//!             pickup_location: None,
//!             dropoff_location: None,
//!             notes: None,
//!         },
//!     )
//!     .unwrap();
//! assert_eq!(booking.booking.total_price, dec!(300.00));
//! ```
//!
//! ## Thread Safety
//!
//! All engine operations take `&self` and may run concurrently from any
//! number of threads. Each car's bookings are serialized behind one schedule
//! lock, so overlapping requests for the same dates can never both succeed.

mod base;
pub mod booking;
pub mod car;
mod engine;
pub mod error;
mod outbox;
pub mod payment;

pub use base::{BookingId, CarId, PaymentId, UserId};
pub use booking::{Booking, BookingStatus, DateRange, quote};
pub use car::{Car, CarSpec, CarStatus};
pub use engine::{BookingRequest, BookingView, Engine, EngineConfig, Page};
pub use error::LedgerError;
pub use outbox::{
    DispatchError, Dispatcher, EmailMessage, EmailSink, Notification, NotificationSink,
    NotificationType, Outbox, OutboxEvent, RelatedEntity,
};
pub use payment::{PaymentStatus, PaymentView, commission_split};
