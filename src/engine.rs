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

//! Booking and settlement engine.
//!
//! The [`Engine`] is the central component: it owns the vehicle catalog,
//! the per-car booking schedules, the payment records, and the outbox of
//! pending notifications and emails.
//!
//! # Operations
//!
//! - **Bookings**: conflict-checked creation, authorized status transitions,
//!   cancellation with payment follow-through.
//! - **Settlement**: one-way Pending -> Paid/Failed with commission split.
//! - **Catalog**: listing registration, approval, availability, deletion.
//!
//! # Thread Safety
//!
//! Shared state lives in [`DashMap`]s; each car's bookings sit behind a
//! single schedule mutex and each payment behind its own mutex. No
//! operation holds two of these locks at once, so callers may invoke the
//! engine concurrently from any number of threads.

use crate::base::{BookingId, CarId, PaymentId, UserId};
use crate::booking::{Booking, BookingStatus, CarSchedule, DateRange, quote};
use crate::car::{Car, CarCatalog, CarSpec};
use crate::error::LedgerError;
use crate::outbox::{
    EmailMessage, Notification, NotificationType, Outbox, OutboxEvent, RelatedEntity,
};
use crate::payment::{Payment, PaymentStatus, PaymentView, commission_split};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Tunable engine parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fraction of each paid amount retained by the platform, in `[0, 1]`.
    pub commission_rate: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commission_rate: dec!(0.05),
        }
    }
}

/// Parameters for a new booking.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub car_id: CarId,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub pickup_location: Option<String>,
    pub dropoff_location: Option<String>,
    pub notes: Option<String>,
}

/// Composed read model: a booking with its companion payment.
#[derive(Debug, Clone, Serialize)]
pub struct BookingView {
    #[serde(flatten)]
    pub booking: Booking,
    pub payment: Option<PaymentView>,
}

/// One page of a larger result set.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: usize,
    pub page: usize,
    pub page_size: usize,
}

/// Booking and settlement engine for the rental marketplace.
///
/// # Invariants
///
/// - Per car, bookings with status != `Cancelled` never overlap.
/// - Exactly one payment exists per booking, created with it.
/// - A payment leaves `Pending` at most once; its settlement side effects
///   fire at most once.
/// - Booking status follows the explicit transition table; terminal states
///   are never left, not even by settlement hooks.
pub struct Engine {
    catalog: CarCatalog,
    /// Per-car booking ledgers; the schedule mutex is the serialization
    /// point for conflict checks.
    schedules: DashMap<CarId, Arc<CarSchedule>>,
    /// Booking ID -> owning car, for O(1) booking lookup.
    booking_index: DashMap<BookingId, CarId>,
    payments: DashMap<PaymentId, Arc<Payment>>,
    /// Booking ID -> payment ID (1:1).
    payment_index: DashMap<BookingId, PaymentId>,
    outbox: Outbox,
    config: EngineConfig,
    next_booking_id: AtomicU64,
    next_payment_id: AtomicU64,
}

impl Engine {
    /// Creates an engine with the default 5% commission rate.
    pub fn new() -> Self {
        Self::from_config(EngineConfig::default())
    }

    /// Creates an engine with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidCommissionRate`] unless the rate lies
    /// in `[0, 1]`.
    pub fn with_config(config: EngineConfig) -> Result<Self, LedgerError> {
        if config.commission_rate < Decimal::ZERO || config.commission_rate > Decimal::ONE {
            return Err(LedgerError::InvalidCommissionRate);
        }
        Ok(Self::from_config(config))
    }

    fn from_config(config: EngineConfig) -> Self {
        Self {
            catalog: CarCatalog::new(),
            schedules: DashMap::new(),
            booking_index: DashMap::new(),
            payments: DashMap::new(),
            payment_index: DashMap::new(),
            outbox: Outbox::new(),
            config,
            next_booking_id: AtomicU64::new(1),
            next_payment_id: AtomicU64::new(1),
        }
    }

    /// Pending notification and email events, for the external dispatcher.
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn commission_rate(&self) -> Decimal {
        self.config.commission_rate
    }

    // === Vehicle catalog ===

    /// Registers a car listing as `PendingApproval`.
    pub fn register_car(&self, owner_id: UserId, spec: CarSpec) -> Result<CarId, LedgerError> {
        self.catalog.register(owner_id, spec)
    }

    /// Applies an admin approval decision and notifies the owner.
    pub fn approve_car(&self, car_id: CarId, approved: bool) -> Result<(), LedgerError> {
        self.catalog.approve(car_id, approved)?;

        if let Some(car) = self.catalog.get(&car_id) {
            let (title, message, kind) = if approved {
                (
                    "Car Approved",
                    format!("Your {} has been approved and is now listed.", car.label()),
                    NotificationType::CarApproved,
                )
            } else {
                (
                    "Car Rejected",
                    format!("Your {} listing was not approved.", car.label()),
                    NotificationType::CarRejected,
                )
            };
            self.notify(car.owner_id, title, message, kind, None);
        }
        Ok(())
    }

    /// Owner toggle for the availability flag.
    pub fn set_car_availability(
        &self,
        car_id: CarId,
        requester_id: UserId,
        available: bool,
    ) -> Result<(), LedgerError> {
        self.catalog.set_availability(car_id, requester_id, available)
    }

    /// Removes a listing. Bookings and payments are retained for audit.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] / [`LedgerError::Unauthorized`].
    /// - [`LedgerError::CarInUse`] while a `Confirmed` or `InProgress`
    ///   booking exists.
    pub fn delete_car(
        &self,
        car_id: CarId,
        requester_id: UserId,
        is_admin: bool,
    ) -> Result<(), LedgerError> {
        let car = self.catalog.get(&car_id).ok_or(LedgerError::NotFound)?;
        if !is_admin && car.owner_id != requester_id {
            return Err(LedgerError::Unauthorized);
        }
        if let Some(schedule) = self.schedules.get(&car_id)
            && schedule.has_active_bookings()
        {
            return Err(LedgerError::CarInUse);
        }
        self.catalog.remove(&car_id);
        Ok(())
    }

    /// Returns a snapshot of a car listing.
    pub fn get_car(&self, car_id: CarId) -> Option<Car> {
        self.catalog.get(&car_id)
    }

    // === Booking ledger ===

    /// Creates a booking for the requester, together with its `Pending`
    /// payment record, and queues a `BookingCreated` notification for the
    /// car owner.
    ///
    /// The overlap check and the insert run as one critical section under
    /// the car's schedule mutex, so two concurrent requests for overlapping
    /// dates cannot both succeed.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::CarUnavailable`] - car missing, unapproved, or
    ///   toggled off by its owner.
    /// - [`LedgerError::DateConflict`] - a non-cancelled booking overlaps
    ///   the requested `[start, end)` range.
    pub fn create_booking(
        &self,
        requester_id: UserId,
        request: BookingRequest,
    ) -> Result<BookingView, LedgerError> {
        let car = self
            .catalog
            .get(&request.car_id)
            .ok_or(LedgerError::CarUnavailable)?;
        if !car.bookable() {
            return Err(LedgerError::CarUnavailable);
        }

        let range = DateRange::new(request.start_date, request.end_date);
        let total_price = quote(&range, car.price_per_day);

        let booking_id = BookingId(self.next_booking_id.fetch_add(1, Ordering::SeqCst));
        let booking = Booking {
            id: booking_id,
            user_id: requester_id,
            car_id: car.id,
            start_date: request.start_date,
            end_date: request.end_date,
            pickup_location: request.pickup_location.or_else(|| car.location.clone()),
            dropoff_location: request.dropoff_location.or_else(|| car.location.clone()),
            total_price,
            status: BookingStatus::Pending,
            notes: request.notes,
            created_at: Utc::now(),
            updated_at: None,
        };

        // Conflict check + insert, atomic under the schedule mutex.
        self.schedule(car.id).try_insert(booking.clone())?;
        self.booking_index.insert(booking_id, car.id);

        let payment_id = PaymentId(self.next_payment_id.fetch_add(1, Ordering::SeqCst));
        let payment = Arc::new(Payment::new(payment_id, booking_id, total_price));
        self.payments.insert(payment_id, Arc::clone(&payment));
        self.payment_index.insert(booking_id, payment_id);

        self.notify(
            car.owner_id,
            "New Booking Request",
            format!(
                "You have a new booking request for your {}. From {} to {}.",
                car.label(),
                booking.start_date.format("%b %d"),
                booking.end_date.format("%b %d"),
            ),
            NotificationType::BookingCreated,
            Some(RelatedEntity::Booking(booking_id)),
        );

        Ok(BookingView {
            payment: Some(payment.view(self.config.commission_rate)),
            booking,
        })
    }

    /// Applies a status transition on behalf of the car owner, or of an
    /// admin/manager when `can_override` is set.
    ///
    /// Queues a status notification for the client, plus a confirmation
    /// email when the new status is `Confirmed`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - unknown booking.
    /// - [`LedgerError::Unauthorized`] - requester is neither the car owner
    ///   nor overriding.
    /// - [`LedgerError::InvalidTransition`] - the transition table rejects
    ///   the write (terminal states are never left).
    pub fn update_booking_status(
        &self,
        booking_id: BookingId,
        requester_id: UserId,
        new_status: BookingStatus,
        can_override: bool,
    ) -> Result<(), LedgerError> {
        let car_id = *self
            .booking_index
            .get(&booking_id)
            .ok_or(LedgerError::NotFound)?;
        let car = self.catalog.get(&car_id).ok_or(LedgerError::NotFound)?;
        if !can_override && car.owner_id != requester_id {
            return Err(LedgerError::Unauthorized);
        }

        let schedule = self
            .schedules
            .get(&car_id)
            .ok_or(LedgerError::NotFound)?
            .clone();
        let booking = schedule.transition(booking_id, new_status)?;

        let message = match new_status {
            BookingStatus::Confirmed => "Your booking has been confirmed!",
            BookingStatus::InProgress => "Your booking is now in progress. Enjoy your ride!",
            BookingStatus::Completed => "Your booking has been completed. Thank you!",
            BookingStatus::Cancelled => "Your booking has been cancelled.",
            BookingStatus::Pending => "Your booking status has been updated.",
        };
        let kind = if new_status == BookingStatus::Confirmed {
            NotificationType::BookingConfirmed
        } else {
            NotificationType::BookingCancelled
        };
        self.notify(
            booking.user_id,
            "Booking Update",
            message.to_string(),
            kind,
            Some(RelatedEntity::Booking(booking_id)),
        );

        if new_status == BookingStatus::Confirmed {
            self.outbox
                .push(OutboxEvent::Email(EmailMessage::BookingConfirmation {
                    user_id: booking.user_id,
                    booking_id,
                    car_label: car.label(),
                    start_date: booking.start_date,
                    end_date: booking.end_date,
                }));
        }
        Ok(())
    }

    /// Cancels a booking on behalf of its client, or of an admin.
    ///
    /// A still-`Pending` companion payment becomes `Failed`; a `Paid`
    /// payment is left untouched (the settlement record survives the
    /// cancellation by design). Cancelling an already-cancelled booking is
    /// an idempotent no-op.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - unknown booking.
    /// - [`LedgerError::Unauthorized`] - non-admin requester does not own
    ///   the booking.
    /// - [`LedgerError::InvalidTransition`] - the booking is `Completed`.
    pub fn cancel_booking(
        &self,
        booking_id: BookingId,
        requester_id: UserId,
        is_admin: bool,
    ) -> Result<(), LedgerError> {
        let car_id = *self
            .booking_index
            .get(&booking_id)
            .ok_or(LedgerError::NotFound)?;
        let schedule = self
            .schedules
            .get(&car_id)
            .ok_or(LedgerError::NotFound)?
            .clone();
        let snapshot = schedule.snapshot(booking_id).ok_or(LedgerError::NotFound)?;
        if !is_admin && snapshot.user_id != requester_id {
            return Err(LedgerError::Unauthorized);
        }

        let Some(_cancelled) = schedule.cancel(booking_id)? else {
            return Ok(());
        };

        if let Some(payment_id) = self.payment_index.get(&booking_id).map(|entry| *entry)
            && let Some(payment) = self.payments.get(&payment_id)
        {
            payment.fail_if_pending();
        }

        if let Some(car) = self.catalog.get(&car_id) {
            self.notify(
                car.owner_id,
                "Booking Cancelled",
                format!("A booking for your {} has been cancelled.", car.label()),
                NotificationType::BookingCancelled,
                Some(RelatedEntity::Booking(booking_id)),
            );
        }
        Ok(())
    }

    /// Returns a booking with its nested payment.
    pub fn get_booking(&self, booking_id: BookingId) -> Option<BookingView> {
        let car_id = *self.booking_index.get(&booking_id)?;
        let booking = self.schedules.get(&car_id)?.snapshot(booking_id)?;
        Some(self.compose(booking))
    }

    /// All bookings made by a user, newest first.
    pub fn bookings_by_user(&self, user_id: UserId) -> Vec<BookingView> {
        self.collect_bookings(|booking| booking.user_id == user_id)
    }

    /// All bookings across cars owned by a user, newest first.
    pub fn bookings_by_car_owner(&self, owner_id: UserId) -> Vec<BookingView> {
        let mut views = Vec::new();
        for entry in self.schedules.iter() {
            let owned = self
                .catalog
                .get(entry.key())
                .is_some_and(|car| car.owner_id == owner_id);
            if owned {
                views.extend(entry.value().bookings().into_iter().map(|b| self.compose(b)));
            }
        }
        views.sort_by(|a, b| b.booking.created_at.cmp(&a.booking.created_at));
        views
    }

    /// One page of all bookings, newest first. Pages are 1-based.
    pub fn all_bookings(&self, page: usize, page_size: usize) -> Page<BookingView> {
        let mut views = self.collect_bookings(|_| true);
        let total_count = views.len();
        let items = views
            .drain(..)
            .skip(page.saturating_sub(1).saturating_mul(page_size))
            .take(page_size)
            .collect();
        Page {
            items,
            total_count,
            page,
            page_size,
        }
    }

    // === Payment settlement ===

    /// Settles a payment as `Paid` or `Failed`. Only the owner of the
    /// underlying car may settle - not the admin, not the client.
    ///
    /// `Paid` stamps `paid_at` and a transaction reference, confirms a
    /// still-pending booking, and queues notifications to both parties plus
    /// the payment-confirmation and owner-contact emails. `Failed` cancels
    /// the booking (unless terminal) and queues one client notification.
    ///
    /// The status write is a compare-and-swap on `Pending`: a repeated call
    /// returns [`LedgerError::AlreadySettled`] and fires nothing.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - unknown payment.
    /// - [`LedgerError::Unauthorized`] - requester does not own the car.
    /// - [`LedgerError::InvalidTransition`] - `Pending` is not a settlement
    ///   target.
    /// - [`LedgerError::AlreadySettled`] - the payment already left
    ///   `Pending`.
    pub fn update_payment_status(
        &self,
        payment_id: PaymentId,
        requester_id: UserId,
        new_status: PaymentStatus,
        payment_method: Option<String>,
        notes: Option<String>,
    ) -> Result<(), LedgerError> {
        let payment = self
            .payments
            .get(&payment_id)
            .map(|entry| entry.value().clone())
            .ok_or(LedgerError::NotFound)?;
        let booking_id = payment.booking_id();
        let car_id = *self
            .booking_index
            .get(&booking_id)
            .ok_or(LedgerError::NotFound)?;
        let car = self.catalog.get(&car_id).ok_or(LedgerError::NotFound)?;
        if car.owner_id != requester_id {
            return Err(LedgerError::Unauthorized);
        }

        // One-way CAS; everything below runs at most once per payment.
        let receipt = payment.settle(new_status, payment_method, notes)?;

        let schedule = self
            .schedules
            .get(&car_id)
            .ok_or(LedgerError::NotFound)?
            .clone();

        if new_status == PaymentStatus::Paid {
            let booking = schedule
                .confirm_on_payment(booking_id)
                .or_else(|| schedule.snapshot(booking_id));
            let Some(booking) = booking else {
                return Ok(());
            };

            let (platform_fee, owner_payout) =
                commission_split(receipt.amount, self.config.commission_rate);
            let reference = receipt.transaction_reference.clone().unwrap_or_default();
            let dates = format!(
                "{} - {}",
                booking.start_date.format("%b %d"),
                booking.end_date.format("%b %d"),
            );

            self.notify(
                booking.user_id,
                "Booking Confirmed - Your Car Is Ready",
                format!(
                    "Your booking for {} is now active.\nDates: {dates}\nAmount paid: ${}\nThe owner's contact details have been sent to your email.",
                    car.label(),
                    receipt.amount,
                ),
                NotificationType::PaymentReceived,
                Some(RelatedEntity::Payment(payment_id)),
            );
            self.notify(
                car.owner_id,
                "Payment Confirmed - Car Booked",
                format!(
                    "Your {} has been booked.\nDates: {dates}\nTotal amount: ${}\nPlatform fee ({}%): ${platform_fee}\nYour payout: ${owner_payout}",
                    car.label(),
                    receipt.amount,
                    self.config.commission_rate * dec!(100),
                ),
                NotificationType::BookingConfirmed,
                Some(RelatedEntity::Booking(booking_id)),
            );
            self.outbox
                .push(OutboxEvent::Email(EmailMessage::PaymentConfirmation {
                    user_id: booking.user_id,
                    amount: receipt.amount,
                    transaction_reference: reference,
                }));
            self.outbox
                .push(OutboxEvent::Email(EmailMessage::OwnerContact {
                    user_id: booking.user_id,
                    owner_id: car.owner_id,
                    car_label: car.label(),
                    start_date: booking.start_date,
                    end_date: booking.end_date,
                }));

            log::info!(
                "payment {payment_id} settled: amount ${}, fee ${platform_fee}, payout ${owner_payout}",
                receipt.amount,
            );
        } else {
            // Failed settlement; Pending was rejected by the CAS above.
            let booking = schedule
                .cancel_on_payment_failure(booking_id)
                .or_else(|| schedule.snapshot(booking_id));
            if let Some(booking) = booking {
                self.notify(
                    booking.user_id,
                    "Payment Failed",
                    format!(
                        "Your payment of ${} could not be processed. The booking has been cancelled.",
                        receipt.amount,
                    ),
                    NotificationType::PaymentReceived,
                    Some(RelatedEntity::Payment(payment_id)),
                );
            }
        }
        Ok(())
    }

    /// Returns a payment with its derived commission split.
    pub fn get_payment(&self, payment_id: PaymentId) -> Option<PaymentView> {
        self.payments
            .get(&payment_id)
            .map(|payment| payment.view(self.config.commission_rate))
    }

    /// Returns the unique payment for a booking.
    pub fn payment_by_booking(&self, booking_id: BookingId) -> Option<PaymentView> {
        let payment_id = *self.payment_index.get(&booking_id)?;
        self.get_payment(payment_id)
    }

    /// Payments across a user's cars, newest first.
    pub fn payments_by_owner(&self, owner_id: UserId) -> Vec<PaymentView> {
        let mut views: Vec<PaymentView> = self
            .payments
            .iter()
            .filter(|entry| {
                self.owner_of_booking(entry.value().booking_id())
                    .is_some_and(|owner| owner == owner_id)
            })
            .map(|entry| entry.value().view(self.config.commission_rate))
            .collect();
        views.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        views
    }

    /// All still-pending payments, oldest first.
    pub fn pending_payments(&self) -> Vec<PaymentView> {
        let mut views: Vec<PaymentView> = self
            .payments
            .iter()
            .filter(|entry| entry.value().status() == PaymentStatus::Pending)
            .map(|entry| entry.value().view(self.config.commission_rate))
            .collect();
        views.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        views
    }

    // === Internals ===

    fn schedule(&self, car_id: CarId) -> Arc<CarSchedule> {
        self.schedules
            .entry(car_id)
            .or_insert_with(|| Arc::new(CarSchedule::new(car_id)))
            .clone()
    }

    fn owner_of_booking(&self, booking_id: BookingId) -> Option<UserId> {
        let car_id = *self.booking_index.get(&booking_id)?;
        self.catalog.get(&car_id).map(|car| car.owner_id)
    }

    fn compose(&self, booking: Booking) -> BookingView {
        let payment = self
            .payment_index
            .get(&booking.id)
            .map(|entry| *entry)
            .and_then(|payment_id| self.payments.get(&payment_id))
            .map(|payment| payment.view(self.config.commission_rate));
        BookingView { booking, payment }
    }

    fn collect_bookings(&self, keep: impl Fn(&Booking) -> bool) -> Vec<BookingView> {
        let mut views: Vec<BookingView> = self
            .schedules
            .iter()
            .flat_map(|entry| entry.value().bookings())
            .filter(|booking| keep(booking))
            .map(|booking| self.compose(booking))
            .collect();
        views.sort_by(|a, b| b.booking.created_at.cmp(&a.booking.created_at));
        views
    }

    fn notify(
        &self,
        user_id: UserId,
        title: &str,
        message: String,
        kind: NotificationType,
        related: Option<RelatedEntity>,
    ) {
        self.outbox.push(OutboxEvent::Notification(Notification {
            user_id,
            title: title.to_string(),
            message,
            kind,
            related,
        }));
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
