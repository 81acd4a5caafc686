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

//! Notification and email outbox.
//!
//! Core operations never call delivery providers inline. They append events
//! to a lock-free queue; a [`Dispatcher`] drains the queue into
//! [`NotificationSink`]/[`EmailSink`] implementations. Delivery failures are
//! logged and swallowed, so a dead email provider can never fail or roll
//! back a booking.

use crate::base::{BookingId, PaymentId, UserId};
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// Category of an in-app notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotificationType {
    BookingCreated,
    BookingConfirmed,
    BookingCancelled,
    PaymentReceived,
    CarApproved,
    CarRejected,
}

/// Entity a notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelatedEntity {
    Booking(BookingId),
    Payment(PaymentId),
}

/// Fire-and-forget in-app notification. Not read back by the core.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    pub kind: NotificationType,
    pub related: Option<RelatedEntity>,
}

/// Outbound email, addressed by user ID; the external mailer resolves the
/// actual address.
#[derive(Debug, Clone, Serialize)]
pub enum EmailMessage {
    BookingConfirmation {
        user_id: UserId,
        booking_id: BookingId,
        car_label: String,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    },
    PaymentConfirmation {
        user_id: UserId,
        amount: Decimal,
        transaction_reference: String,
    },
    OwnerContact {
        user_id: UserId,
        owner_id: UserId,
        car_label: String,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    },
}

/// Event appended by the core and delivered by the dispatcher.
#[derive(Debug, Clone, Serialize)]
pub enum OutboxEvent {
    Notification(Notification),
    Email(EmailMessage),
}

/// Lock-free FIFO of pending outbox events.
#[derive(Debug, Default)]
pub struct Outbox {
    events: SegQueue<OutboxEvent>,
}

impl Outbox {
    pub fn new() -> Self {
        Self {
            events: SegQueue::new(),
        }
    }

    pub fn push(&self, event: OutboxEvent) {
        self.events.push(event);
    }

    pub fn pop(&self) -> Option<OutboxEvent> {
        self.events.pop()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Removes and returns all currently queued events.
    pub fn drain(&self) -> Vec<OutboxEvent> {
        let mut drained = Vec::with_capacity(self.events.len());
        while let Some(event) = self.events.pop() {
            drained.push(event);
        }
        drained
    }
}

/// Delivery failure reported by a sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("delivery failed: {0}")]
pub struct DispatchError(pub String);

/// External notification provider.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: &Notification) -> Result<(), DispatchError>;
}

/// External email provider.
pub trait EmailSink: Send + Sync {
    fn deliver(&self, email: &EmailMessage) -> Result<(), DispatchError>;
}

/// Drains an [`Outbox`] into the configured sinks.
pub struct Dispatcher<N, E> {
    notifications: N,
    emails: E,
}

impl<N: NotificationSink, E: EmailSink> Dispatcher<N, E> {
    pub fn new(notifications: N, emails: E) -> Self {
        Self {
            notifications,
            emails,
        }
    }

    /// Delivers every queued event, swallowing sink failures.
    ///
    /// Returns the number of events taken off the queue. Failed deliveries
    /// are logged and dropped; the core's state is already committed by the
    /// time events reach the outbox.
    pub fn dispatch_all(&self, outbox: &Outbox) -> usize {
        let mut dispatched = 0;
        while let Some(event) = outbox.pop() {
            dispatched += 1;
            let result = match &event {
                OutboxEvent::Notification(notification) => {
                    self.notifications.deliver(notification)
                }
                OutboxEvent::Email(email) => self.emails.deliver(email),
            };
            if let Err(e) = result {
                log::warn!("dropping undeliverable outbox event: {e}");
            }
        }
        dispatched
    }
}
