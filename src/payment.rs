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

//! Payment settlement.
//!
//! Implemented state machine:
//!
//  Payment (Pending) ──settle paid───► Payment (Paid)    [booking -> Confirmed]
//         │
//         └──────────settle failed──► Payment (Failed)  [booking -> Cancelled]
//!
//! Settlement is one-way: the status write is a compare-and-swap on
//! `Pending`, so replaying a settlement can neither regenerate a transaction
//! reference nor re-fire side effects. The platform fee and owner payout are
//! derived on read, never stored.

use crate::base::{BookingId, PaymentId};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Settlement status of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

/// Splits an amount into `(platform_fee, owner_payout)` for a commission
/// rate in `[0, 1]`.
///
/// The payout is defined as the exact remainder, so the two parts always
/// sum to the amount with no rounding drift.
pub fn commission_split(amount: Decimal, rate: Decimal) -> (Decimal, Decimal) {
    let platform_fee = amount * rate;
    (platform_fee, amount - platform_fee)
}

/// Generates a `TXN-`-prefixed reference: 8 uppercase hex characters drawn
/// from a v4 UUID. Uniqueness is best-effort, not enforced.
fn new_transaction_reference() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("TXN-{}", hex[..8].to_uppercase())
}

#[derive(Debug)]
struct PaymentData {
    id: PaymentId,
    booking_id: BookingId,
    amount: Decimal,
    status: PaymentStatus,
    payment_method: Option<String>,
    transaction_reference: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
}

impl PaymentData {
    fn assert_invariants(&self) {
        debug_assert_eq!(
            self.status == PaymentStatus::Paid,
            self.transaction_reference.is_some(),
            "Invariant violated: transaction reference set iff status is Paid"
        );
        debug_assert_eq!(
            self.status == PaymentStatus::Paid,
            self.paid_at.is_some(),
            "Invariant violated: paid_at set iff status is Paid"
        );
    }
}

/// Monetary settlement record, tied 1:1 to a booking.
#[derive(Debug)]
pub struct Payment {
    inner: Mutex<PaymentData>,
}

/// Snapshot of a settled (or not yet settled) payment, returned by the
/// settlement call so the engine can build notifications without re-locking.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SettlementReceipt {
    pub(crate) amount: Decimal,
    pub(crate) transaction_reference: Option<String>,
}

impl Payment {
    pub(crate) fn new(id: PaymentId, booking_id: BookingId, amount: Decimal) -> Self {
        Self {
            inner: Mutex::new(PaymentData {
                id,
                booking_id,
                amount,
                status: PaymentStatus::Pending,
                payment_method: None,
                transaction_reference: None,
                notes: None,
                created_at: Utc::now(),
                paid_at: None,
            }),
        }
    }

    pub fn id(&self) -> PaymentId {
        self.inner.lock().id
    }

    pub fn booking_id(&self) -> BookingId {
        self.inner.lock().booking_id
    }

    pub fn amount(&self) -> Decimal {
        self.inner.lock().amount
    }

    pub fn status(&self) -> PaymentStatus {
        self.inner.lock().status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.lock().created_at
    }

    /// Settles the payment as `Paid` or `Failed`.
    ///
    /// The write succeeds only while the current status is `Pending`; a
    /// second settlement attempt fails without touching the record, which is
    /// what makes the engine's side effects fire at most once.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidTransition`] for a `Pending` target.
    /// - [`LedgerError::AlreadySettled`] if the payment left `Pending`.
    pub(crate) fn settle(
        &self,
        outcome: PaymentStatus,
        payment_method: Option<String>,
        notes: Option<String>,
    ) -> Result<SettlementReceipt, LedgerError> {
        if outcome == PaymentStatus::Pending {
            return Err(LedgerError::InvalidTransition);
        }

        let mut data = self.inner.lock();
        if data.status != PaymentStatus::Pending {
            return Err(LedgerError::AlreadySettled);
        }

        data.status = outcome;
        if payment_method.is_some() {
            data.payment_method = payment_method;
        }
        if notes.is_some() {
            data.notes = notes;
        }
        if outcome == PaymentStatus::Paid {
            data.paid_at = Some(Utc::now());
            data.transaction_reference = Some(new_transaction_reference());
        }
        data.assert_invariants();

        Ok(SettlementReceipt {
            amount: data.amount,
            transaction_reference: data.transaction_reference.clone(),
        })
    }

    /// Marks a still-pending payment as `Failed`; a settled payment is left
    /// untouched. Used when the booking is cancelled: a paid record survives
    /// the cancellation by design.
    pub(crate) fn fail_if_pending(&self) -> bool {
        let mut data = self.inner.lock();
        if data.status != PaymentStatus::Pending {
            return false;
        }
        data.status = PaymentStatus::Failed;
        data.assert_invariants();
        true
    }

    /// Builds a serializable snapshot, deriving the commission split from
    /// the given rate.
    pub fn view(&self, commission_rate: Decimal) -> PaymentView {
        let data = self.inner.lock();
        let (platform_fee, owner_payout) = commission_split(data.amount, commission_rate);
        PaymentView {
            id: data.id,
            booking_id: data.booking_id,
            amount: data.amount,
            status: data.status,
            payment_method: data.payment_method.clone(),
            transaction_reference: data.transaction_reference.clone(),
            notes: data.notes.clone(),
            created_at: data.created_at,
            paid_at: data.paid_at,
            platform_fee,
            owner_payout,
        }
    }
}

/// Read model for a payment, including the derived commission split.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentView {
    pub id: PaymentId,
    pub booking_id: BookingId,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub payment_method: Option<String>,
    pub transaction_reference: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub platform_fee: Decimal,
    pub owner_payout: Decimal,
}
