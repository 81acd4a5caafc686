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

//! Error types for booking and settlement operations.

use thiserror::Error;

/// Booking and settlement errors.
///
/// Every expected business-rule failure is returned as a value of this enum;
/// callers that only need a success signal can collapse it with `is_ok()`.
/// The variants keep `NotFound`, `Unauthorized`, and state-machine failures
/// distinguishable so tests and transport layers can map them precisely.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Target car is missing, unapproved, or toggled unavailable
    #[error("car is not available for booking")]
    CarUnavailable,

    /// Requested dates overlap an existing non-cancelled booking
    #[error("requested dates conflict with an existing booking")]
    DateConflict,

    /// Referenced booking, payment, or car does not exist
    #[error("record not found")]
    NotFound,

    /// Requester lacks the ownership relation required for the mutation
    #[error("requester is not permitted to perform this operation")]
    Unauthorized,

    /// Requested status is not reachable from the current status
    #[error("status transition not allowed from current state")]
    InvalidTransition,

    /// Payment was already settled (one-way Pending -> Paid/Failed)
    #[error("payment has already been settled")]
    AlreadySettled,

    /// Car still has confirmed or in-progress bookings
    #[error("car has confirmed or in-progress bookings")]
    CarInUse,

    /// Daily price must not be negative
    #[error("price per day must not be negative")]
    InvalidPrice,

    /// Commission rate must lie in [0, 1]
    #[error("commission rate must be between 0 and 1")]
    InvalidCommissionRate,
}

#[cfg(test)]
mod tests {
    use super::LedgerError;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            LedgerError::CarUnavailable.to_string(),
            "car is not available for booking"
        );
        assert_eq!(
            LedgerError::DateConflict.to_string(),
            "requested dates conflict with an existing booking"
        );
        assert_eq!(LedgerError::NotFound.to_string(), "record not found");
        assert_eq!(
            LedgerError::Unauthorized.to_string(),
            "requester is not permitted to perform this operation"
        );
        assert_eq!(
            LedgerError::InvalidTransition.to_string(),
            "status transition not allowed from current state"
        );
        assert_eq!(
            LedgerError::AlreadySettled.to_string(),
            "payment has already been settled"
        );
        assert_eq!(
            LedgerError::CarInUse.to_string(),
            "car has confirmed or in-progress bookings"
        );
        assert_eq!(
            LedgerError::InvalidPrice.to_string(),
            "price per day must not be negative"
        );
        assert_eq!(
            LedgerError::InvalidCommissionRate.to_string(),
            "commission rate must be between 0 and 1"
        );
    }

    #[test]
    fn errors_are_cloneable() {
        let error = LedgerError::DateConflict;
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
