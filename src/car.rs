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

//! Vehicle catalog.
//!
//! Cars enter the catalog as `PendingApproval` and become bookable only
//! after an admin approval moves them to `Available` with the owner's
//! availability toggle on.

use crate::base::{CarId, UserId};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// Approval and operational status of a car listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CarStatus {
    PendingApproval,
    Available,
    Rented,
    Maintenance,
    Unavailable,
}

/// Descriptive fields supplied by the owner when listing a car.
#[derive(Debug, Clone)]
pub struct CarSpec {
    pub make: String,
    pub model: String,
    pub year: u16,
    pub price_per_day: Decimal,
    pub location: Option<String>,
}

/// A rentable vehicle.
#[derive(Debug, Clone, Serialize)]
pub struct Car {
    pub id: CarId,
    pub owner_id: UserId,
    pub make: String,
    pub model: String,
    pub year: u16,
    pub price_per_day: Decimal,
    pub location: Option<String>,
    pub status: CarStatus,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Car {
    /// Human-readable label used in notifications and emails.
    pub fn label(&self) -> String {
        format!("{} {} {}", self.year, self.make, self.model)
    }

    /// A car may be the target of a new booking only when approved and
    /// toggled on by its owner.
    pub fn bookable(&self) -> bool {
        self.status == CarStatus::Available && self.is_available
    }
}

/// Catalog of car listings, keyed by car ID.
#[derive(Debug, Default)]
pub struct CarCatalog {
    cars: DashMap<CarId, Car>,
    next_id: AtomicU32,
}

impl CarCatalog {
    pub fn new() -> Self {
        Self {
            cars: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Registers a new listing as `PendingApproval`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidPrice`] if `price_per_day` is negative.
    pub fn register(&self, owner_id: UserId, spec: CarSpec) -> Result<CarId, LedgerError> {
        if spec.price_per_day < Decimal::ZERO {
            return Err(LedgerError::InvalidPrice);
        }

        let id = CarId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.cars.insert(
            id,
            Car {
                id,
                owner_id,
                make: spec.make,
                model: spec.model,
                year: spec.year,
                price_per_day: spec.price_per_day,
                location: spec.location,
                status: CarStatus::PendingApproval,
                is_available: true,
                created_at: Utc::now(),
                updated_at: None,
            },
        );
        Ok(id)
    }

    /// Applies an admin approval decision to a pending listing.
    ///
    /// Approved listings become `Available`; rejected ones `Unavailable`.
    /// Only `PendingApproval` cars can be decided.
    pub fn approve(&self, car_id: CarId, approved: bool) -> Result<(), LedgerError> {
        let mut car = self.cars.get_mut(&car_id).ok_or(LedgerError::NotFound)?;
        if car.status != CarStatus::PendingApproval {
            return Err(LedgerError::InvalidTransition);
        }
        car.status = if approved {
            CarStatus::Available
        } else {
            CarStatus::Unavailable
        };
        car.updated_at = Some(Utc::now());
        Ok(())
    }

    /// Toggles the owner's availability flag. Owner only.
    pub fn set_availability(
        &self,
        car_id: CarId,
        requester_id: UserId,
        available: bool,
    ) -> Result<(), LedgerError> {
        let mut car = self.cars.get_mut(&car_id).ok_or(LedgerError::NotFound)?;
        if car.owner_id != requester_id {
            return Err(LedgerError::Unauthorized);
        }
        car.is_available = available;
        car.updated_at = Some(Utc::now());
        Ok(())
    }

    /// Returns a snapshot of a listing.
    pub fn get(&self, car_id: &CarId) -> Option<Car> {
        self.cars.get(car_id).map(|car| car.clone())
    }

    pub(crate) fn remove(&self, car_id: &CarId) -> Option<Car> {
        self.cars.remove(car_id).map(|(_, car)| car)
    }

    pub fn len(&self) -> usize {
        self.cars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cars.is_empty()
    }
}
