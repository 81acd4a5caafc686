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

use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use rental_ledger_rs::{
    BookingId, BookingRequest, BookingStatus, CarId, CarSpec, Engine, PaymentId, PaymentStatus,
    UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;

/// Rental Ledger - Replay booking operation CSV files
///
/// Reads marketplace operations from a CSV file, replays them against a
/// fresh engine, and writes the final booking states to stdout.
#[derive(Parser, Debug)]
#[command(name = "rental-ledger-rs")]
#[command(about = "A booking engine that replays operation CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: op,actor,car,booking,payment,start,end,price,make,model,year
    /// Example: cargo run -- operations.csv > bookings.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let engine = match replay_operations(BufReader::new(file)) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error replaying operations: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_bookings(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, actor, car, booking, payment, start, end, price, make, model, year`
///
/// Car, booking, and payment IDs are assigned sequentially from 1 in file
/// order, so a row can refer to entities created by earlier rows. Each
/// booking's payment shares its ordinal.
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    actor: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option")]
    car: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option")]
    booking: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    payment: Option<u64>,
    start: Option<String>,
    end: Option<String>,
    #[serde(deserialize_with = "csv::invalid_option")]
    price: Option<Decimal>,
    make: Option<String>,
    model: Option<String>,
    #[serde(deserialize_with = "csv::invalid_option")]
    year: Option<u16>,
}

/// One replayable marketplace operation.
#[derive(Debug)]
enum Operation {
    RegisterCar {
        owner: UserId,
        spec: CarSpec,
    },
    Approve {
        car: CarId,
        approved: bool,
    },
    Book {
        client: UserId,
        request: BookingRequest,
    },
    Transition {
        booking: BookingId,
        actor: UserId,
        status: BookingStatus,
    },
    Cancel {
        booking: BookingId,
        actor: UserId,
    },
    Settle {
        payment: PaymentId,
        actor: UserId,
        outcome: PaymentStatus,
    },
}

/// Parses `YYYY-MM-DD` into a UTC midnight timestamp.
fn parse_date(field: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = field.filter(|s| !s.is_empty())?;
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

impl CsvRecord {
    /// Converts a CSV record to an operation.
    ///
    /// Returns `None` for unknown operations or missing required fields.
    fn into_operation(self) -> Option<Operation> {
        let actor = UserId(self.actor?);

        match self.op.to_lowercase().as_str() {
            "car" => Some(Operation::RegisterCar {
                owner: actor,
                spec: CarSpec {
                    make: self.make.filter(|s| !s.is_empty())?,
                    model: self.model.filter(|s| !s.is_empty())?,
                    year: self.year?,
                    price_per_day: self.price?,
                    location: None,
                },
            }),
            "approve" | "reject" => Some(Operation::Approve {
                car: CarId(self.car?),
                approved: self.op.eq_ignore_ascii_case("approve"),
            }),
            "book" => Some(Operation::Book {
                client: actor,
                request: BookingRequest {
                    car_id: CarId(self.car?),
                    start_date: parse_date(self.start.as_deref())?,
                    end_date: parse_date(self.end.as_deref())?,
                    pickup_location: None,
                    dropoff_location: None,
                    notes: None,
                },
            }),
            "confirm" | "start" | "complete" => Some(Operation::Transition {
                booking: BookingId(self.booking?),
                actor,
                status: match self.op.to_lowercase().as_str() {
                    "confirm" => BookingStatus::Confirmed,
                    "start" => BookingStatus::InProgress,
                    _ => BookingStatus::Completed,
                },
            }),
            "cancel" => Some(Operation::Cancel {
                booking: BookingId(self.booking?),
                actor,
            }),
            "pay" | "fail" => Some(Operation::Settle {
                payment: PaymentId(self.payment?),
                actor,
                outcome: if self.op.eq_ignore_ascii_case("pay") {
                    PaymentStatus::Paid
                } else {
                    PaymentStatus::Failed
                },
            }),
            _ => None,
        }
    }
}

fn apply(engine: &Engine, op: Operation) -> Result<(), rental_ledger_rs::LedgerError> {
    match op {
        Operation::RegisterCar { owner, spec } => engine.register_car(owner, spec).map(|_| ()),
        Operation::Approve { car, approved } => engine.approve_car(car, approved),
        Operation::Book { client, request } => {
            engine.create_booking(client, request).map(|_| ())
        }
        Operation::Transition {
            booking,
            actor,
            status,
        } => engine.update_booking_status(booking, actor, status, false),
        Operation::Cancel { booking, actor } => engine.cancel_booking(booking, actor, false),
        Operation::Settle {
            payment,
            actor,
            outcome,
        } => engine.update_payment_status(payment, actor, outcome, None, None),
    }
}

/// Replays operations from a CSV reader against a fresh engine.
///
/// Streaming parse; malformed rows and rejected operations are skipped
/// without stopping the replay, mirroring how a real feed keeps going past
/// a conflicting booking or a double settlement.
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn replay_operations<R: Read>(reader: R) -> Result<Engine, csv::Error> {
    let engine = Engine::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        match result {
            Ok(record) => {
                let Some(op) = record.into_operation() else {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping invalid operation record");
                    continue;
                };

                if let Err(e) = apply(&engine, op) {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping rejected operation: {}", e);
                }
            }
            Err(e) => {
                #[cfg(debug_assertions)]
                eprintln!("Skipping malformed row: {}", e);
                continue;
            }
        }
    }

    Ok(engine)
}

/// Output row for one booking and its payment.
#[derive(Debug, Serialize)]
struct BookingRow {
    booking: BookingId,
    client: UserId,
    car: CarId,
    start: String,
    end: String,
    total: Decimal,
    status: BookingStatus,
    payment_status: Option<PaymentStatus>,
    transaction_reference: Option<String>,
}

/// Writes final booking states to a CSV writer, ordered by booking ID.
///
/// Columns: `booking, client, car, start, end, total, status,
/// payment_status, transaction_reference`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_bookings<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    let mut views = engine.all_bookings(1, usize::MAX).items;
    views.sort_by_key(|view| view.booking.id);

    for view in views {
        wtr.serialize(BookingRow {
            booking: view.booking.id,
            client: view.booking.user_id,
            car: view.booking.car_id,
            start: view.booking.start_date.format("%Y-%m-%d").to_string(),
            end: view.booking.end_date.format("%Y-%m-%d").to_string(),
            total: view.booking.total_price,
            status: view.booking.status,
            payment_status: view.payment.as_ref().map(|p| p.status),
            transaction_reference: view
                .payment
                .and_then(|p| p.transaction_reference),
        })?;
    }

    wtr.flush()?;
    Ok(())
}
