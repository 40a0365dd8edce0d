use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only timestamp type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

// ── Inventory ledger ─────────────────────────────────────────────

/// One ledger row: a room type on one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DayKey {
    pub room_type_id: Ulid,
    pub day: NaiveDate,
}

impl DayKey {
    pub fn new(room_type_id: Ulid, day: NaiveDate) -> Self {
        Self { room_type_id, day }
    }
}

/// Physical capacity of a room-type-day and how much of it is committed.
///
/// Invariant: `reserved + holds <= total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCounter {
    pub total: u32,
    pub reserved: u32,
    pub holds: u32,
}

impl DayCounter {
    pub fn with_total(total: u32) -> Self {
        Self {
            total,
            reserved: 0,
            holds: 0,
        }
    }

    pub fn committed(&self) -> u64 {
        self.reserved as u64 + self.holds as u64
    }

    /// Units still free. Negative only if the invariant was broken.
    pub fn available(&self) -> i64 {
        self.total as i64 - self.committed() as i64
    }

    pub fn is_consistent(&self) -> bool {
        self.committed() <= self.total as u64
    }
}

/// A counter plus the version it was written at. Every successful
/// compare-and-swap bumps the version by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedCounter {
    pub counter: DayCounter,
    pub version: u64,
}

/// A single-unit change to a day counter. Every ledger mutation other than
/// provisioning is one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Adjustment {
    /// `holds += 1`, requires a free unit.
    PlaceHold,
    /// `holds -= 1`.
    ReleaseHold,
    /// `holds -= 1, reserved += 1` (payment confirmed).
    ConvertHold,
    /// `reserved -= 1, holds += 1`. Only used to roll back a conversion.
    RevertConversion,
    /// `reserved -= 1` (confirmed booking cancelled).
    ReleaseReserved,
    /// `reserved += 1`. Only used to roll back a release.
    RestoreReserved,
}

impl Adjustment {
    /// Compute the counter after this adjustment, or `None` if the result
    /// would underflow or break `reserved + holds <= total`.
    pub fn apply(self, c: DayCounter) -> Option<DayCounter> {
        let next = match self {
            Adjustment::PlaceHold => {
                if c.available() <= 0 {
                    return None;
                }
                DayCounter { holds: c.holds.checked_add(1)?, ..c }
            }
            Adjustment::ReleaseHold => DayCounter { holds: c.holds.checked_sub(1)?, ..c },
            Adjustment::ConvertHold => DayCounter {
                holds: c.holds.checked_sub(1)?,
                reserved: c.reserved.checked_add(1)?,
                ..c
            },
            Adjustment::RevertConversion => DayCounter {
                reserved: c.reserved.checked_sub(1)?,
                holds: c.holds.checked_add(1)?,
                ..c
            },
            Adjustment::ReleaseReserved => DayCounter {
                reserved: c.reserved.checked_sub(1)?,
                ..c
            },
            Adjustment::RestoreReserved => {
                if c.available() <= 0 {
                    return None;
                }
                DayCounter {
                    reserved: c.reserved.checked_add(1)?,
                    ..c
                }
            }
        };
        next.is_consistent().then_some(next)
    }

    pub fn inverse(self) -> Adjustment {
        match self {
            Adjustment::PlaceHold => Adjustment::ReleaseHold,
            Adjustment::ReleaseHold => Adjustment::PlaceHold,
            Adjustment::ConvertHold => Adjustment::RevertConversion,
            Adjustment::RevertConversion => Adjustment::ConvertHold,
            Adjustment::ReleaseReserved => Adjustment::RestoreReserved,
            Adjustment::RestoreReserved => Adjustment::ReleaseReserved,
        }
    }
}

// ── Catalog ──────────────────────────────────────────────────────

/// Tax rate as an integer fraction in parts per million.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxRate {
    ppm: u32,
}

impl TaxRate {
    pub const ZERO: TaxRate = TaxRate { ppm: 0 };
    const ONE: u32 = 1_000_000;

    /// Accepts a fraction in `[0, 1]`, e.g. `0.18` for 18%.
    pub fn from_fraction(fraction: f64) -> Option<Self> {
        if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
            return None;
        }
        Some(Self {
            ppm: (fraction * Self::ONE as f64).round() as u32,
        })
    }

    pub fn from_ppm(ppm: u32) -> Option<Self> {
        (ppm <= Self::ONE).then_some(Self { ppm })
    }

    pub fn ppm(&self) -> u32 {
        self.ppm
    }

    pub fn as_fraction(&self) -> f64 {
        self.ppm as f64 / Self::ONE as f64
    }

    /// `round_half_up(base × rate)` in integer arithmetic.
    pub fn tax_on(&self, base_cents: u64) -> Option<u64> {
        let one = Self::ONE as u128;
        let scaled = base_cents as u128 * self.ppm as u128 + one / 2;
        u64::try_from(scaled / one).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hotel {
    pub id: Ulid,
    pub name: String,
    pub currency: String,
    pub tax_rate: TaxRate,
    /// Per-hotel override of the online-payment hold window.
    pub online_hold_minutes: Option<u32>,
    /// Per-hotel override of the pay-at-hotel hold window.
    pub pay_at_hotel_hold_minutes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomType {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub name: String,
    pub nightly_rate_cents: u64,
    pub currency: String,
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    PendingPayment,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
    NoShow,
}

impl ReservationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::CheckedOut | ReservationStatus::Cancelled | ReservationStatus::NoShow
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::PendingPayment => "PENDING_PAYMENT",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::CheckedIn => "CHECKED_IN",
            ReservationStatus::CheckedOut => "CHECKED_OUT",
            ReservationStatus::Cancelled => "CANCELLED",
            ReservationStatus::NoShow => "NO_SHOW",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Released by the sweeper after `hold_expires_at` passed.
    Expired,
    /// Cancelled by the guest or the front desk.
    Requested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStrategy {
    OnlineIntent,
    PayAtHotel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    pub strategy: PaymentStrategy,
    #[serde(default)]
    pub payment_intent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestBreakdown {
    pub adults: u32,
    pub children: u32,
    pub infants: u32,
}

impl GuestBreakdown {
    pub fn total(&self) -> u64 {
        self.adults as u64 + self.children as u64 + self.infants as u64
    }
}

/// Price of a stay, all amounts in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub nights: u32,
    pub nightly_rate_cents: u64,
    pub base_cents: u64,
    pub tax_cents: u64,
    pub total_cents: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub room_type_id: Ulid,
    pub rate_plan_id: Ulid,
    /// Half-open stay `[check_in, check_out)`.
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: u32,
    pub guest_breakdown: Option<GuestBreakdown>,
    pub customer: Customer,
    pub currency: String,
    pub quote: Quote,
    pub status: ReservationStatus,
    /// `None` once the reservation left `PENDING_PAYMENT`.
    pub hold_expires_at: Option<Ms>,
    pub folio_id: Ulid,
    pub payment: PaymentInfo,
    pub cancel_reason: Option<CancelReason>,
    pub idempotency_key: String,
    pub metadata: BTreeMap<String, String>,
    pub created_at: Ms,
}

impl Reservation {
    pub fn total_amount_cents(&self) -> u64 {
        self.quote.total_cents
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folio {
    pub id: Ulid,
    pub reservation_id: Ulid,
    pub currency: String,
    pub balance_cents: i64,
}

// ── Booking request / response ───────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub idempotency_key: String,
    pub hotel_id: Ulid,
    pub room_type_id: Ulid,
    pub rate_plan_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: u32,
    #[serde(default)]
    pub guest_breakdown: Option<GuestBreakdown>,
    pub customer: Customer,
    pub currency: String,
    pub payment: PaymentInfo,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl BookingRequest {
    /// Stable checksum of the whole request body, used to detect an
    /// idempotency key being reused for a different booking.
    pub fn fingerprint(&self) -> u32 {
        let bytes = bincode::serialize(self).unwrap_or_default();
        crc32fast::hash(&bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingReceipt {
    pub reservation_id: Ulid,
    pub status: ReservationStatus,
    pub folio_id: Ulid,
    pub hold_expires_at: Ms,
}

/// Serialized form of a failed request, as returned on the wire and as
/// remembered for an idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: u16,
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordedOutcome {
    Receipt(BookingReceipt),
    Failure(ErrorBody),
}

/// What an idempotency key answered the first time it was processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub fingerprint: u32,
    pub outcome: RecordedOutcome,
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types: flat, no nesting beyond the records they carry.
/// This is the WAL record format.
///
/// Counter events carry the row as written, with its version. Appends from
/// concurrent writers can reach the log out of CAS order, so replay keeps
/// the highest version per row instead of re-running adjustments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    HotelDefined {
        hotel: Hotel,
    },
    RoomTypeDefined {
        room_type: RoomType,
    },
    InventoryProvisioned {
        key: DayKey,
        row: VersionedCounter,
    },
    CounterAdjusted {
        key: DayKey,
        adjustment: Adjustment,
        row: VersionedCounter,
    },
    /// Written only by compaction.
    CounterRestored {
        key: DayKey,
        row: VersionedCounter,
    },
    /// Reservation, folio and the idempotency answer in one durable write.
    ReservationCreated {
        reservation: Reservation,
        folio: Folio,
        record: Option<IdempotencyRecord>,
    },
    ReservationTransitioned {
        id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
        reason: Option<CancelReason>,
        at: Ms,
    },
    IdempotencyRecorded {
        key: String,
        record: IdempotencyRecord,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryDay {
    pub day: NaiveDate,
    pub total: u32,
    pub reserved: u32,
    pub holds: u32,
    pub available: i64,
}

impl InventoryDay {
    pub fn new(day: NaiveDate, counter: DayCounter) -> Self {
        Self {
            day,
            total: counter.total,
            reserved: counter.reserved,
            holds: counter.holds,
            available: counter.available(),
        }
    }
}
