use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{ErrorBody, ReservationStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    InvalidDateRange {
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    InvalidRequest(&'static str),
    HotelNotFound(Ulid),
    RoomTypeNotFound(Ulid),
    ReservationNotFound(Ulid),
    FolioNotFound(Ulid),
    CurrencyMismatch {
        expected: String,
        requested: String,
    },
    IdempotencyKeyReused(String),
    NoInventoryRow(NaiveDate),
    SoldOut(NaiveDate),
    CapacityBelowCommitted {
        day: NaiveDate,
        committed: u64,
    },
    InvalidTransition {
        id: Ulid,
        status: ReservationStatus,
    },
    HoldExpired(Ulid),
    HoldActive(Ulid),
    HoldIncrementError(NaiveDate),
    /// Provisioning lost the CAS race on every attempt.
    CounterContended(NaiveDate),
    LimitExceeded(&'static str),
    /// A failure remembered for an idempotency key, replayed verbatim.
    Recorded(ErrorBody),
    WalError(String),
}

impl EngineError {
    /// Stable error code reported to clients.
    pub fn kind(&self) -> &str {
        match self {
            EngineError::InvalidDateRange { .. } => "InvalidDateRange",
            EngineError::InvalidRequest(_) => "InvalidRequest",
            EngineError::HotelNotFound(_) => "HotelNotFound",
            EngineError::RoomTypeNotFound(_) => "RoomTypeNotFound",
            EngineError::ReservationNotFound(_) => "ReservationNotFound",
            EngineError::FolioNotFound(_) => "FolioNotFound",
            EngineError::CurrencyMismatch { .. } => "CurrencyMismatch",
            EngineError::IdempotencyKeyReused(_) => "IdempotencyKeyReused",
            EngineError::NoInventoryRow(_) => "NoInventoryRow",
            EngineError::SoldOut(_) => "SoldOut",
            EngineError::CapacityBelowCommitted { .. } => "CapacityBelowCommitted",
            EngineError::InvalidTransition { .. } => "InvalidTransition",
            EngineError::HoldExpired(_) => "HoldExpired",
            EngineError::HoldActive(_) => "HoldActive",
            EngineError::HoldIncrementError(_) => "HoldIncrementError",
            EngineError::CounterContended(_) => "CounterContended",
            EngineError::LimitExceeded(_) => "LimitExceeded",
            EngineError::Recorded(body) => &body.error,
            EngineError::WalError(_) => "WalError",
        }
    }

    /// HTTP-style status code for the wire protocol.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::InvalidDateRange { .. }
            | EngineError::InvalidRequest(_)
            | EngineError::LimitExceeded(_) => 400,
            EngineError::HotelNotFound(_)
            | EngineError::RoomTypeNotFound(_)
            | EngineError::ReservationNotFound(_)
            | EngineError::FolioNotFound(_) => 404,
            EngineError::CurrencyMismatch { .. } | EngineError::IdempotencyKeyReused(_) => 422,
            EngineError::NoInventoryRow(_)
            | EngineError::SoldOut(_)
            | EngineError::CapacityBelowCommitted { .. }
            | EngineError::InvalidTransition { .. }
            | EngineError::HoldExpired(_)
            | EngineError::HoldActive(_) => 409,
            EngineError::HoldIncrementError(_) | EngineError::CounterContended(_) => 503,
            EngineError::Recorded(body) => body.status,
            EngineError::WalError(_) => 500,
        }
    }

    /// Failures fully determined by the request and the catalog. These are
    /// remembered for the idempotency key; anything depending on live
    /// inventory or storage is not, so a retry runs again.
    pub fn is_recordable(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidDateRange { .. }
                | EngineError::InvalidRequest(_)
                | EngineError::HotelNotFound(_)
                | EngineError::RoomTypeNotFound(_)
                | EngineError::CurrencyMismatch { .. }
                | EngineError::LimitExceeded(_)
        )
    }

    pub fn to_body(&self) -> ErrorBody {
        match self {
            EngineError::Recorded(body) => body.clone(),
            other => ErrorBody {
                status: other.status_code(),
                error: other.kind().to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidDateRange { check_in, check_out } => {
                write!(f, "invalid stay: check-out {check_out} is not after check-in {check_in}")
            }
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::HotelNotFound(id) => write!(f, "hotel not found: {id}"),
            EngineError::RoomTypeNotFound(id) => write!(f, "room type not found: {id}"),
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::FolioNotFound(id) => write!(f, "folio not found: {id}"),
            EngineError::CurrencyMismatch { expected, requested } => {
                write!(f, "currency {requested} does not match room type currency {expected}")
            }
            EngineError::IdempotencyKeyReused(key) => {
                write!(f, "idempotency key {key:?} was already used for a different request")
            }
            EngineError::NoInventoryRow(day) => write!(f, "no inventory provisioned for {day}"),
            EngineError::SoldOut(day) => write!(f, "sold out on {day}"),
            EngineError::CapacityBelowCommitted { day, committed } => {
                write!(f, "{day} already has {committed} rooms committed")
            }
            EngineError::InvalidTransition { id, status } => {
                write!(f, "reservation {id} cannot transition from {status}")
            }
            EngineError::HoldExpired(id) => write!(f, "hold for reservation {id} has expired"),
            EngineError::HoldActive(id) => {
                write!(f, "hold for reservation {id} has not expired yet")
            }
            EngineError::HoldIncrementError(day) => {
                write!(f, "could not place hold on {day}, retry the request")
            }
            EngineError::CounterContended(day) => {
                write!(f, "inventory for {day} is being changed concurrently, retry the request")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Recorded(body) => f.write_str(&body.message),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
