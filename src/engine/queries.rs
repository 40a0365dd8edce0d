use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::calendar::range_days;
use super::{Engine, EngineError};

impl Engine {
    pub fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.reservations
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(EngineError::ReservationNotFound(id))
    }

    pub fn get_folio(&self, id: Ulid) -> Result<Folio, EngineError> {
        self.folios
            .get(&id)
            .map(|f| f.value().clone())
            .ok_or(EngineError::FolioNotFound(id))
    }

    /// Counters for `[from, to)`. Days without a row are omitted.
    pub fn inventory(&self, room_type_id: Ulid, from: NaiveDate, to: NaiveDate) -> Result<Vec<InventoryDay>, EngineError> {
        if !self.room_types.contains_key(&room_type_id) {
            return Err(EngineError::RoomTypeNotFound(room_type_id));
        }
        let days = range_days(from, to)?;
        Ok(self
            .ledger
            .days(room_type_id, &days)
            .into_iter()
            .filter_map(|(day, row)| row.map(|counter| InventoryDay::new(day, counter)))
            .collect())
    }

    /// Pending reservations whose hold window has passed at `now`.
    pub fn collect_expired(&self, now: Ms) -> Vec<Ulid> {
        self.reservations
            .iter()
            .filter(|r| {
                r.status == ReservationStatus::PendingPayment && r.hold_expires_at.is_some_and(|at| at <= now)
            })
            .map(|r| r.id)
            .collect()
    }

    pub fn idempotency_record(&self, key: &str) -> Option<IdempotencyRecord> {
        self.idempotency.get(key)
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }
}
