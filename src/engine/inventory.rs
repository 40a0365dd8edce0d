use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_ROOMS_PER_TYPE;
use crate::model::*;

use super::calendar::range_days;
use super::ledger::LedgerError;
use super::{Engine, EngineError};

/// Why a single counter change did not go through.
#[derive(Debug)]
pub(super) enum AdjustError {
    Ledger(LedgerError),
    Wal(EngineError),
}

impl Engine {
    /// CAS-apply one adjustment to one row, then make it durable. A failed
    /// WAL append rolls the in-memory change back.
    pub(super) async fn adjust_counter(&self, key: DayKey, adjustment: Adjustment) -> Result<DayCounter, AdjustError> {
        let attempts = self.options.max_cas_attempts;
        let _gate = self.commit_gate.read().await;
        let row = self
            .ledger
            .adjust(&key, adjustment, attempts)
            .map_err(AdjustError::Ledger)?;
        if let Err(e) = self.wal_append(Event::CounterAdjusted { key, adjustment, row }).await {
            self.undo_adjustment(key, adjustment.inverse()).await;
            return Err(AdjustError::Wal(e));
        }
        Ok(row.counter)
    }

    /// Apply the inverse of a change whose WAL append failed. The undone row
    /// gets a newer version than anything logged for this change, so it is
    /// logged too when the WAL accepts it.
    async fn undo_adjustment(&self, key: DayKey, inverse: Adjustment) {
        match self.ledger.adjust(&key, inverse, self.options.max_cas_attempts) {
            Ok(row) => {
                let event = Event::CounterAdjusted {
                    key,
                    adjustment: inverse,
                    row,
                };
                if let Err(e) = self.wal_append(event).await {
                    tracing::error!("rollback of {} {} is not durable: {e}", key.room_type_id, key.day);
                }
            }
            Err(undo) => tracing::error!(
                "could not roll back {} {} after WAL failure: {undo:?}",
                key.room_type_id,
                key.day
            ),
        }
    }

    /// Fast-path rejection: every night must have a row with a free unit.
    /// Reads only; the hold CAS is what actually protects capacity.
    pub fn check_availability(&self, room_type_id: Ulid, days: &[NaiveDate]) -> Result<(), EngineError> {
        for (day, row) in self.ledger.days(room_type_id, days) {
            match row {
                None => return Err(EngineError::NoInventoryRow(day)),
                Some(counter) if counter.available() <= 0 => return Err(EngineError::SoldOut(day)),
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Place one hold per night, in order. All-or-nothing: if any night
    /// fails, the nights already held by this call are released before the
    /// error is returned.
    pub async fn apply_holds(&self, room_type_id: Ulid, days: &[NaiveDate]) -> Result<(), EngineError> {
        let mut applied = Vec::with_capacity(days.len());
        for &day in days {
            match self.adjust_counter(DayKey::new(room_type_id, day), Adjustment::PlaceHold).await {
                Ok(_) => applied.push(day),
                Err(e) => {
                    let err = match e {
                        AdjustError::Ledger(LedgerError::Refused(_)) => EngineError::SoldOut(day),
                        AdjustError::Ledger(reason) => {
                            tracing::warn!("hold on {room_type_id} {day} failed: {reason:?}");
                            EngineError::HoldIncrementError(day)
                        }
                        AdjustError::Wal(wal_err) => {
                            tracing::warn!("hold on {room_type_id} {day} not durable: {wal_err}");
                            EngineError::HoldIncrementError(day)
                        }
                    };
                    if !applied.is_empty() {
                        metrics::counter!(crate::observability::HOLD_COMPENSATIONS_TOTAL).increment(1);
                        self.release_holds(room_type_id, &applied).await;
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    pub(super) async fn release_holds(&self, room_type_id: Ulid, days: &[NaiveDate]) {
        self.settle_days(room_type_id, days, Adjustment::ReleaseHold).await;
    }

    /// Apply a releasing adjustment to every night. Failures are logged,
    /// not returned: the caller has already committed to the transition
    /// and the remaining nights must still be settled.
    pub(super) async fn settle_days(&self, room_type_id: Ulid, days: &[NaiveDate], adjustment: Adjustment) -> usize {
        let mut failed = 0;
        for &day in days {
            if let Err(e) = self.adjust_counter(DayKey::new(room_type_id, day), adjustment).await {
                failed += 1;
                tracing::error!("ledger drift: {adjustment:?} on {room_type_id} {day} failed: {e:?}");
            }
        }
        failed
    }

    /// Set the physical room count for every day in `[from, to)`, creating
    /// rows as needed. Days are applied one at a time; a day whose existing
    /// commitments exceed `total` stops the call.
    pub async fn provision_inventory(
        &self,
        room_type_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
        total: u32,
    ) -> Result<Vec<InventoryDay>, EngineError> {
        if !self.room_types.contains_key(&room_type_id) {
            return Err(EngineError::RoomTypeNotFound(room_type_id));
        }
        if total > MAX_ROOMS_PER_TYPE {
            return Err(EngineError::LimitExceeded("too many rooms for one room type"));
        }
        let days = range_days(from, to)?;

        for (day, row) in self.ledger.days(room_type_id, &days) {
            if let Some(counter) = row
                && counter.committed() > total as u64
            {
                return Err(EngineError::CapacityBelowCommitted {
                    day,
                    committed: counter.committed(),
                });
            }
        }

        let attempts = self.options.max_cas_attempts;
        let mut provisioned = Vec::with_capacity(days.len());
        for day in days {
            let key = DayKey::new(room_type_id, day);
            let _gate = self.commit_gate.read().await;
            let (previous, row) = self.ledger.provision(&key, total, attempts).map_err(|e| match e {
                LedgerError::Refused(c) => EngineError::CapacityBelowCommitted {
                    day,
                    committed: c.committed(),
                },
                LedgerError::Missing | LedgerError::Contended => EngineError::CounterContended(day),
            })?;
            if let Err(e) = self.wal_append(Event::InventoryProvisioned { key, row }).await {
                let old_total = previous.map_or(0, |c| c.total);
                match self.ledger.provision(&key, old_total, attempts) {
                    Ok((_, undone)) => {
                        let event = Event::InventoryProvisioned { key, row: undone };
                        if let Err(e) = self.wal_append(event).await {
                            tracing::error!("rollback of provisioning {room_type_id} {day} is not durable: {e}");
                        }
                    }
                    Err(undo) => {
                        tracing::error!("could not roll back provisioning of {room_type_id} {day}: {undo:?}");
                    }
                }
                return Err(e);
            }
            provisioned.push(InventoryDay::new(day, row.counter));
        }

        tracing::info!(
            "provisioned {} days of room type {room_type_id} with {total} rooms from {from}",
            provisioned.len()
        );
        Ok(provisioned)
    }
}
