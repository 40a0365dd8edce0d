use ulid::Ulid;

use crate::model::*;

use super::calendar::stay_days;
use super::{Engine, EngineError};

/// Set the new status on a reservation. Shared by the live path and WAL
/// replay so both produce the same record.
pub(super) fn apply_transition(r: &mut Reservation, to: ReservationStatus, reason: Option<CancelReason>) {
    r.status = to;
    if to != ReservationStatus::PendingPayment {
        r.hold_expires_at = None;
    }
    if reason.is_some() {
        r.cancel_reason = reason;
    }
}

impl Engine {
    /// Compare-and-swap on the status field. `check` runs under the same
    /// shard lock, so it sees exactly the state the swap replaces.
    /// Returns the reservation as it was before the swap.
    fn cas_status(
        &self,
        id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
        reason: Option<CancelReason>,
        check: impl FnOnce(&Reservation) -> Result<(), EngineError>,
    ) -> Result<Reservation, EngineError> {
        let mut entry = self
            .reservations
            .get_mut(&id)
            .ok_or(EngineError::ReservationNotFound(id))?;
        if entry.status != from {
            return Err(EngineError::InvalidTransition {
                id,
                status: entry.status,
            });
        }
        check(entry.value())?;
        let before = entry.value().clone();
        apply_transition(entry.value_mut(), to, reason);
        Ok(before)
    }

    /// Swap the status and make it durable. The gate is released before
    /// returning, so callers can settle the ledger afterwards.
    async fn commit_transition(
        &self,
        id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
        reason: Option<CancelReason>,
        now: Ms,
        check: impl FnOnce(&Reservation) -> Result<(), EngineError>,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.commit_gate.read().await;
        let before = self.cas_status(id, from, to, reason, check)?;
        let event = Event::ReservationTransitioned {
            id,
            from,
            to,
            reason,
            at: now,
        };
        if let Err(e) = self.wal_append(event).await {
            match self.reservations.get_mut(&id) {
                Some(mut r) if r.status == to => {
                    r.status = before.status;
                    r.hold_expires_at = before.hold_expires_at;
                    r.cancel_reason = before.cancel_reason;
                }
                _ => tracing::error!("reservation {id} moved on before {from} -> {to} could be rolled back"),
            }
            return Err(e);
        }
        metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        Ok(before)
    }

    /// `PENDING_PAYMENT → CONFIRMED`, turning every night's hold into a
    /// reserved unit. Refused once the hold window has passed.
    pub async fn confirm_reservation(&self, id: Ulid, now: Ms) -> Result<Reservation, EngineError> {
        let before = self
            .commit_transition(
                id,
                ReservationStatus::PendingPayment,
                ReservationStatus::Confirmed,
                None,
                now,
                |r| match r.hold_expires_at {
                    Some(expires_at) if now >= expires_at => Err(EngineError::HoldExpired(id)),
                    _ => Ok(()),
                },
            )
            .await?;
        let days = stay_days(before.check_in, before.check_out)?;
        self.settle_days(before.room_type_id, &days, Adjustment::ConvertHold).await;
        tracing::info!("reservation {id} confirmed");
        self.get_reservation(id)
    }

    /// Release an expired hold: `PENDING_PAYMENT → CANCELLED (expired)`.
    /// Only the caller that wins the status swap touches the ledger, so a
    /// racing confirmation or a second sweeper cannot double-release.
    pub async fn expire_reservation(&self, id: Ulid, now: Ms) -> Result<Reservation, EngineError> {
        let before = self
            .commit_transition(
                id,
                ReservationStatus::PendingPayment,
                ReservationStatus::Cancelled,
                Some(CancelReason::Expired),
                now,
                |r| match r.hold_expires_at {
                    Some(expires_at) if now < expires_at => Err(EngineError::HoldActive(id)),
                    _ => Ok(()),
                },
            )
            .await?;
        let days = stay_days(before.check_in, before.check_out)?;
        self.release_holds(before.room_type_id, &days).await;
        metrics::counter!(crate::observability::HOLDS_EXPIRED_TOTAL).increment(1);
        tracing::info!("reservation {id} expired, released {} nights", days.len());
        self.get_reservation(id)
    }

    /// Cancel on request. A pending reservation gives back its holds, a
    /// confirmed one its reserved units.
    pub async fn cancel_reservation(&self, id: Ulid, now: Ms) -> Result<Reservation, EngineError> {
        let mut status = self.get_reservation(id)?.status;
        let (before, released) = loop {
            let released = match status {
                ReservationStatus::PendingPayment => Adjustment::ReleaseHold,
                ReservationStatus::Confirmed => Adjustment::ReleaseReserved,
                other => return Err(EngineError::InvalidTransition { id, status: other }),
            };
            match self
                .commit_transition(
                    id,
                    status,
                    ReservationStatus::Cancelled,
                    Some(CancelReason::Requested),
                    now,
                    |_| Ok(()),
                )
                .await
            {
                Ok(before) => break (before, released),
                // Confirmed underneath us; cancel the confirmed reservation instead.
                Err(EngineError::InvalidTransition { status: current, .. })
                    if current != status && current == ReservationStatus::Confirmed =>
                {
                    status = current;
                }
                Err(e) => return Err(e),
            }
        };
        let days = stay_days(before.check_in, before.check_out)?;
        self.settle_days(before.room_type_id, &days, released).await;
        tracing::info!("reservation {id} cancelled from {}", before.status);
        self.get_reservation(id)
    }

    pub async fn check_in(&self, id: Ulid, now: Ms) -> Result<Reservation, EngineError> {
        self.status_only(id, ReservationStatus::Confirmed, ReservationStatus::CheckedIn, now)
            .await
    }

    pub async fn check_out(&self, id: Ulid, now: Ms) -> Result<Reservation, EngineError> {
        self.status_only(id, ReservationStatus::CheckedIn, ReservationStatus::CheckedOut, now)
            .await
    }

    pub async fn mark_no_show(&self, id: Ulid, now: Ms) -> Result<Reservation, EngineError> {
        self.status_only(id, ReservationStatus::Confirmed, ReservationStatus::NoShow, now)
            .await
    }

    async fn status_only(
        &self,
        id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
        now: Ms,
    ) -> Result<Reservation, EngineError> {
        self.commit_transition(id, from, to, None, now, |_| Ok(())).await?;
        tracing::debug!("reservation {id}: {from} -> {to}");
        self.get_reservation(id)
    }
}
