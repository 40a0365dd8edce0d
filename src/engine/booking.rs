use std::time::Instant;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::calendar::stay_days;
use super::idempotency::Claim;
use super::pricing::quote;
use super::{Engine, EngineError};

/// How long a pending reservation may hold inventory, per payment strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldPolicy {
    pub online_intent: Ms,
    pub pay_at_hotel: Ms,
}

impl Default for HoldPolicy {
    fn default() -> Self {
        Self {
            online_intent: 20 * MINUTE_MS,
            pay_at_hotel: 60 * MINUTE_MS,
        }
    }
}

impl HoldPolicy {
    /// Apply a hotel's overrides on top of these defaults.
    pub fn for_hotel(&self, hotel: &Hotel) -> HoldPolicy {
        HoldPolicy {
            online_intent: hotel
                .online_hold_minutes
                .map_or(self.online_intent, |m| m as Ms * MINUTE_MS),
            pay_at_hotel: hotel
                .pay_at_hotel_hold_minutes
                .map_or(self.pay_at_hotel, |m| m as Ms * MINUTE_MS),
        }
    }

    pub fn window(&self, strategy: PaymentStrategy) -> Ms {
        match strategy {
            PaymentStrategy::OnlineIntent => self.online_intent,
            PaymentStrategy::PayAtHotel => self.pay_at_hotel,
        }
    }
}

/// Everything resolved before inventory is touched.
struct PricedStay {
    days: Vec<NaiveDate>,
    hotel: Hotel,
    room_type: RoomType,
    quote: Quote,
}

impl Engine {
    /// Create a `PENDING_PAYMENT` reservation holding one unit of the room
    /// type on every night of the stay.
    ///
    /// Replaying an idempotency key returns the first answer without
    /// touching inventory. Concurrent requests with the same key wait for
    /// the first one to finish.
    pub async fn create_reservation(&self, request: BookingRequest, now: Ms) -> Result<BookingReceipt, EngineError> {
        let started = Instant::now();
        validate_idempotency_key(&request.idempotency_key)?;
        let fingerprint = request.fingerprint();

        let claim = loop {
            match self.idempotency.claim(&request.idempotency_key) {
                Claim::Owner(guard) => break guard,
                Claim::Replay(record) => {
                    metrics::counter!(crate::observability::IDEMPOTENT_REPLAYS_TOTAL).increment(1);
                    tracing::debug!("replaying idempotency key {:?}", request.idempotency_key);
                    return replay(record, fingerprint, &request.idempotency_key);
                }
                Claim::Wait(mut rx) => {
                    // Resolves once the owner finishes or gives up.
                    let _ = rx.changed().await;
                }
            }
        };

        let result = match self.execute_booking(&request, fingerprint, now).await {
            Ok((receipt, record)) => {
                claim.complete(record);
                Ok(receipt)
            }
            Err(e) if e.is_recordable() => {
                let record = IdempotencyRecord {
                    fingerprint,
                    outcome: RecordedOutcome::Failure(e.to_body()),
                };
                let event = Event::IdempotencyRecorded {
                    key: request.idempotency_key.clone(),
                    record: record.clone(),
                };
                let persisted = {
                    let _gate = self.commit_gate.read().await;
                    self.wal_append(event).await
                };
                match persisted {
                    Ok(()) => claim.complete(record),
                    Err(wal_err) => {
                        tracing::warn!("could not record failure for {:?}: {wal_err}", claim.key());
                    }
                }
                Err(e)
            }
            Err(e) => Err(e),
        };

        let outcome = match &result {
            Ok(_) => "created",
            Err(e) => e.kind(),
        };
        metrics::counter!(crate::observability::BOOKINGS_TOTAL, "outcome" => outcome.to_string()).increment(1);
        metrics::histogram!(crate::observability::BOOKING_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_booking(
        &self,
        request: &BookingRequest,
        fingerprint: u32,
        now: Ms,
    ) -> Result<(BookingReceipt, IdempotencyRecord), EngineError> {
        let stay = self.price_stay(request)?;

        self.check_availability(stay.room_type.id, &stay.days)?;
        self.apply_holds(stay.room_type.id, &stay.days).await?;

        match self.write_reservation(request, &stay, fingerprint, now).await {
            Ok(written) => Ok(written),
            Err(e) => {
                self.release_holds(stay.room_type.id, &stay.days).await;
                Err(e)
            }
        }
    }

    /// Expand the stay, validate the request and price it against the catalog.
    fn price_stay(&self, request: &BookingRequest) -> Result<PricedStay, EngineError> {
        let days = stay_days(request.check_in, request.check_out)?;
        validate_request(request)?;

        let hotel = self
            .hotel(request.hotel_id)
            .ok_or(EngineError::HotelNotFound(request.hotel_id))?;
        let room_type = self
            .room_type(request.room_type_id)
            .filter(|rt| rt.hotel_id == hotel.id)
            .ok_or(EngineError::RoomTypeNotFound(request.room_type_id))?;
        if !room_type.currency.eq_ignore_ascii_case(&request.currency) {
            return Err(EngineError::CurrencyMismatch {
                expected: room_type.currency.clone(),
                requested: request.currency.clone(),
            });
        }
        let quote = quote(room_type.nightly_rate_cents, days.len(), hotel.tax_rate)?;

        Ok(PricedStay {
            days,
            hotel,
            room_type,
            quote,
        })
    }

    /// Create the folio and the reservation in one WAL record, together
    /// with the idempotency answer for the request.
    async fn write_reservation(
        &self,
        request: &BookingRequest,
        stay: &PricedStay,
        fingerprint: u32,
        now: Ms,
    ) -> Result<(BookingReceipt, IdempotencyRecord), EngineError> {
        let policy = self.options.hold_policy.for_hotel(&stay.hotel);
        let hold_expires_at = now + policy.window(request.payment.strategy);

        let reservation_id = Ulid::new();
        let folio = Folio {
            id: Ulid::new(),
            reservation_id,
            currency: stay.room_type.currency.clone(),
            balance_cents: 0,
        };
        let reservation = Reservation {
            id: reservation_id,
            hotel_id: stay.hotel.id,
            room_type_id: stay.room_type.id,
            rate_plan_id: request.rate_plan_id,
            check_in: request.check_in,
            check_out: request.check_out,
            guests: request.guests,
            guest_breakdown: request.guest_breakdown,
            customer: request.customer.clone(),
            currency: stay.room_type.currency.clone(),
            quote: stay.quote,
            status: ReservationStatus::PendingPayment,
            hold_expires_at: Some(hold_expires_at),
            folio_id: folio.id,
            payment: request.payment.clone(),
            cancel_reason: None,
            idempotency_key: request.idempotency_key.clone(),
            metadata: request.metadata.clone(),
            created_at: now,
        };
        let receipt = BookingReceipt {
            reservation_id,
            status: ReservationStatus::PendingPayment,
            folio_id: folio.id,
            hold_expires_at,
        };
        let record = IdempotencyRecord {
            fingerprint,
            outcome: RecordedOutcome::Receipt(receipt.clone()),
        };

        let _gate = self.commit_gate.read().await;
        self.wal_append(Event::ReservationCreated {
            reservation: reservation.clone(),
            folio: folio.clone(),
            record: Some(record.clone()),
        })
        .await?;
        self.folios.insert(folio.id, folio);
        self.reservations.insert(reservation_id, reservation);

        tracing::info!(
            "reservation {reservation_id} pending payment: room type {} {}..{} total {} {}",
            stay.room_type.id,
            request.check_in,
            request.check_out,
            stay.quote.total_cents,
            stay.room_type.currency
        );
        Ok((receipt, record))
    }
}

fn replay(record: IdempotencyRecord, fingerprint: u32, key: &str) -> Result<BookingReceipt, EngineError> {
    if record.fingerprint != fingerprint {
        return Err(EngineError::IdempotencyKeyReused(key.to_string()));
    }
    match record.outcome {
        RecordedOutcome::Receipt(receipt) => Ok(receipt),
        RecordedOutcome::Failure(body) => Err(EngineError::Recorded(body)),
    }
}

fn validate_idempotency_key(key: &str) -> Result<(), EngineError> {
    if key.trim().is_empty() {
        return Err(EngineError::InvalidRequest("idempotency key is required"));
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(EngineError::LimitExceeded("idempotency key too long"));
    }
    Ok(())
}

fn validate_request(request: &BookingRequest) -> Result<(), EngineError> {
    if request.guests == 0 {
        return Err(EngineError::InvalidRequest("guest count must be positive"));
    }
    if request.guests > MAX_GUESTS {
        return Err(EngineError::LimitExceeded("too many guests"));
    }
    if let Some(breakdown) = &request.guest_breakdown {
        if breakdown.total() != request.guests as u64 {
            return Err(EngineError::InvalidRequest("guest breakdown does not add up to guest count"));
        }
        if breakdown.adults == 0 {
            return Err(EngineError::InvalidRequest("at least one adult is required"));
        }
    }

    let customer = &request.customer;
    if customer.name.trim().is_empty() {
        return Err(EngineError::InvalidRequest("customer name is required"));
    }
    if customer.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("customer name too long"));
    }
    if customer.email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("customer email too long"));
    }
    if !customer.email.contains('@') {
        return Err(EngineError::InvalidRequest("customer email is invalid"));
    }
    if customer.phone.as_ref().is_some_and(|p| p.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("customer phone too long"));
    }

    if request.currency.trim().is_empty() {
        return Err(EngineError::InvalidRequest("currency is required"));
    }
    if request
        .payment
        .payment_intent_id
        .as_ref()
        .is_some_and(|id| id.len() > MAX_NAME_LEN)
    {
        return Err(EngineError::LimitExceeded("payment intent id too long"));
    }

    if request.metadata.len() > MAX_METADATA_ENTRIES {
        return Err(EngineError::LimitExceeded("too many metadata entries"));
    }
    if request
        .metadata
        .iter()
        .any(|(k, v)| k.len() > MAX_NAME_LEN || v.len() > MAX_METADATA_VALUE_LEN)
    {
        return Err(EngineError::LimitExceeded("metadata entry too long"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hotel(online: Option<u32>, at_hotel: Option<u32>) -> Hotel {
        Hotel {
            id: Ulid::new(),
            name: "Casa Colonial".into(),
            currency: "USD".into(),
            tax_rate: TaxRate::ZERO,
            online_hold_minutes: online,
            pay_at_hotel_hold_minutes: at_hotel,
        }
    }

    #[test]
    fn default_windows() {
        let policy = HoldPolicy::default();
        assert_eq!(policy.window(PaymentStrategy::OnlineIntent), 20 * MINUTE_MS);
        assert_eq!(policy.window(PaymentStrategy::PayAtHotel), 60 * MINUTE_MS);
    }

    #[test]
    fn hotel_overrides_one_window() {
        let policy = HoldPolicy::default().for_hotel(&hotel(Some(5), None));
        assert_eq!(policy.window(PaymentStrategy::OnlineIntent), 5 * MINUTE_MS);
        assert_eq!(policy.window(PaymentStrategy::PayAtHotel), 60 * MINUTE_MS);
    }

    #[test]
    fn idempotency_key_validation() {
        assert!(validate_idempotency_key("abc").is_ok());
        assert!(matches!(
            validate_idempotency_key("  "),
            Err(EngineError::InvalidRequest(_))
        ));
        let long = "k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1);
        assert!(matches!(
            validate_idempotency_key(&long),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn replay_rejects_different_fingerprint() {
        let record = IdempotencyRecord {
            fingerprint: 1,
            outcome: RecordedOutcome::Failure(ErrorBody {
                status: 400,
                error: "InvalidDateRange".into(),
                message: "m".into(),
            }),
        };
        assert!(matches!(
            replay(record.clone(), 2, "k"),
            Err(EngineError::IdempotencyKeyReused(_))
        ));
        match replay(record, 1, "k") {
            Err(EngineError::Recorded(body)) => assert_eq!(body.error, "InvalidDateRange"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
