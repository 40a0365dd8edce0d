use tokio::sync::oneshot;

use crate::model::*;

use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. Counter rows keep their versions,
    /// reservations are written in their current status.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Exclusive: no mutation is between its in-memory change and its append.
        let _gate = self.commit_gate.write().await;

        let mut events = Vec::with_capacity(
            self.hotels.len() + self.room_types.len() + self.ledger.len() + self.reservations.len(),
        );
        for hotel in self.hotels.iter() {
            events.push(Event::HotelDefined {
                hotel: hotel.value().clone(),
            });
        }
        for room_type in self.room_types.iter() {
            events.push(Event::RoomTypeDefined {
                room_type: room_type.value().clone(),
            });
        }
        for (key, row) in self.ledger.rows() {
            events.push(Event::CounterRestored { key, row });
        }

        let mut reservations: Vec<Reservation> = self.reservations.iter().map(|r| r.value().clone()).collect();
        reservations.sort_by_key(|r| r.id);
        for reservation in reservations {
            let Some(folio) = self.folios.get(&reservation.folio_id).map(|f| f.value().clone()) else {
                tracing::warn!("compact: reservation {} has no folio, skipping", reservation.id);
                continue;
            };
            let record = self.idempotency.get(&reservation.idempotency_key);
            events.push(Event::ReservationCreated {
                reservation,
                folio,
                record,
            });
        }
        for (key, record) in self.idempotency.failures() {
            events.push(Event::IdempotencyRecorded { key, record });
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        tracing::info!("compacted WAL to {count} events");
        Ok(())
    }
}
