mod booking;
mod calendar;
mod catalog;
mod compact;
mod error;
mod idempotency;
mod inventory;
mod ledger;
mod lifecycle;
mod pricing;
mod queries;

pub use booking::HoldPolicy;
pub use calendar::{range_days, stay_days};
pub use error::EngineError;
pub use idempotency::{AlreadyRecorded, Claim, ClaimGuard, IdempotencyStore};
pub use ledger::{CasError, Ledger, LedgerError};
pub use pricing::quote;

use std::io;
use std::path::PathBuf;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

/// Tunables resolved once per engine (i.e. per tenant).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// CAS attempts per counter change before giving up with `HoldIncrementError`.
    pub max_cas_attempts: u32,
    /// Hold windows used when a hotel does not override them.
    pub hold_policy: HoldPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_cas_attempts: 8,
            hold_policy: HoldPolicy::default(),
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// The per-tenant reservation engine: inventory ledger, reservations,
/// folios, catalog and idempotency records, all in memory and rebuilt
/// from the WAL on startup.
pub struct Engine {
    pub(super) ledger: Ledger,
    pub(super) reservations: DashMap<Ulid, Reservation>,
    pub(super) folios: DashMap<Ulid, Folio>,
    pub(super) hotels: DashMap<Ulid, Hotel>,
    pub(super) room_types: DashMap<Ulid, RoomType>,
    pub(super) idempotency: IdempotencyStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold a read guard across "apply + WAL append"; compaction
    /// takes the write guard so its snapshot never misses an in-flight change.
    pub(super) commit_gate: RwLock<()>,
    pub(super) options: EngineOptions,
}

impl Engine {
    pub fn new(wal_path: PathBuf, options: EngineOptions) -> io::Result<Self> {
        let replayed = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path, replayed.valid_len)?;
        let events = replayed.events;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            ledger: Ledger::new(),
            reservations: DashMap::new(),
            folios: DashMap::new(),
            hotels: DashMap::new(),
            room_types: DashMap::new(),
            idempotency: IdempotencyStore::new(),
            wal_tx,
            commit_gate: RwLock::new(()),
            options,
        };

        for event in &events {
            engine.apply_event(event);
        }
        if !events.is_empty() {
            tracing::info!(
                "replayed {} events from {}: {} reservations, {} ledger rows",
                events.len(),
                wal_path.display(),
                engine.reservations.len(),
                engine.ledger.len()
            );
        }

        Ok(engine)
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Apply a replayed event to in-memory state. Live code paths mutate
    /// state themselves (under CAS) and only append the event.
    fn apply_event(&self, event: &Event) {
        match event {
            Event::HotelDefined { hotel } => {
                self.hotels.insert(hotel.id, hotel.clone());
            }
            Event::RoomTypeDefined { room_type } => {
                self.room_types.insert(room_type.id, room_type.clone());
            }
            Event::InventoryProvisioned { key, row }
            | Event::CounterAdjusted { key, row, .. }
            | Event::CounterRestored { key, row } => {
                self.ledger.restore(*key, *row);
            }
            Event::ReservationCreated {
                reservation,
                folio,
                record,
            } => {
                if let Some(record) = record {
                    let _ = self.idempotency.put(reservation.idempotency_key.clone(), record.clone());
                }
                self.folios.insert(folio.id, folio.clone());
                self.reservations.insert(reservation.id, reservation.clone());
            }
            Event::ReservationTransitioned { id, to, reason, .. } => {
                if let Some(mut r) = self.reservations.get_mut(id) {
                    lifecycle::apply_transition(r.value_mut(), *to, *reason);
                }
            }
            Event::IdempotencyRecorded { key, record } => {
                let _ = self.idempotency.put(key.clone(), record.clone());
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
