use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

use crate::model::{IdempotencyRecord, RecordedOutcome};

enum Slot {
    /// A request owns the key and is still running. Waiters clone the
    /// receiver; it resolves when the owner's sender is dropped.
    InFlight(watch::Receiver<()>),
    Done(IdempotencyRecord),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlreadyRecorded;

/// Outcome of trying to take ownership of an idempotency key.
pub enum Claim<'a> {
    /// First caller: run the request, then `complete` the guard.
    Owner(ClaimGuard<'a>),
    /// Already answered: return the stored record.
    Replay(IdempotencyRecord),
    /// Another request holds the key: wait on the receiver, then claim again.
    Wait(watch::Receiver<()>),
}

/// Write-once `key → response` map with in-flight deduplication.
#[derive(Default)]
pub struct IdempotencyStore {
    slots: DashMap<String, Slot>,
}

impl IdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<IdempotencyRecord> {
        match self.slots.get(key)?.value() {
            Slot::Done(record) => Some(record.clone()),
            Slot::InFlight(_) => None,
        }
    }

    /// Write-once insert. A key that already has a record is never overwritten.
    pub fn put(&self, key: String, record: IdempotencyRecord) -> Result<(), AlreadyRecorded> {
        match self.slots.entry(key) {
            Entry::Occupied(mut slot) => {
                if matches!(slot.get(), Slot::Done(_)) {
                    return Err(AlreadyRecorded);
                }
                slot.insert(Slot::Done(record));
                Ok(())
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot::Done(record));
                Ok(())
            }
        }
    }

    pub fn claim(&self, key: &str) -> Claim<'_> {
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(slot) => match slot.get() {
                Slot::Done(record) => Claim::Replay(record.clone()),
                Slot::InFlight(rx) => Claim::Wait(rx.clone()),
            },
            Entry::Vacant(slot) => {
                let (done_tx, done_rx) = watch::channel(());
                slot.insert(Slot::InFlight(done_rx));
                Claim::Owner(ClaimGuard {
                    store: self,
                    key: key.to_string(),
                    finished: false,
                    _done: done_tx,
                })
            }
        }
    }

    /// Number of answered keys.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|e| matches!(e.value(), Slot::Done(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recorded failures, which are not attached to any reservation.
    pub fn failures(&self) -> Vec<(String, IdempotencyRecord)> {
        self.slots
            .iter()
            .filter_map(|e| match e.value() {
                Slot::Done(record) if matches!(record.outcome, RecordedOutcome::Failure(_)) => {
                    Some((e.key().clone(), record.clone()))
                }
                _ => None,
            })
            .collect()
    }
}

/// Ownership of an in-flight key. Dropping the guard without completing it
/// frees the key so a retry can run; either way, waiters wake up.
pub struct ClaimGuard<'a> {
    store: &'a IdempotencyStore,
    key: String,
    finished: bool,
    _done: watch::Sender<()>,
}

impl ClaimGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn complete(mut self, record: IdempotencyRecord) {
        // The slot is ours (InFlight), so this cannot hit an existing record.
        let _ = self.store.put(self.key.clone(), record);
        self.finished = true;
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.store
                .slots
                .remove_if(&self.key, |_, slot| matches!(slot, Slot::InFlight(_)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ErrorBody;

    fn record(fp: u32) -> IdempotencyRecord {
        IdempotencyRecord {
            fingerprint: fp,
            outcome: RecordedOutcome::Failure(ErrorBody {
                status: 400,
                error: "InvalidDateRange".into(),
                message: "bad dates".into(),
            }),
        }
    }

    #[test]
    fn put_is_write_once() {
        let store = IdempotencyStore::new();
        store.put("k".into(), record(1)).unwrap();
        assert_eq!(store.put("k".into(), record(2)), Err(AlreadyRecorded));
        assert_eq!(store.get("k").unwrap().fingerprint, 1);
    }

    #[test]
    fn get_missing() {
        let store = IdempotencyStore::new();
        assert!(store.get("nope").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn completed_claim_replays() {
        let store = IdempotencyStore::new();
        let Claim::Owner(guard) = store.claim("k") else {
            panic!("first claim must own the key");
        };
        assert!(matches!(store.claim("k"), Claim::Wait(_)));
        assert!(store.get("k").is_none());

        guard.complete(record(7));
        match store.claim("k") {
            Claim::Replay(r) => assert_eq!(r.fingerprint, 7),
            _ => panic!("expected replay"),
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn abandoned_claim_frees_key() {
        let store = IdempotencyStore::new();
        {
            let Claim::Owner(_guard) = store.claim("k") else {
                panic!("first claim must own the key");
            };
        }
        assert!(matches!(store.claim("k"), Claim::Owner(_)));
    }

    #[tokio::test]
    async fn waiter_wakes_when_owner_completes() {
        let store = std::sync::Arc::new(IdempotencyStore::new());
        let Claim::Owner(guard) = store.claim("k") else {
            panic!("first claim must own the key");
        };
        let Claim::Wait(mut rx) = store.claim("k") else {
            panic!("second claim must wait");
        };

        let waiter = tokio::spawn(async move {
            let _ = rx.changed().await;
        });
        guard.complete(record(3));
        waiter.await.unwrap();

        assert!(matches!(store.claim("k"), Claim::Replay(_)));
    }

    #[test]
    fn failures_lists_only_failed_records() {
        let store = IdempotencyStore::new();
        store.put("bad".into(), record(1)).unwrap();
        store
            .put(
                "good".into(),
                IdempotencyRecord {
                    fingerprint: 2,
                    outcome: RecordedOutcome::Receipt(crate::model::BookingReceipt {
                        reservation_id: ulid::Ulid::new(),
                        status: crate::model::ReservationStatus::PendingPayment,
                        folio_id: ulid::Ulid::new(),
                        hold_expires_at: 0,
                    }),
                },
            )
            .unwrap();
        let failures = store.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "bad");
    }
}
