use chrono::NaiveDate;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasError {
    Missing,
    Stale(VersionedCounter),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerError {
    /// No row for this room-type-day.
    Missing,
    /// The change would break the row's invariant (sold out, or nothing to release).
    Refused(DayCounter),
    /// Lost the CAS race on every attempt.
    Contended,
}

/// Per-(room type, day) capacity counters with optimistic concurrency.
///
/// Readers never block writers for longer than one shard lock; a writer
/// reads a snapshot, computes the next value without any lock held, and
/// commits only if the version is unchanged.
#[derive(Default)]
pub struct Ledger {
    rows: DashMap<DayKey, VersionedCounter>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn read(&self, key: &DayKey) -> Option<VersionedCounter> {
        self.rows.get(key).map(|row| *row)
    }

    /// Commit `next` only if the row is still at `expected_version`.
    pub fn compare_and_swap(
        &self,
        key: &DayKey,
        expected_version: u64,
        next: DayCounter,
    ) -> Result<VersionedCounter, CasError> {
        let mut row = self.rows.get_mut(key).ok_or(CasError::Missing)?;
        if row.version != expected_version {
            return Err(CasError::Stale(*row));
        }
        *row = VersionedCounter {
            counter: next,
            version: row.version + 1,
        };
        Ok(*row)
    }

    /// Read-compute-CAS loop. `compute` runs with no lock held and returns
    /// `None` to refuse the change for the value it was given.
    pub fn update_with<F>(
        &self,
        key: &DayKey,
        max_attempts: u32,
        mut compute: F,
    ) -> Result<VersionedCounter, LedgerError>
    where
        F: FnMut(DayCounter) -> Option<DayCounter>,
    {
        for _ in 0..max_attempts {
            let current = self.read(key).ok_or(LedgerError::Missing)?;
            let next = compute(current.counter).ok_or(LedgerError::Refused(current.counter))?;
            match self.compare_and_swap(key, current.version, next) {
                Ok(row) => return Ok(row),
                Err(CasError::Stale(_)) => {
                    metrics::counter!(crate::observability::CAS_CONFLICTS_TOTAL).increment(1);
                    continue;
                }
                Err(CasError::Missing) => return Err(LedgerError::Missing),
            }
        }
        Err(LedgerError::Contended)
    }

    pub fn adjust(
        &self,
        key: &DayKey,
        adjustment: Adjustment,
        max_attempts: u32,
    ) -> Result<VersionedCounter, LedgerError> {
        self.update_with(key, max_attempts, |c| adjustment.apply(c))
    }

    /// Set `total` for a day, creating the row if needed. Refuses to go
    /// below what is already committed. Returns `(previous, current)`.
    pub fn provision(
        &self,
        key: &DayKey,
        total: u32,
        max_attempts: u32,
    ) -> Result<(Option<DayCounter>, VersionedCounter), LedgerError> {
        // Shard guard from `entry` must be released before `update_with`.
        {
            if let Entry::Vacant(slot) = self.rows.entry(*key) {
                let row = VersionedCounter {
                    counter: DayCounter::with_total(total),
                    version: 0,
                };
                slot.insert(row);
                return Ok((None, row));
            }
        }
        let mut previous = None;
        let current = self.update_with(key, max_attempts, |c| {
            previous = Some(c);
            (c.committed() <= total as u64).then_some(DayCounter { total, ..c })
        })?;
        Ok((previous, current))
    }

    /// Install a logged row unless a newer version is already in place.
    /// Used by WAL replay; returns whether the row was taken.
    pub fn restore(&self, key: DayKey, row: VersionedCounter) -> bool {
        match self.rows.entry(key) {
            Entry::Occupied(mut slot) => {
                if slot.get().version >= row.version {
                    return false;
                }
                slot.insert(row);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(row);
                true
            }
        }
    }

    pub fn days(&self, room_type_id: Ulid, days: &[NaiveDate]) -> Vec<(NaiveDate, Option<DayCounter>)> {
        days.iter()
            .map(|day| (*day, self.read(&DayKey::new(room_type_id, *day)).map(|r| r.counter)))
            .collect()
    }

    /// All rows with their versions, sorted by key.
    pub fn rows(&self) -> Vec<(DayKey, VersionedCounter)> {
        let mut rows: Vec<_> = self.rows.iter().map(|e| (*e.key(), *e.value())).collect();
        rows.sort_by_key(|(k, _)| *k);
        rows
    }

    /// All counters, sorted by key.
    pub fn snapshot(&self) -> Vec<(DayKey, DayCounter)> {
        self.rows().into_iter().map(|(k, row)| (k, row.counter)).collect()
    }
}
