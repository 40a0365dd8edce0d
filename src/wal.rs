use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Records larger than this are treated as corruption on replay.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Encode a single event as `[len][bincode][crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload = bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len()).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read one record. `Ok(None)` means the log ends here: clean EOF, a torn
/// write, or a record that fails its checksum.
fn read_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Some((event, (len + 8) as u64))),
        Err(_) => Ok(None),
    }
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// What replay recovered from disk.
#[derive(Debug, Default)]
pub struct Replayed {
    pub events: Vec<Event>,
    /// Byte length of the valid prefix. Anything after it is a torn tail.
    pub valid_len: u64,
}

/// Append-only write-ahead log of engine events.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`, where `len`
/// counts the payload only. A torn or corrupt tail ends replay and is cut
/// off when the log is reopened, so new records never land behind garbage.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the log, truncating it to `valid_len` bytes.
    pub fn open(path: &Path, valid_len: u64) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        if len > valid_len {
            tracing::warn!(
                "truncating {} bytes of torn WAL tail in {}",
                len - valid_len,
                path.display()
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append and fsync one event. Used by tests only; the engine batches
    /// with `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event without flushing.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a compacted log to the side file and fsync it. The live log
    /// is untouched until `swap_compact_file`.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(compact_path(path))?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted file over the log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        fs::rename(compact_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every valid event from disk. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Replayed> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replayed::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replayed = Replayed::default();
        while let Some((event, len)) = read_record(&mut reader)? {
            replayed.events.push(event);
            replayed.valid_len += len;
        }
        Ok(replayed)
    }
}

fn compact_path(path: &Path) -> PathBuf {
    path.with_extension("wal.tmp")
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use ulid::Ulid;

    use super::*;
    use crate::model::{Adjustment, DayCounter, DayKey, ReservationStatus, VersionedCounter};

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("staykeep_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn key(day: u32) -> DayKey {
        DayKey::new(Ulid::nil(), NaiveDate::from_ymd_opt(2024, 6, day).unwrap())
    }

    fn hold(day: u32) -> Event {
        Event::CounterAdjusted {
            key: key(day),
            adjustment: Adjustment::PlaceHold,
            row: VersionedCounter {
                counter: DayCounter { total: 4, reserved: 0, holds: 1 },
                version: 1,
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_replay.wal");
        let transition = Event::ReservationTransitioned {
            id: Ulid::new(),
            from: ReservationStatus::PendingPayment,
            to: ReservationStatus::Confirmed,
            reason: None,
            at: 1_000,
        };
        {
            let mut wal = Wal::open(&path, 0).unwrap();
            wal.append(&Event::InventoryProvisioned {
                key: key(1),
                row: VersionedCounter {
                    counter: DayCounter::with_total(4),
                    version: 0,
                },
            })
            .unwrap();
            wal.append(&hold(1)).unwrap();
            wal.append(&transition).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.events.len(), 3);
        assert_eq!(replayed.events[1], hold(1));
        assert_eq!(replayed.events[2], transition);
        assert_eq!(replayed.valid_len, fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn replay_nonexistent_file() {
        let replayed = Wal::replay(&tmp_path("missing.wal")).unwrap();
        assert!(replayed.events.is_empty());
        assert_eq!(replayed.valid_len, 0);
    }

    #[test]
    fn torn_tail_is_dropped_and_truncated() {
        let path = tmp_path("torn_tail.wal");
        {
            let mut wal = Wal::open(&path, 0).unwrap();
            wal.append(&hold(1)).unwrap();
            wal.append(&hold(2)).unwrap();
        }
        let full = fs::metadata(&path).unwrap().len();
        // Simulate a crash halfway through the second record.
        OpenOptions::new().write(true).open(&path).unwrap().set_len(full - 3).unwrap();

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.events, vec![hold(1)]);

        // Reopening cuts the tail so the next record is readable.
        {
            let mut wal = Wal::open(&path, replayed.valid_len).unwrap();
            wal.append(&hold(3)).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap().events, vec![hold(1), hold(3)]);
    }

    #[test]
    fn corrupt_crc_stops_replay() {
        let path = tmp_path("corrupt_crc.wal");
        {
            let mut wal = Wal::open(&path, 0).unwrap();
            wal.append(&hold(1)).unwrap();
            wal.append(&hold(2)).unwrap();
        }
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        assert_eq!(Wal::replay(&path).unwrap().events, vec![hold(1)]);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let mut wal = Wal::open(&path, 0).unwrap();
        for day in 1..=20 {
            wal.append(&hold(day)).unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();
        assert_eq!(wal.appends_since_compact(), 20);

        Wal::write_compact_file(&path, &[Event::CounterRestored {
            key: key(1),
            row: VersionedCounter {
                counter: DayCounter::default(),
                version: 0,
            },
        }])
        .unwrap();
        wal.swap_compact_file().unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        assert!(fs::metadata(&path).unwrap().len() < before);

        wal.append(&hold(5)).unwrap();
        let events = Wal::replay(&path).unwrap().events;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], hold(5));
    }

    #[test]
    fn buffered_appends_are_invisible_until_flushed() {
        let path = tmp_path("buffered.wal");
        let mut wal = Wal::open(&path, 0).unwrap();
        for day in 1..=5 {
            wal.append_buffered(&hold(day)).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().events.is_empty());
        wal.flush_sync().unwrap();
        assert_eq!(Wal::replay(&path).unwrap().events.len(), 5);
    }
}
