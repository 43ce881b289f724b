use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Upper bound on one encoded event. A larger length prefix can only come
/// from a torn or corrupt write and ends replay.
const MAX_ENTRY_LEN: usize = 16 * 1024 * 1024;

fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

enum Entry {
    Event(Box<Event>),
    /// Clean end of file.
    End,
    /// Partial, oversized or checksum-failing entry: the unsynced tail of a crash.
    Torn(&'static str),
}

fn read_u32(reader: &mut impl Read) -> io::Result<Option<u32>> {
    let mut buf = [0u8; 4];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(Some(u32::from_le_bytes(buf))),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

fn read_entry(reader: &mut impl Read) -> io::Result<Entry> {
    let Some(len) = read_u32(reader)? else {
        return Ok(Entry::End);
    };
    let len = len as usize;
    if len > MAX_ENTRY_LEN {
        return Ok(Entry::Torn("length prefix out of range"));
    }

    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Ok(Entry::Torn("truncated payload"));
        }
        Err(e) => return Err(e),
    }
    let Some(stored_crc) = read_u32(reader)? else {
        return Ok(Entry::Torn("truncated checksum"));
    };
    if stored_crc != crc32fast::hash(&payload) {
        return Ok(Entry::Torn("checksum mismatch"));
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Entry::Event(Box::new(event))),
        Err(_) => Ok(Entry::Torn("undecodable payload")),
    }
}

/// Append-only log of hotel events.
///
/// Entry layout: `[u32 le: len][bincode: Event][u32 le: crc32 of payload]`.
/// Replay stops at the first entry that does not verify, so a crash mid-write
/// loses at most the batch that was never acknowledged.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Not durable until `flush_sync`.
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

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write the snapshot events to a side file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let file = File::create(Self::compact_path(path))?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the side file over the log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Every verified event in the log, in order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        loop {
            match read_entry(&mut reader)? {
                Entry::Event(event) => events.push(*event),
                Entry::End => break,
                Entry::Torn(reason) => {
                    tracing::warn!(
                        path = %path.display(),
                        recovered = events.len(),
                        "discarding WAL tail: {reason}"
                    );
                    break;
                }
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("hoteldb_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn room_created(number: &str) -> Event {
        Event::RoomCreated {
            room: Room {
                id: Ulid::new(),
                number: number.into(),
                room_type: "suite".into(),
                capacity: 4,
                price: Decimal::new(25000, 2),
                status: RoomStatus::Available,
                description: "Sea view".into(),
            },
        }
    }

    fn booking_created(room_id: Ulid) -> Event {
        Event::BookingCreated {
            booking: Booking {
                id: Ulid::new(),
                room_id,
                guest_id: Ulid::new(),
                check_in: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                check_out: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                status: BookingStatus::Reserved,
                total_price: Decimal::new(50000, 2),
                notes: "crib".into(),
                created_at: 1,
                updated_at: 1,
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let room = room_created("101");
        let room_id = match &room {
            Event::RoomCreated { room } => room.id,
            _ => unreachable!(),
        };
        let events = vec![
            room,
            booking_created(room_id),
            Event::BookingStatusChanged {
                id: Ulid::new(),
                room_id,
                status: BookingStatus::CheckedIn,
                room_status: Some(RoomStatus::Occupied),
                at: 2,
            },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 3);
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn prices_survive_encoding_exactly() {
        let path = tmp_path("prices.wal");
        let event = room_created("102");
        Wal::open(&path).unwrap().append(&event).unwrap();
        let replayed = Wal::replay(&path).unwrap();
        match &replayed[0] {
            Event::RoomCreated { room } => assert_eq!(room.price.to_string(), "250.00"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn replay_discards_truncated_tail() {
        let path = tmp_path("truncation.wal");
        let event = room_created("101");
        Wal::open(&path).unwrap().append(&event).unwrap();

        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap(); // length 9, two payload bytes
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn replay_stops_at_bad_checksum() {
        let path = tmp_path("corrupt_crc.wal");
        let good = room_created("101");
        let bad = Event::ServiceDeleted { id: Ulid::new() };
        Wal::open(&path).unwrap().append(&good).unwrap();
        {
            let payload = bincode::serialize(&bad).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        // Entries after the corrupt one are not trusted either.
        Wal::open(&path).unwrap().append(&room_created("102")).unwrap();

        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn replay_rejects_oversized_length() {
        let path = tmp_path("oversized.wal");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn open_creates_parent_dir() {
        let dir = std::env::temp_dir()
            .join("hoteldb_test_wal")
            .join(format!("nested_{}", Ulid::new()));
        let path = dir.join("hotel.wal");
        Wal::open(&path).unwrap();
        assert!(path.exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn compact_replaces_history() {
        let path = tmp_path("compact.wal");
        let room = room_created("101");
        let room_id = match &room {
            Event::RoomCreated { room } => room.id,
            _ => unreachable!(),
        };

        let mut wal = Wal::open(&path).unwrap();
        wal.append(&room).unwrap();
        for _ in 0..10 {
            let booking = booking_created(room_id);
            let (id, guest_id) = match &booking {
                Event::BookingCreated { booking } => (booking.id, booking.guest_id),
                _ => unreachable!(),
            };
            wal.append(&booking).unwrap();
            wal.append(&Event::BookingDeleted { id, room_id, guest_id }).unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();

        wal.compact(std::slice::from_ref(&room)).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should shrink: {after} < {before}");

        // Appends after the swap go to the new file.
        let late = Event::ServiceDeleted { id: Ulid::new() };
        wal.append(&late).unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), vec![room, late]);
    }

    #[test]
    fn buffered_appends_durable_after_flush() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (0..5).map(|i| room_created(&format!("{}", 200 + i))).collect();
        let mut wal = Wal::open(&path).unwrap();
        for e in &events {
            wal.append_buffered(e).unwrap();
        }
        wal.flush_sync().unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }
}
