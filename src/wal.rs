//! Append-only booking journal.
//!
//! Record layout: `[u32 le: payload len][bincode Event][u32 le: crc32 of payload]`.
//! A crash can leave a partial last record. Replay drops it and everything
//! after, and reports where the intact prefix ends so the tail can be cut off
//! before new records are appended.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Largest payload replay will allocate for. A longer length prefix is treated
/// as corruption.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// One complete record, ready to write.
fn frame(event: &Event) -> io::Result<Vec<u8>> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut record = Vec::with_capacity(payload.len() + 8);
    record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    record.extend_from_slice(&payload);
    record.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(record)
}

fn open_for_append(path: &Path) -> io::Result<BufWriter<File>> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(BufWriter::new)
}

fn compaction_path(path: &Path) -> PathBuf {
    path.with_extension("wal.tmp")
}

pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length covered by the last successful `flush_sync`.
    committed_len: u64,
    /// Bytes and records buffered or written since then.
    pending_len: u64,
    pending_records: u64,
    appends_since_compact: u64,
}

/// Result of scanning a journal.
#[derive(Debug)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Offset just past the last intact record.
    pub intact_len: u64,
}

impl Wal {
    /// Open the journal at `path` for appending, creating it if missing.
    pub fn open(path: &Path) -> io::Result<Self> {
        let writer = open_for_append(path)?;
        let committed_len = writer.get_ref().metadata()?.len();
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            committed_len,
            pending_len: 0,
            pending_records: 0,
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one record. Nothing is durable until [`flush_sync`](Self::flush_sync).
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        let record = frame(event)?;
        self.writer.write_all(&record)?;
        self.pending_len += record.len() as u64;
        self.pending_records += 1;
        Ok(())
    }

    /// Commit everything buffered so far: flush, then fsync.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.committed_len += self.pending_len;
        self.appends_since_compact += self.pending_records;
        self.pending_len = 0;
        self.pending_records = 0;
        Ok(())
    }

    /// Throw away everything since the last successful commit, including any
    /// partial record a failed write left on disk.
    pub fn discard_uncommitted(&mut self) -> io::Result<()> {
        let fresh = open_for_append(&self.path)?;
        // into_parts drops the old buffer without flushing it
        let (old, _unwritten) = std::mem::replace(&mut self.writer, fresh).into_parts();
        drop(old);
        self.pending_len = 0;
        self.pending_records = 0;
        truncate(&self.path, self.committed_len)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First compaction phase: write `events` to a side file next to `path`.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(compaction_path(path))?);
        for event in events {
            out.write_all(&frame(event)?)?;
        }
        out.flush()?;
        out.get_ref().sync_all()
    }

    /// Second compaction phase: rename the side file over the journal and
    /// continue appending to it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(compaction_path(&self.path), &self.path)?;
        self.writer = open_for_append(&self.path)?;
        self.committed_len = self.writer.get_ref().metadata()?.len();
        self.pending_len = 0;
        self.pending_records = 0;
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

    /// Every intact record in the journal at `path`, in write order. A missing
    /// file is an empty journal.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let mut reader = match File::open(path) {
            Ok(f) => BufReader::new(f),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Replay {
                    events: Vec::new(),
                    intact_len: 0,
                });
            }
            Err(e) => return Err(e),
        };

        let mut events = Vec::new();
        let mut intact_len = 0;
        loop {
            match read_record(&mut reader)? {
                Record::Event(event, len) => {
                    events.push(event);
                    intact_len += len;
                }
                Record::End => break,
                Record::Truncated => {
                    warn!("WAL replay: partial record after {} events, ignoring tail", events.len());
                    break;
                }
                Record::Corrupt(what) => {
                    warn!("WAL replay: {what} after {} events, ignoring tail", events.len());
                    break;
                }
            }
        }
        Ok(Replay { events, intact_len })
    }

    /// Cut the journal at `path` back to `intact_len` bytes. Returns the number
    /// of bytes dropped; a journal that is already intact is left untouched.
    pub fn cut_torn_tail(path: &Path, intact_len: u64) -> io::Result<u64> {
        let len = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        if len <= intact_len {
            return Ok(0);
        }
        truncate(path, intact_len)?;
        Ok(len - intact_len)
    }
}

fn truncate(path: &Path, len: u64) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    file.sync_all()
}

enum Record {
    /// A decoded event and the length of its record on disk.
    Event(Event, u64),
    End,
    Truncated,
    Corrupt(&'static str),
}

fn read_record(reader: &mut impl Read) -> io::Result<Record> {
    let mut len = [0u8; 4];
    match fill(reader, &mut len)? {
        Fill::Empty => return Ok(Record::End),
        Fill::Partial => return Ok(Record::Truncated),
        Fill::Full => {}
    }
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(Record::Corrupt("oversized length prefix"));
    }

    let mut payload = vec![0u8; len];
    let mut crc = [0u8; 4];
    if !matches!(fill(reader, &mut payload)?, Fill::Full) || !matches!(fill(reader, &mut crc)?, Fill::Full) {
        return Ok(Record::Truncated);
    }
    if u32::from_le_bytes(crc) != crc32fast::hash(&payload) {
        return Ok(Record::Corrupt("checksum mismatch"));
    }
    Ok(match bincode::deserialize(&payload) {
        Ok(event) => Record::Event(event, len as u64 + 8),
        Err(_) => Record::Corrupt("undecodable payload"),
    })
}

enum Fill {
    Full,
    Partial,
    Empty,
}

/// Read exactly `buf.len()` bytes, distinguishing clean EOF from a short read.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<Fill> {
    let mut read = 0;
    while read < buf.len() {
        match reader.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(match read {
        n if n == buf.len() => Fill::Full,
        0 => Fill::Empty,
        _ => Fill::Partial,
    })
}
