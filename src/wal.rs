use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Events per record when a compacted snapshot is written.
const SNAPSHOT_CHUNK: usize = 256;

/// Append-only log of schedule commits, one file per tenant.
///
/// Each record is one commit: `[u32: len][bincode: Vec<Event>][u32: crc32]`,
/// where `len` counts the payload only. A commit is replayed whole or not at
/// all, so a multi-entry insert can never come back half-applied.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length covered by the last successful `flush_sync`.
    durable_len: u64,
    /// Bytes and events staged since then.
    pending_len: u64,
    pending_events: u64,
    appends_since_compact: u64,
    scratch: Vec<u8>,
}

fn encode_commit(scratch: &mut Vec<u8>, events: &[Event]) -> io::Result<()> {
    scratch.clear();
    scratch.extend_from_slice(&[0u8; 4]);
    bincode::serialize_into(&mut *scratch, events)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let payload_len = u32::try_from(scratch.len() - 4)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "commit too large"))?;
    let crc = crc32fast::hash(&scratch[4..]);
    scratch[..4].copy_from_slice(&payload_len.to_le_bytes());
    scratch.extend_from_slice(&crc.to_le_bytes());
    Ok(())
}

/// Fill `buf`, or return false at end of file.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Every intact commit in the file, flattened, plus the byte length they span.
fn read_commits(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0u64;

    loop {
        let mut len_buf = [0u8; 4];
        if !read_exact_or_eof(&mut reader, &mut len_buf)? {
            break;
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        let mut crc_buf = [0u8; 4];
        if !read_exact_or_eof(&mut reader, &mut payload)?
            || !read_exact_or_eof(&mut reader, &mut crc_buf)?
        {
            warn!("WAL {}: torn commit at byte {valid_len}", path.display());
            break;
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            warn!("WAL {}: checksum mismatch at byte {valid_len}", path.display());
            break;
        }
        match bincode::deserialize::<Vec<Event>>(&payload) {
            Ok(commit) => events.extend(commit),
            Err(e) => {
                warn!("WAL {}: undecodable commit at byte {valid_len} ({e})", path.display());
                break;
            }
        }
        valid_len += 8 + len as u64;
    }

    Ok((events, valid_len))
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Wal {
    /// Replay the log, cut off any torn or corrupt tail so later commits stay
    /// reachable, and open it for appends.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid_len) = read_commits(path)?;
        let file = open_append(path)?;
        if file.metadata()?.len() > valid_len {
            warn!("WAL {}: truncating to {valid_len} bytes", path.display());
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            durable_len: valid_len,
            pending_len: 0,
            pending_events: 0,
            appends_since_compact: 0,
            scratch: Vec::new(),
        };
        Ok((wal, events))
    }

    /// Read-only replay.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        read_commits(path).map(|(events, _)| events)
    }

    #[cfg(test)]
    pub fn append(&mut self, events: &[Event]) -> io::Result<()> {
        self.append_buffered(events)?;
        self.flush_sync()
    }

    /// Stage one commit. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, events: &[Event]) -> io::Result<()> {
        encode_commit(&mut self.scratch, events)?;
        self.writer.write_all(&self.scratch)?;
        self.pending_len += self.scratch.len() as u64;
        self.pending_events += events.len() as u64;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.durable_len += self.pending_len;
        self.appends_since_compact += self.pending_events;
        self.pending_len = 0;
        self.pending_events = 0;
        Ok(())
    }

    /// Drop everything staged since the last `flush_sync`, in the buffer and
    /// on disk, so a failed group commit leaves no trace in the log.
    pub fn rollback(&mut self) -> io::Result<()> {
        let file = open_append(&self.path)?;
        file.set_len(self.durable_len)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands back the unwritten buffer instead of flushing it on drop
        let _ = stale.into_parts();
        self.pending_len = 0;
        self.pending_events = 0;
        Ok(())
    }

    /// Write `events` to a temp file next to the log as a fsynced snapshot.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        let mut scratch = Vec::new();
        for chunk in events.chunks(SNAPSHOT_CHUNK) {
            encode_commit(&mut scratch, chunk)?;
            writer.write_all(&scratch)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = open_append(&self.path)?;
        self.durable_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.pending_len = 0;
        self.pending_events = 0;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Events made durable since the log was opened or last compacted.
    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}
