use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Frame layout: `[u32 LE: payload len][bincode Event][u32 LE: crc32 of payload]`.
fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large for WAL frame"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// Fill `buf` completely. `Ok(false)` means the file ended first (torn tail).
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read the next intact frame, or `None` at EOF / torn write / checksum mismatch.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<Event>> {
    let mut word = [0u8; 4];
    if !read_full(reader, &mut word)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(word) as usize];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload).ok())
}

/// Every intact event plus the byte length they cover. A missing file is an empty log.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut intact = 0u64;
    while let Some(event) = read_frame(&mut reader)? {
        intact = reader.stream_position()?;
        events.push(event);
    }
    Ok((events, intact))
}

/// Append-only log of hotel state changes. The engine replays it on startup.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length and append count as of the last successful `flush_sync`.
    committed_len: u64,
    committed_appends: u64,
    /// Set when a failed batch could not be rolled back; every later write fails.
    poisoned: Option<String>,
}

impl Wal {
    /// Open for appending. A torn or corrupt tail left by a crash is cut off
    /// first so new frames land directly after the last intact one.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (_, intact) = scan(path)?;
        let file = Self::open_append(path)?;
        if file.metadata()?.len() > intact {
            file.set_len(intact)?;
            file.sync_all()?;
        }
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            committed_len: intact,
            committed_appends: 0,
            poisoned: None,
        })
    }

    fn check_poisoned(&self) -> io::Result<()> {
        match &self.poisoned {
            Some(reason) => Err(io::Error::other(format!("WAL unusable after failed rollback: {reason}"))),
            None => Ok(()),
        }
    }

    fn open_append(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Buffer one event. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.check_poisoned()?;
        write_frame(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Flush buffered frames and fsync.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.check_poisoned()?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.committed_len = self.writer.get_ref().metadata()?.len();
        self.committed_appends = self.appends_since_compact;
        Ok(())
    }

    /// Append a batch and make it durable, or leave the log exactly as the
    /// last successful flush left it.
    pub fn append_batch<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) -> io::Result<()> {
        let result = events
            .into_iter()
            .try_for_each(|event| self.append_buffered(event))
            .and_then(|()| self.flush_sync());
        if result.is_err() && self.poisoned.is_none() {
            if let Err(e) = self.rollback() {
                self.poisoned = Some(e.to_string());
            }
        }
        result
    }

    /// Drop unflushed bytes and truncate anything written since the last
    /// successful flush.
    fn rollback(&mut self) -> io::Result<()> {
        let fresh = BufWriter::new(Self::open_append(&self.path)?);
        // into_parts hands back the buffer without writing it out.
        let (_stale, _discarded) = std::mem::replace(&mut self.writer, fresh).into_parts();
        let file = self.writer.get_ref();
        file.set_len(self.committed_len)?;
        file.sync_all()?;
        self.appends_since_compact = self.committed_appends;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Phase one of compaction: write the replacement log next to the live one.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Phase two: rename the replacement over the live log and reopen it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.check_poisoned()?;
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let file = Self::open_append(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.committed_appends = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Every intact event in the log. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        scan(path).map(|(events, _)| events)
    }
}
