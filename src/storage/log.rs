//! Append-only log storage.
//!
//! Every mutating call appends exactly one frame to the database file:
//!
//! ```text
//! +-----------+-----------+---------------------------+
//! | len (u32) | crc (u32) | bincode(LogRecord) (len)  |
//! +-----------+-----------+---------------------------+
//! ```
//!
//! The live key space is rebuilt by replaying the frames on open. A frame that
//! is truncated or fails its checksum ends the replay and the file is cut back
//! to the last good frame, so a crash in the middle of an append loses at most
//! that one call. Because a batch is a single frame, batches are atomic.
//!
//! Superseded records are dropped by compaction once they outnumber the live
//! keys.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{QuarryError, Result};
use crate::storage::{KvStore, StorageKind, ensure_parent, validate_batch};

#[cfg(test)]
const COMPACTION_THRESHOLD: usize = 8;
#[cfg(not(test))]
const COMPACTION_THRESHOLD: usize = 4096;

const FRAME_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum LogRecord {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
    Batch { entries: Vec<(String, Vec<u8>)> },
    Clear,
}

impl LogRecord {
    /// Number of record units this frame contributes (one per touched key).
    fn units(&self) -> usize {
        match self {
            LogRecord::Put { .. } | LogRecord::Delete { .. } | LogRecord::Clear => 1,
            LogRecord::Batch { entries } => entries.len(),
        }
    }
}

#[derive(Debug)]
struct LogInner {
    writer: Option<BufWriter<File>>,
    entries: BTreeMap<String, Vec<u8>>,
    /// Record units currently in the file.
    units: usize,
}

impl LogInner {
    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        self.writer.as_mut().ok_or(QuarryError::StorageClosed)
    }

    fn check_open(&self) -> Result<()> {
        if self.writer.is_none() {
            Err(QuarryError::StorageClosed)
        } else {
            Ok(())
        }
    }

    fn dead(&self) -> usize {
        self.units.saturating_sub(self.entries.len())
    }

    fn apply(&mut self, record: LogRecord) {
        self.units += record.units();
        match record {
            LogRecord::Put { key, value } => {
                self.entries.insert(key, value);
            }
            LogRecord::Delete { key } => {
                self.entries.remove(&key);
            }
            LogRecord::Batch { entries } => self.entries.extend(entries),
            LogRecord::Clear => {
                self.entries.clear();
                self.units = 0;
            }
        }
    }
}

/// File-backed key-value store built on an append-only record log.
#[derive(Debug)]
pub struct LogStore {
    path: PathBuf,
    inner: RwLock<LogInner>,
}

impl LogStore {
    /// Open the log at `path`, creating it (and its parent directory) if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        ensure_parent(&path)?;

        let mut inner = LogInner {
            writer: None,
            entries: BTreeMap::new(),
            units: 0,
        };

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let (records, good_len) = decode_frames(&data);
        for record in records {
            inner.apply(record);
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        if good_len < data.len() {
            tracing::warn!(
                path = %path.display(),
                good_len,
                file_len = data.len(),
                "truncating torn tail of log"
            );
            file.set_len(good_len as u64)?;
        }
        inner.writer = Some(BufWriter::new(file));

        tracing::debug!(path = %path.display(), keys = inner.entries.len(), "opened log store");

        Ok(LogStore {
            path,
            inner: RwLock::new(inner),
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: LogRecord) -> Result<()> {
        let frame = encode_frame(&record)?;

        let mut inner = self.inner.write();
        let writer = inner.writer()?;
        writer.write_all(&frame)?;
        writer.flush()?;
        inner.apply(record);

        if inner.dead() > COMPACTION_THRESHOLD && inner.dead() > inner.entries.len() {
            self.compact(&mut inner)?;
        }
        Ok(())
    }

    fn compact(&self, inner: &mut LogInner) -> Result<()> {
        let before = inner.units;
        let tmp = self.path.with_extension("compact");
        write_compacted(&tmp, &inner.entries)?;

        // Release the old handle before replacing the file underneath it.
        if let Some(mut writer) = inner.writer.take() {
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        inner.writer = Some(BufWriter::new(file));
        inner.units = inner.entries.len();

        tracing::debug!(
            path = %self.path.display(),
            before,
            after = inner.units,
            "compacted log store"
        );
        Ok(())
    }
}

impl KvStore for LogStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Log
    }

    fn list(&self) -> Result<Vec<Vec<u8>>> {
        let inner = self.inner.read();
        inner.check_open()?;
        Ok(inner.entries.values().cloned().collect())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.read();
        inner.check_open()?;
        Ok(inner.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(QuarryError::EmptyKey);
        }
        self.append(LogRecord::Put {
            key: key.to_string(),
            value: value.to_vec(),
        })
    }

    fn batch(&self, keys: &[String], values: &[Vec<u8>]) -> Result<()> {
        validate_batch(keys, values)?;
        if keys.is_empty() {
            return Ok(());
        }
        let entries = keys.iter().cloned().zip(values.iter().cloned()).collect();
        self.append(LogRecord::Batch { entries })
    }

    fn delete(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(QuarryError::EmptyKey);
        }
        {
            let inner = self.inner.read();
            inner.check_open()?;
            if !inner.entries.contains_key(key) {
                return Ok(());
            }
        }
        self.append(LogRecord::Delete {
            key: key.to_string(),
        })
    }

    fn delete_all(&self) -> Result<()> {
        let mut inner = self.inner.write();
        let writer = inner.writer()?;
        writer.flush()?;
        writer.get_ref().set_len(0)?;
        inner.entries.clear();
        inner.units = 0;
        Ok(())
    }

    fn clone_to(&self, path: &Path) -> Result<()> {
        let inner = self.inner.read();
        inner.check_open()?;
        ensure_parent(path)?;
        let tmp = path.with_extension("clone");
        write_compacted(&tmp, &inner.entries)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(mut writer) = inner.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
            tracing::debug!(path = %self.path.display(), "closed log store");
        }
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        let inner = self.inner.read();
        inner.check_open()?;
        Ok(inner.entries.len())
    }
}

fn encode_frame(record: &LogRecord) -> Result<Vec<u8>> {
    let payload = bincode::serialize(record)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| QuarryError::storage("record larger than 4 GiB"))?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.write_u32::<LittleEndian>(len)?;
    frame.write_u32::<LittleEndian>(crc32fast::hash(&payload))?;
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode frames until the data ends or a frame is damaged. Returns the
/// decoded records and the byte length of the intact prefix.
fn decode_frames(data: &[u8]) -> (Vec<LogRecord>, usize) {
    let mut records = Vec::new();
    let mut cursor = Cursor::new(data);
    let mut good_len = 0;

    loop {
        let remaining = data.len() - good_len;
        if remaining < FRAME_HEADER_LEN {
            break;
        }
        let (Ok(len), Ok(crc)) = (
            cursor.read_u32::<LittleEndian>(),
            cursor.read_u32::<LittleEndian>(),
        ) else {
            break;
        };
        let len = len as usize;
        if remaining - FRAME_HEADER_LEN < len {
            break;
        }
        let mut payload = vec![0u8; len];
        if cursor.read_exact(&mut payload).is_err() || crc32fast::hash(&payload) != crc {
            break;
        }
        match bincode::deserialize::<LogRecord>(&payload) {
            Ok(record) => records.push(record),
            Err(_) => break,
        }
        good_len += FRAME_HEADER_LEN + len;
    }

    (records, good_len)
}

/// Write one `Put` frame per live entry to `path`, then fsync it.
fn write_compacted(path: &Path, entries: &BTreeMap<String, Vec<u8>>) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for (key, value) in entries {
        let frame = encode_frame(&LogRecord::Put {
            key: key.clone(),
            value: value.clone(),
        })?;
        writer.write_all(&frame)?;
    }
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}
