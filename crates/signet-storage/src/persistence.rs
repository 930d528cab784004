//! Write-ahead log and snapshot files
//!
//! Every `put` is one transaction of four frames, appended and synced as a
//! unit before the in-memory state changes:
//!
//! ```text
//! ┌─────────┬──────────────────────┐
//! │ len:u32 │ bincode(WalEntry)    │  BeginPut { tx_id, timestamp }
//! ├─────────┼──────────────────────┤
//! │ len:u32 │ bincode(WalEntry)    │  PutRecord { tx_id, identifier, bytes }
//! ├─────────┼──────────────────────┤
//! │ len:u32 │ bincode(WalEntry)    │  IndexInsert { tx_id, identifier }
//! ├─────────┼──────────────────────┤
//! │ len:u32 │ bincode(WalEntry)    │  CommitTx { tx_id }
//! └─────────┴──────────────────────┘
//! ```
//!
//! Recovery loads the snapshot, then applies committed transactions newer
//! than the snapshot in commit order. A frame cut short by a crash is a torn
//! tail and is dropped; a complete frame that does not decode is corruption.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

pub const LOG_FILE: &str = "signatures.wal";
pub const SNAPSHOT_FILE: &str = "signatures.snapshot";

const FRAME_HEADER_LEN: usize = 4;

fn invalid_data<E>(e: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, e)
}

// ============================================================================
// Log entries
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalEntry {
    BeginPut {
        tx_id: u64,
        timestamp: i64,
    },
    PutRecord {
        tx_id: u64,
        identifier: String,
        bytes: Vec<u8>,
    },
    IndexInsert {
        tx_id: u64,
        identifier: String,
    },
    CommitTx {
        tx_id: u64,
    },
}

impl WalEntry {
    pub fn tx_id(&self) -> u64 {
        match self {
            WalEntry::BeginPut { tx_id, .. }
            | WalEntry::PutRecord { tx_id, .. }
            | WalEntry::IndexInsert { tx_id, .. }
            | WalEntry::CommitTx { tx_id } => *tx_id,
        }
    }

    /// The four frames making up one `put`.
    pub fn put(tx_id: u64, identifier: &str, bytes: &[u8]) -> [WalEntry; 4] {
        [
            WalEntry::BeginPut {
                tx_id,
                timestamp: chrono::Utc::now().timestamp(),
            },
            WalEntry::PutRecord {
                tx_id,
                identifier: identifier.to_owned(),
                bytes: bytes.to_vec(),
            },
            WalEntry::IndexInsert {
                tx_id,
                identifier: identifier.to_owned(),
            },
            WalEntry::CommitTx { tx_id },
        ]
    }
}

/// Serialize entries into length-prefixed frames.
pub fn encode_frames(entries: &[WalEntry]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    for entry in entries {
        let data = bincode::serialize(entry).map_err(invalid_data)?;
        let len = u32::try_from(data.len()).map_err(|_| invalid_data("log frame too large"))?;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&data);
    }
    Ok(out)
}

/// Frames read back from a log.
#[derive(Debug, Default)]
pub struct Replay {
    pub entries: Vec<WalEntry>,
    /// Length of the prefix made of complete frames.
    pub valid_len: u64,
    /// Bytes after `valid_len` belonging to an incomplete final frame.
    pub torn_bytes: u64,
}

pub fn decode_frames(bytes: &[u8]) -> io::Result<Replay> {
    let mut entries = Vec::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let rest = &bytes[pos..];
        if rest.len() < FRAME_HEADER_LEN {
            break;
        }
        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&rest[..FRAME_HEADER_LEN]);
        let len = u32::from_le_bytes(header) as usize;

        let Some(body) = FRAME_HEADER_LEN
            .checked_add(len)
            .and_then(|end| rest.get(FRAME_HEADER_LEN..end))
        else {
            break;
        };
        let entry: WalEntry = bincode::deserialize(body)
            .map_err(|e| invalid_data(format!("corrupt log frame at offset {pos}: {e}")))?;
        entries.push(entry);
        pos += FRAME_HEADER_LEN + len;
    }

    Ok(Replay {
        entries,
        valid_len: pos as u64,
        torn_bytes: (bytes.len() - pos) as u64,
    })
}

// ============================================================================
// Recovery
// ============================================================================

/// Effects of one committed transaction.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommittedPut {
    pub tx_id: u64,
    pub records: Vec<(String, Vec<u8>)>,
    pub index: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Recovery {
    /// Committed transactions, in commit order.
    pub committed: Vec<CommittedPut>,
    /// Transactions that never reached their commit marker.
    pub discarded: usize,
    pub last_tx_id: u64,
}

/// Group replayed frames into committed transactions.
pub fn recover(entries: Vec<WalEntry>) -> Recovery {
    let mut pending: HashMap<u64, CommittedPut> = HashMap::new();
    let mut recovery = Recovery::default();

    for entry in entries {
        let tx_id = entry.tx_id();
        recovery.last_tx_id = recovery.last_tx_id.max(tx_id);
        match entry {
            WalEntry::BeginPut { .. } => {
                pending.insert(
                    tx_id,
                    CommittedPut {
                        tx_id,
                        ..Default::default()
                    },
                );
            }
            WalEntry::PutRecord {
                identifier, bytes, ..
            } => {
                pending
                    .entry(tx_id)
                    .or_insert_with(|| CommittedPut {
                        tx_id,
                        ..Default::default()
                    })
                    .records
                    .push((identifier, bytes));
            }
            WalEntry::IndexInsert { identifier, .. } => {
                pending
                    .entry(tx_id)
                    .or_insert_with(|| CommittedPut {
                        tx_id,
                        ..Default::default()
                    })
                    .index
                    .push(identifier);
            }
            WalEntry::CommitTx { .. } => {
                if let Some(put) = pending.remove(&tx_id) {
                    recovery.committed.push(put);
                }
            }
        }
    }

    recovery.discarded = pending.len();
    recovery
}

// ============================================================================
// Log media
// ============================================================================

/// Byte storage underneath the write-ahead log.
pub trait LogMedium: Send {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
    fn size(&mut self) -> io::Result<u64>;
    fn read_all(&mut self) -> io::Result<Vec<u8>>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

/// Append-only log file.
#[derive(Debug)]
pub struct FileLog {
    file: File,
}

impl FileLog {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        Ok(Self { file })
    }
}

impl LogMedium for FileLog {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)?;
        self.file.sync_data()
    }
}

/// Log kept in memory. Clones share the same buffer, so a test can reopen a
/// store over the bytes a previous instance left behind.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl LogMedium for MemoryLog {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.bytes.lock().extend_from_slice(bytes);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.bytes.lock().len() as u64)
    }

    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        Ok(self.contents())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len).map_err(invalid_data)?;
        self.bytes.lock().truncate(len);
        Ok(())
    }
}

// ============================================================================
// Write-Ahead Log
// ============================================================================

/// Write-ahead log over some [`LogMedium`].
pub struct WriteAheadLog {
    medium: Box<dyn LogMedium>,
    sync_writes: bool,
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("sync_writes", &self.sync_writes)
            .finish_non_exhaustive()
    }
}

impl WriteAheadLog {
    pub fn new(medium: Box<dyn LogMedium>, sync_writes: bool) -> Self {
        Self {
            medium,
            sync_writes,
        }
    }

    pub fn open(path: &Path, sync_writes: bool) -> io::Result<Self> {
        Ok(Self::new(Box::new(FileLog::open(path)?), sync_writes))
    }

    /// Append entries as one write, then sync. Returns the bytes written.
    pub fn append(&mut self, entries: &[WalEntry]) -> io::Result<u64> {
        let frames = encode_frames(entries)?;
        self.medium.append(&frames)?;
        if self.sync_writes {
            self.medium.sync()?;
        }
        Ok(frames.len() as u64)
    }

    pub fn replay(&mut self) -> io::Result<Replay> {
        let bytes = self.medium.read_all()?;
        decode_frames(&bytes)
    }

    pub fn size(&mut self) -> io::Result<u64> {
        self.medium.size()
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.medium.sync()
    }

    pub fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.medium.truncate(len)
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Full store contents as of transaction `sequence`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub sequence: u64,
    pub records: BTreeMap<String, Vec<u8>>,
    pub index: BTreeSet<String>,
}

impl Snapshot {
    pub const VERSION: u32 = 1;

    pub fn new(
        sequence: u64,
        records: BTreeMap<String, Vec<u8>>,
        index: BTreeSet<String>,
    ) -> Self {
        Self {
            version: Self::VERSION,
            sequence,
            records,
            index,
        }
    }

    /// Read a snapshot; `None` if there is none yet.
    pub fn load(path: &Path) -> io::Result<Option<Self>> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let snapshot: Snapshot = bincode::deserialize(&data).map_err(invalid_data)?;
        if snapshot.version != Self::VERSION {
            return Err(invalid_data(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        if !snapshot.records.keys().eq(snapshot.index.iter()) {
            return Err(invalid_data("snapshot index disagrees with its records"));
        }
        Ok(Some(snapshot))
    }

    /// Write to a temporary file, sync it, then rename over `path`.
    pub fn write(&self, path: &Path) -> io::Result<()> {
        let data = bincode::serialize(self).map_err(invalid_data)?;
        let tmp = path.with_extension("snapshot.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        if let Some(dir) = path.parent() {
            // Directory fsync is not available everywhere.
            if let Ok(dir) = File::open(dir) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }
}
