//! Signet signature store
//!
//! Durable key-value persistence of encoded signature paths plus an index of
//! every identifier ever stored:
//!
//! ```text
//! ┌─────────────┐  put   ┌──────────────────┐  commit   ┌──────────────────┐
//! │   caller    │ ─────► │  WriteAheadLog   │ ────────► │   StoreState     │
//! │             │        │ (signatures.wal) │           │ records + index  │
//! │             │ ◄───── │                  │           │  (one RwLock)    │
//! └─────────────┘  get / └──────────────────┘           └──────────────────┘
//!                  list           │ checkpoint                   ▲
//!                                 ▼                              │ open
//!                       ┌─────────────────────┐                  │
//!                       │ signatures.snapshot │ ─────────────────┘
//!                       └─────────────────────┘
//! ```
//!
//! A `put` is logged and synced before record and index are published
//! together, so readers never see one without the other. The store owns its
//! directory; sharing it between processes is not supported.

pub mod capture;
pub mod persistence;
pub mod reference;

#[cfg(test)]
mod tests;

pub use capture::{CaptureError, CapturedSignature, LoadError};
pub use persistence::{FileLog, LogMedium, MemoryLog};
pub use reference::{resolve, ParseReferenceError, ResolvedSignature, SignatureKind, SignatureRef};

use parking_lot::{Mutex, RwLock};
use persistence::{Snapshot, WalEntry, WriteAheadLog, LOG_FILE, SNAPSHOT_FILE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::PathBuf;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("signature store unavailable: {0}")]
    StoreUnavailable(#[from] io::Error),

    #[error("signature identifier is empty")]
    EmptyIdentifier,
}

fn unavailable(message: &str) -> StoreError {
    StoreError::StoreUnavailable(io::Error::new(io::ErrorKind::Other, message.to_owned()))
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for an on-disk store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the log and snapshot files.
    pub root: PathBuf,
    /// Sync the log after every `put`.
    pub sync_writes: bool,
    /// Checkpoint automatically after this many puts.
    pub checkpoint_after: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("signatures"),
            sync_writes: true,
            checkpoint_after: Some(1024),
        }
    }
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<String, Vec<u8>>,
    index: BTreeSet<String>,
}

impl StoreState {
    fn insert(&mut self, identifier: &str, bytes: Vec<u8>) {
        self.records.insert(identifier.to_owned(), bytes);
        self.index.insert(identifier.to_owned());
    }
}

#[derive(Debug)]
struct LogState {
    wal: WriteAheadLog,
    last_tx_id: u64,
    puts_since_checkpoint: usize,
    /// Set when a failed append could not be rolled back.
    poisoned: bool,
}

/// Persistent signature records keyed by identifier.
#[derive(Debug)]
pub struct SignatureStore {
    config: StoreConfig,
    snapshot_path: Option<PathBuf>,
    log: Mutex<LogState>,
    state: RwLock<StoreState>,
    closed: bool,
}

impl SignatureStore {
    /// Open (or create) the store in `config.root` and recover its contents.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&config.root)?;
        let wal = WriteAheadLog::open(&config.root.join(LOG_FILE), config.sync_writes)?;
        let snapshot_path = config.root.join(SNAPSHOT_FILE);
        Self::recover(wal, Some(snapshot_path), config)
    }

    /// A store that lives only as long as the process.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_log(Box::new(MemoryLog::new()), None, StoreConfig::default())
    }

    /// A store over an arbitrary log medium. Without a snapshot path,
    /// checkpoints keep the log as it is.
    pub fn with_log(
        medium: Box<dyn LogMedium>,
        snapshot_path: Option<PathBuf>,
        config: StoreConfig,
    ) -> Result<Self, StoreError> {
        let wal = WriteAheadLog::new(medium, config.sync_writes);
        Self::recover(wal, snapshot_path, config)
    }

    fn recover(
        mut wal: WriteAheadLog,
        snapshot_path: Option<PathBuf>,
        config: StoreConfig,
    ) -> Result<Self, StoreError> {
        let mut state = StoreState::default();
        let mut sequence = 0;

        if let Some(path) = &snapshot_path {
            if let Some(snapshot) = Snapshot::load(path)? {
                sequence = snapshot.sequence;
                state.records = snapshot.records.into_iter().collect();
                state.index = snapshot.index;
            }
        }

        let replay = wal.replay()?;
        if replay.torn_bytes > 0 {
            tracing::warn!(
                valid_len = replay.valid_len,
                torn_bytes = replay.torn_bytes,
                "truncating torn tail of signature log"
            );
            wal.truncate(replay.valid_len)?;
        }

        let recovery = persistence::recover(replay.entries);
        let mut replayed = 0;
        for put in recovery.committed {
            // Already folded into the snapshot.
            if put.tx_id <= sequence {
                continue;
            }
            for (identifier, bytes) in put.records {
                state.records.insert(identifier, bytes);
            }
            state.index.extend(put.index);
            replayed += 1;
        }
        if recovery.discarded > 0 {
            tracing::warn!(
                discarded = recovery.discarded,
                "discarded uncommitted signature log transactions"
            );
        }

        tracing::info!(
            records = state.records.len(),
            replayed,
            snapshot_sequence = sequence,
            "opened signature store"
        );

        Ok(Self {
            config,
            snapshot_path,
            log: Mutex::new(LogState {
                wal,
                last_tx_id: recovery.last_tx_id.max(sequence),
                puts_since_checkpoint: replayed,
                poisoned: false,
            }),
            state: RwLock::new(state),
            closed: false,
        })
    }

    /// Store `bytes` under `identifier`, replacing any previous record.
    pub fn put(&self, identifier: &str, bytes: &[u8]) -> Result<(), StoreError> {
        if identifier.is_empty() {
            return Err(StoreError::EmptyIdentifier);
        }

        let mut log = self.log.lock();
        if log.poisoned {
            return Err(unavailable(
                "signature log could not be rolled back after a failed write",
            ));
        }

        let tx_id = log.last_tx_id + 1;
        let start = log.wal.size()?;
        if let Err(e) = log.wal.append(&WalEntry::put(tx_id, identifier, bytes)) {
            match log.wal.truncate(start) {
                Ok(()) => {
                    tracing::warn!(identifier, error = %e, "rolled back failed signature write");
                }
                Err(rollback) => {
                    log.poisoned = true;
                    tracing::error!(
                        identifier,
                        error = %e,
                        rollback_error = %rollback,
                        "signature log left inconsistent; refusing further writes"
                    );
                }
            }
            return Err(e.into());
        }
        log.last_tx_id = tx_id;

        self.state.write().insert(identifier, bytes.to_vec());
        tracing::debug!(identifier, bytes = bytes.len(), tx_id, "stored signature");

        log.puts_since_checkpoint += 1;
        if let Some(limit) = self.config.checkpoint_after {
            if log.puts_since_checkpoint >= limit {
                // The put itself is durable; a failed compaction only delays it.
                if let Err(e) = self.checkpoint_locked(&mut log) {
                    tracing::warn!(error = %e, "automatic checkpoint failed");
                }
            }
        }
        Ok(())
    }

    /// Stored bytes for `identifier`. Never decodes them.
    pub fn get(&self, identifier: &str) -> Option<Vec<u8>> {
        self.state.read().records.get(identifier).cloned()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.state.read().index.contains(identifier)
    }

    /// Snapshot of the identifier index.
    pub fn list_identifiers(&self) -> BTreeSet<String> {
        self.state.read().index.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().index.is_empty()
    }

    /// Fold the log into the snapshot and truncate it.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        let mut log = self.log.lock();
        if log.poisoned {
            return Err(unavailable(
                "signature log could not be rolled back after a failed write",
            ));
        }
        self.checkpoint_locked(&mut log)
    }

    fn checkpoint_locked(&self, log: &mut LogState) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            log.wal.sync()?;
            return Ok(());
        };

        let snapshot = {
            let state = self.state.read();
            Snapshot::new(
                log.last_tx_id,
                state
                    .records
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                state.index.clone(),
            )
        };
        snapshot.write(path)?;
        log.wal.truncate(0)?;
        log.puts_since_checkpoint = 0;

        tracing::info!(
            records = snapshot.records.len(),
            sequence = snapshot.sequence,
            "checkpointed signature store"
        );
        Ok(())
    }

    /// Checkpoint and sync, then release the store.
    pub fn close(mut self) -> Result<(), StoreError> {
        self.closed = true;
        self.checkpoint()
    }
}

impl Drop for SignatureStore {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.checkpoint() {
            tracing::warn!(error = %e, "failed to flush signature store on drop");
        }
    }
}
