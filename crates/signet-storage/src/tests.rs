//! End-to-end tests for the signature store

use super::*;
use chrono::{TimeZone, Utc};
use signet_archive::{encode_signature, ArchiveError, SignatureRecord};
use signet_path::{Path, PathCommand, Point};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

const SIG_1: &str = "7D2C0C2E-8F4B-4E5A-9C43-0B7E2E8D1A01";
const SIG_2: &str = "A3F1B9C4-2D6E-4F70-8B1A-5C9D0E3F4A22";

fn sample_path() -> Path {
    vec![
        PathCommand::MoveTo(Point::new(0.0, 0.0)),
        PathCommand::LineTo(Point::new(10.0, 0.0)),
        PathCommand::CubicCurveTo {
            point: Point::new(10.0, 10.0),
            control1: Point::new(10.0, 5.0),
            control2: Point::new(10.0, 8.0),
        },
        PathCommand::ClosePath,
    ]
    .into()
}

fn sample_archive(identifier: &str) -> Vec<u8> {
    let record = SignatureRecord::new(identifier, sample_path());
    encode_signature(&record, Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap())
}

fn config_for(dir: &std::path::Path) -> StoreConfig {
    StoreConfig {
        checkpoint_after: None,
        ..StoreConfig::new(dir)
    }
}

/// Memory log whose appends can be made to fail halfway through.
#[derive(Clone, Default)]
struct FailingLog {
    inner: MemoryLog,
    fail_appends: Arc<AtomicBool>,
    fail_truncates: Arc<AtomicBool>,
}

impl LogMedium for FailingLog {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            self.inner.append(&bytes[..bytes.len() / 2])?;
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.inner.append(bytes)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.inner.sync()
    }

    fn size(&mut self) -> io::Result<u64> {
        self.inner.size()
    }

    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        self.inner.read_all()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        if self.fail_truncates.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "read-only medium"));
        }
        self.inner.truncate(len)
    }
}

fn reopen(log: &FailingLog) -> SignatureStore {
    let mut fresh = log.clone();
    fresh.fail_appends = Arc::new(AtomicBool::new(false));
    fresh.fail_truncates = Arc::new(AtomicBool::new(false));
    SignatureStore::with_log(Box::new(fresh), None, StoreConfig::default()).unwrap()
}

// ============================================================================
// put / get / list
// ============================================================================

#[test]
fn test_put_is_visible_to_get_and_list() {
    let store = SignatureStore::in_memory().unwrap();
    store.put("sig-1", b"bytes").unwrap();

    assert_eq!(store.get("sig-1"), Some(b"bytes".to_vec()));
    assert!(store.list_identifiers().contains("sig-1"));
    assert!(store.contains("sig-1"));
    assert_eq!(store.len(), 1);
}

#[test]
fn test_get_missing() {
    let store = SignatureStore::in_memory().unwrap();
    assert_eq!(store.get("nope"), None);
    assert!(store.is_empty());
}

#[test]
fn test_overwrite_keeps_single_index_entry() {
    let store = SignatureStore::in_memory().unwrap();
    store.put("sig-1", b"old").unwrap();
    store.put("sig-1", b"new").unwrap();

    assert_eq!(store.get("sig-1"), Some(b"new".to_vec()));
    assert_eq!(store.list_identifiers().len(), 1);
}

#[test]
fn test_empty_identifier_is_rejected() {
    let store = SignatureStore::in_memory().unwrap();
    assert!(matches!(store.put("", b"x"), Err(StoreError::EmptyIdentifier)));
    assert!(store.is_empty());
}

#[test]
fn test_get_returns_bytes_verbatim() {
    let store = SignatureStore::in_memory().unwrap();
    // Not a valid path encoding; the store must not care.
    store.put("raw", &[0xFF; 3]).unwrap();
    assert_eq!(store.get("raw"), Some(vec![0xFF; 3]));
}

// ============================================================================
// Failure atomicity
// ============================================================================

#[test]
fn test_failed_put_leaves_no_trace() {
    let log = FailingLog::default();
    let store =
        SignatureStore::with_log(Box::new(log.clone()), None, StoreConfig::default()).unwrap();
    store.put(SIG_1, b"first").unwrap();

    log.fail_appends.store(true, Ordering::SeqCst);
    let err = store.put("sig-1", b"second").unwrap_err();
    assert!(matches!(err, StoreError::StoreUnavailable(_)));

    assert_eq!(store.get("sig-1"), None);
    assert!(!store.list_identifiers().contains("sig-1"));
    assert_eq!(store.get(SIG_1), Some(b"first".to_vec()));

    // the partial frames were rolled back
    let reopened = reopen(&log);
    assert_eq!(reopened.get("sig-1"), None);
    assert!(!reopened.contains("sig-1"));
    assert_eq!(reopened.get(SIG_1), Some(b"first".to_vec()));
}

#[test]
fn test_store_recovers_after_failed_put() {
    let log = FailingLog::default();
    let store =
        SignatureStore::with_log(Box::new(log.clone()), None, StoreConfig::default()).unwrap();

    log.fail_appends.store(true, Ordering::SeqCst);
    assert!(store.put("sig-1", b"x").is_err());
    log.fail_appends.store(false, Ordering::SeqCst);

    store.put("sig-1", b"y").unwrap();
    assert_eq!(store.get("sig-1"), Some(b"y".to_vec()));
    assert_eq!(reopen(&log).get("sig-1"), Some(b"y".to_vec()));
}

#[test]
fn test_unrecoverable_failure_poisons_the_store() {
    let log = FailingLog::default();
    let store =
        SignatureStore::with_log(Box::new(log.clone()), None, StoreConfig::default()).unwrap();
    store.put(SIG_1, b"first").unwrap();

    log.fail_appends.store(true, Ordering::SeqCst);
    log.fail_truncates.store(true, Ordering::SeqCst);
    assert!(store.put("sig-1", b"second").is_err());

    log.fail_appends.store(false, Ordering::SeqCst);
    log.fail_truncates.store(false, Ordering::SeqCst);
    assert!(matches!(
        store.put("sig-2", b"third"),
        Err(StoreError::StoreUnavailable(_))
    ));
    assert!(store.checkpoint().is_err());
    assert_eq!(store.list_identifiers().len(), 1);

    // The half-written transaction is a torn tail on reopen.
    let reopened = reopen(&log);
    assert_eq!(reopened.get("sig-1"), None);
    assert_eq!(reopened.get(SIG_1), Some(b"first".to_vec()));
    reopened.put("sig-2", b"third").unwrap();
}

// ============================================================================
// Recovery
// ============================================================================

#[test]
fn test_reopen_replays_log() {
    let dir = tempdir().unwrap();
    {
        let store = SignatureStore::open(config_for(dir.path())).unwrap();
        store.put(SIG_1, b"one").unwrap();
        store.put(SIG_2, b"two").unwrap();
        // No close: simulate a crash by leaking the flush.
        std::mem::forget(store);
    }

    assert!(!dir.path().join(SNAPSHOT_FILE).exists());
    let store = SignatureStore::open(config_for(dir.path())).unwrap();
    assert_eq!(store.get(SIG_1), Some(b"one".to_vec()));
    assert_eq!(store.get(SIG_2), Some(b"two".to_vec()));
    assert_eq!(
        store.list_identifiers(),
        BTreeSet::from([SIG_1.to_string(), SIG_2.to_string()])
    );
}

#[test]
fn test_torn_tail_is_truncated_on_open() {
    let dir = tempdir().unwrap();
    {
        let store = SignatureStore::open(config_for(dir.path())).unwrap();
        store.put(SIG_1, b"one").unwrap();
        std::mem::forget(store);
    }

    let log_path = dir.path().join(LOG_FILE);
    let intact = std::fs::metadata(&log_path).unwrap().len();
    let torn = persistence::encode_frames(&WalEntry::put(2, SIG_2, b"two")).unwrap();
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&log_path)
            .unwrap();
        // cut inside the first frame
        file.write_all(&torn[..10]).unwrap();
    }

    let store = SignatureStore::open(config_for(dir.path())).unwrap();
    assert_eq!(store.get(SIG_1), Some(b"one".to_vec()));
    assert_eq!(store.get(SIG_2), None);
    assert_eq!(std::fs::metadata(&log_path).unwrap().len(), intact);
}

#[test]
fn test_corrupt_frame_fails_open() {
    let dir = tempdir().unwrap();
    let mut frame = 4u32.to_le_bytes().to_vec();
    frame.extend_from_slice(&[0xEE; 4]);
    std::fs::write(dir.path().join(LOG_FILE), frame).unwrap();

    let err = SignatureStore::open(config_for(dir.path())).unwrap_err();
    match err {
        StoreError::StoreUnavailable(e) => assert_eq!(e.kind(), io::ErrorKind::InvalidData),
        other => panic!("expected StoreUnavailable, got {other:?}"),
    }
}

#[test]
fn test_checkpoint_then_reopen() {
    let dir = tempdir().unwrap();
    {
        let store = SignatureStore::open(config_for(dir.path())).unwrap();
        store.put(SIG_1, b"one").unwrap();
        store.checkpoint().unwrap();
        assert_eq!(
            std::fs::metadata(dir.path().join(LOG_FILE)).unwrap().len(),
            0
        );
        store.put(SIG_2, b"two").unwrap();
        std::mem::forget(store);
    }

    let store = SignatureStore::open(config_for(dir.path())).unwrap();
    assert_eq!(store.get(SIG_1), Some(b"one".to_vec()));
    assert_eq!(store.get(SIG_2), Some(b"two".to_vec()));
    store.close().unwrap();
}

#[test]
fn test_transactions_already_in_snapshot_are_not_replayed() {
    let dir = tempdir().unwrap();
    {
        let store = SignatureStore::open(config_for(dir.path())).unwrap();
        store.put(SIG_1, b"one").unwrap();
        store.close().unwrap();
    }
    // Crash between snapshot rename and log truncation: the log still holds
    // tx 1 with stale contents.
    let stale = persistence::encode_frames(&WalEntry::put(1, SIG_1, b"stale")).unwrap();
    std::fs::write(dir.path().join(LOG_FILE), stale).unwrap();

    let store = SignatureStore::open(config_for(dir.path())).unwrap();
    assert_eq!(store.get(SIG_1), Some(b"one".to_vec()));
}

#[test]
fn test_close_leaves_only_a_snapshot() {
    let dir = tempdir().unwrap();
    let store = SignatureStore::open(config_for(dir.path())).unwrap();
    store.put(SIG_1, b"one").unwrap();
    store.close().unwrap();

    assert!(dir.path().join(SNAPSHOT_FILE).exists());
    assert_eq!(
        std::fs::metadata(dir.path().join(LOG_FILE)).unwrap().len(),
        0
    );
}

#[test]
fn test_drop_flushes() {
    let dir = tempdir().unwrap();
    {
        let store = SignatureStore::open(config_for(dir.path())).unwrap();
        store.put(SIG_1, b"one").unwrap();
    }
    assert!(dir.path().join(SNAPSHOT_FILE).exists());
    let store = SignatureStore::open(config_for(dir.path())).unwrap();
    assert!(store.contains(SIG_1));
}

#[test]
fn test_automatic_checkpoint() {
    let dir = tempdir().unwrap();
    let config = StoreConfig {
        checkpoint_after: Some(2),
        ..StoreConfig::new(dir.path())
    };
    let store = SignatureStore::open(config).unwrap();
    store.put(SIG_1, b"one").unwrap();
    assert!(!dir.path().join(SNAPSHOT_FILE).exists());
    store.put(SIG_2, b"two").unwrap();
    assert!(dir.path().join(SNAPSHOT_FILE).exists());
    assert_eq!(
        std::fs::metadata(dir.path().join(LOG_FILE)).unwrap().len(),
        0
    );
}

#[test]
fn test_config_from_json_fills_defaults() {
    let config: StoreConfig = serde_json::from_str(r#"{"root":"/tmp/sigs"}"#).unwrap();
    assert_eq!(config.root, PathBuf::from("/tmp/sigs"));
    assert!(config.sync_writes);
    assert_eq!(config.checkpoint_after, StoreConfig::default().checkpoint_after);
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_readers_never_see_half_applied_puts() {
    let store = Arc::new(SignatureStore::in_memory().unwrap());
    let ids: Vec<String> = (0..64).map(|i| format!("sig-{i}")).collect();

    std::thread::scope(|s| {
        let writer_store = Arc::clone(&store);
        let writer_ids = &ids;
        s.spawn(move || {
            for id in writer_ids {
                writer_store.put(id, id.as_bytes()).unwrap();
            }
        });

        for _ in 0..4 {
            let reader = Arc::clone(&store);
            s.spawn(move || {
                for _ in 0..200 {
                    for id in reader.list_identifiers() {
                        assert_eq!(reader.get(&id), Some(id.as_bytes().to_vec()));
                    }
                }
            });
        }
    });

    assert_eq!(store.len(), ids.len());
}

// ============================================================================
// Capture pipeline and references
// ============================================================================

#[test]
fn test_capture_stores_encoded_path() {
    let store = SignatureStore::in_memory().unwrap();
    let captured = store.capture(&sample_archive(SIG_1)).unwrap();

    assert_eq!(captured.identifier, SIG_1);
    assert_eq!(captured.path, sample_path());
    assert_eq!(
        store.get(SIG_1),
        Some(signet_path::encode(&sample_path()))
    );
    assert_eq!(store.load_path(SIG_1).unwrap(), Some(sample_path()));
}

#[test]
fn test_rejected_archive_stores_nothing() {
    let store = SignatureStore::in_memory().unwrap();
    let err = store.capture(b"bplist00 but not really").unwrap_err();
    assert!(matches!(
        err,
        CaptureError::Archive(ArchiveError::CorruptArchive(_))
    ));
    assert!(store.is_empty());
}

#[test]
fn test_load_path_surfaces_decode_errors() {
    let store = SignatureStore::in_memory().unwrap();
    store.put("bad", &[1, 2, 3]).unwrap();
    assert!(matches!(
        store.load_path("bad"),
        Err(LoadError::Decode { identifier, .. }) if identifier == "bad"
    ));
    assert_eq!(store.load_path("absent").unwrap(), None);
}

#[test]
fn test_untyped_reference_falls_back_and_reports_kind() {
    let store = SignatureStore::in_memory().unwrap();
    store.capture(&sample_archive(SIG_1)).unwrap();

    let resolved = resolve(&store, &SignatureRef::untyped(SIG_1))
        .unwrap()
        .unwrap();
    assert_eq!(resolved.reference, SignatureRef::new(SignatureKind::Vector, SIG_1));
    assert_eq!(resolved.path, sample_path());

    let typed = resolve(&store, &format!("vector:{SIG_1}").parse().unwrap()).unwrap();
    assert_eq!(typed.map(|r| r.path), Some(sample_path()));
}

#[test]
fn test_unknown_or_empty_reference_resolves_to_nothing() {
    let store = SignatureStore::in_memory().unwrap();
    store.capture(&sample_archive(SIG_1)).unwrap();

    assert!(resolve(&store, &SignatureRef::untyped(SIG_2)).unwrap().is_none());
    assert!(resolve(&store, &SignatureRef::untyped("")).unwrap().is_none());
}
