//! Runtime file contract tests
//!
//! Readers polling a status file while a writer replaces it must only ever
//! observe complete documents.

use ossuary_common::atomic::write_json;
use ossuary_common::{Connectivity, ConnectivityRecord, FireLedger, RuntimePaths};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

#[test]
fn test_concurrent_reader_never_sees_torn_document() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("big.json");

    // Large enough that a non-atomic write would be observable
    let payload: Vec<String> = (0..4000).map(|i| format!("entry-{}", i)).collect();
    write_json(&path, &payload, false).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let path = path.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut reads = 0;
            while !done.load(Ordering::Relaxed) {
                let text = fs::read_to_string(&path).unwrap();
                let parsed: Vec<String> = serde_json::from_str(&text)
                    .unwrap_or_else(|e| panic!("torn read after {} reads: {}", reads, e));
                assert_eq!(parsed.len(), 4000);
                reads += 1;
            }
        })
    };

    for _ in 0..200 {
        write_json(&path, &payload, false).unwrap();
    }
    done.store(true, Ordering::Relaxed);
    reader.join().unwrap();
}

#[test]
fn test_layout_under_one_root() {
    let temp = TempDir::new().unwrap();
    let paths = RuntimePaths::with_root(temp.path());

    let record = ConnectivityRecord {
        current: Connectivity::Connected,
        ..ConnectivityRecord::default()
    };
    record.save(&paths.connection_state()).unwrap();

    let mut ledger = FireLedger::default();
    ledger.record(
        FireLedger::key("r1", "08:00"),
        chrono::NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
    );
    ledger.save(&paths.fire_ledger()).unwrap();

    assert!(paths.connection_state().exists());
    assert!(paths.fire_ledger().exists());
    assert_eq!(
        ConnectivityRecord::load_or_unknown(&paths.connection_state()).current,
        Connectivity::Connected
    );
    assert_eq!(FireLedger::load_or_empty(&paths.fire_ledger()).len(), 1);
}
