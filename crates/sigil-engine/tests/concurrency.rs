//! Ordering guarantees under contention: appends are totally ordered,
//! block numbers stay contiguous and unique, and readers never observe a
//! half-committed block.

use std::sync::Arc;
use std::thread;

use sigil_crypto::KeyPair;
use sigil_engine::{AppendOptions, LedgerConfig, LedgerEngine};
use sigil_index::SearchOptions;

#[test]
fn parallel_appends_stay_contiguous() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(
        LedgerEngine::open(LedgerConfig::new(dir.path())).unwrap(),
    );
    let signer = Arc::new(KeyPair::generate().unwrap());
    engine
        .add_authorized_key(&signer.public_key, "Worker", None)
        .unwrap();

    let mut handles = Vec::new();
    for worker in 0..4 {
        let engine = Arc::clone(&engine);
        let signer = Arc::clone(&signer);
        handles.push(thread::spawn(move || {
            let mut numbers = Vec::new();
            for i in 0..10 {
                let block = engine
                    .append(
                        &format!("worker {worker} entry {i}"),
                        &signer,
                        AppendOptions::default(),
                    )
                    .unwrap();
                numbers.push(block.block_number);
            }
            numbers
        }));
    }

    let mut all_numbers: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all_numbers.sort_unstable();

    // 40 appends on top of genesis: numbers 1..=40, no duplicates.
    assert_eq!(all_numbers, (1..=40).collect::<Vec<u64>>());
    assert_eq!(engine.block_count(), 41);

    // Every link holds and every signature verifies.
    let report = engine.validate_chain().unwrap();
    assert!(report.is_structurally_intact, "{}", report.report_text);
    assert!(report.is_fully_compliant, "{}", report.report_text);
}

#[test]
fn readers_run_alongside_writers() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(
        LedgerEngine::open(LedgerConfig::new(dir.path())).unwrap(),
    );
    let signer = Arc::new(KeyPair::generate().unwrap());
    engine
        .add_authorized_key(&signer.public_key, "Worker", None)
        .unwrap();

    let writer = {
        let engine = Arc::clone(&engine);
        let signer = Arc::clone(&signer);
        thread::spawn(move || {
            for i in 0..20 {
                engine
                    .append(
                        &format!("ledger entry {i}"),
                        &signer,
                        AppendOptions {
                            manual_terms: vec!["ledger".into()],
                            ..Default::default()
                        },
                    )
                    .unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..20 {
                    // A reader observing block n also observes 0..n-1 with
                    // working links.
                    let blocks = engine.get_blocks_range(0, u64::MAX).unwrap();
                    for pair in blocks.windows(2) {
                        assert_eq!(pair[1].previous_hash, pair[0].hash);
                    }
                    let _ = engine.search("ledger", &SearchOptions::default()).unwrap();
                    let _ = engine.validate_chain().unwrap();
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(engine.block_count(), 21);
    assert_eq!(
        engine.search("ledger", &SearchOptions::default()).unwrap().len(),
        20
    );
}
