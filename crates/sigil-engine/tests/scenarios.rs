//! End-to-end scenarios against a real engine: genesis and appends,
//! off-chain routing, revocation semantics, forced key deletion, and
//! granular two-layer search.

use sigil_core::constants::OFF_CHAIN_PREFIX;
use sigil_core::{ErrorKind, SigilError};
use sigil_crypto::KeyPair;
use sigil_engine::{AppendOptions, LedgerConfig, LedgerEngine};
use sigil_index::{SearchMode, SearchOptions, TermVisibility, TermVisibilityMap};

fn open_engine(root: &std::path::Path, threshold: u64) -> LedgerEngine {
    LedgerEngine::open(LedgerConfig::new(root).with_off_chain_threshold(threshold))
        .expect("engine must open")
}

fn authorized_signer(engine: &LedgerEngine, owner: &str) -> KeyPair {
    let signer = KeyPair::generate().unwrap();
    engine
        .add_authorized_key(&signer.public_key, owner, None)
        .unwrap();
    signer
}

// ── Scenario A: genesis and two appends ──────────────────────────────────────

#[test]
fn genesis_and_two_appends() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), 1024 * 1024);
    let alice = authorized_signer(&engine, "Alice");

    let first = engine
        .append("hello", &alice, AppendOptions::default())
        .unwrap();
    let second = engine
        .append("world", &alice, AppendOptions::default())
        .unwrap();

    assert_eq!(engine.block_count(), 3);

    let genesis = engine.get_block(0).unwrap().unwrap();
    assert!(genesis.is_genesis());

    assert_eq!(first.block_number, 1);
    assert_eq!(first.data, "hello");
    assert_eq!(first.previous_hash, genesis.hash);

    assert_eq!(second.block_number, 2);
    assert_eq!(second.data, "world");
    assert_eq!(second.previous_hash, first.hash);

    let report = engine.validate_chain().unwrap();
    assert!(report.is_structurally_intact, "{}", report.report_text);
    assert!(report.is_fully_compliant, "{}", report.report_text);
}

#[test]
fn block_numbers_are_contiguous_and_unique() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), 1024 * 1024);
    let signer = authorized_signer(&engine, "Alice");

    for i in 0..5 {
        engine
            .append(&format!("entry {i}"), &signer, AppendOptions::default())
            .unwrap();
    }

    let blocks = engine.get_blocks_range(0, 100).unwrap();
    assert_eq!(blocks.len() as u64, engine.block_count());
    for (expected, block) in blocks.iter().enumerate() {
        assert_eq!(block.block_number, expected as u64);
    }
    assert_eq!(
        engine.get_last_block().unwrap().unwrap().block_number + 1,
        engine.block_count()
    );
}

// ── Scenario B: off-chain routing ────────────────────────────────────────────

#[test]
fn off_chain_threshold_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), 1024);
    let signer = authorized_signer(&engine, "Alice");

    let big = "0".repeat(1024);
    let small = "0".repeat(1023);

    let off_chain = engine.append(&big, &signer, AppendOptions::default()).unwrap();
    assert!(off_chain.data.starts_with(OFF_CHAIN_PREFIX));
    let meta = off_chain.off_chain_ref.as_ref().expect("off-chain metadata");
    assert!(std::path::Path::new(&meta.file_path).exists());
    assert_eq!(meta.file_size, 1024);

    let on_chain = engine
        .append(&small, &signer, AppendOptions::default())
        .unwrap();
    assert_eq!(on_chain.data, small);
    assert!(on_chain.off_chain_ref.is_none());

    // The off-chain plaintext is recoverable and matches.
    let plaintext = engine
        .get_off_chain_payload(off_chain.block_number)
        .unwrap();
    assert_eq!(plaintext, big.as_bytes());

    let report = engine.validate_chain().unwrap();
    assert!(report.is_structurally_intact, "{}", report.report_text);
}

#[test]
fn force_off_chain_routes_small_payloads() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), 1024 * 1024);
    let signer = authorized_signer(&engine, "Alice");

    let block = engine
        .append(
            "tiny but forced",
            &signer,
            AppendOptions {
                force_off_chain: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert!(block.data.starts_with(OFF_CHAIN_PREFIX));
    assert_eq!(
        engine.get_off_chain_payload(block.block_number).unwrap(),
        b"tiny but forced"
    );
}

#[test]
fn empty_payload_is_a_valid_system_block() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), 1024 * 1024);
    let signer = authorized_signer(&engine, "Alice");

    let block = engine.append("", &signer, AppendOptions::default()).unwrap();
    assert_eq!(block.data, "");
    assert!(engine.validate_chain().unwrap().is_fully_compliant);
}

// ── Scenario C: revocation semantics ─────────────────────────────────────────

#[test]
fn revoked_signer_cannot_append_but_history_stays_compliant() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), 1024 * 1024);
    let signer = authorized_signer(&engine, "Alice");

    engine
        .append("first", &signer, AppendOptions::default())
        .unwrap();
    engine.revoke_authorized_key(&signer.public_key).unwrap();

    let err = engine
        .append("second", &signer, AppendOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    // Block 1 was authorized at its own timestamp; revocation later does
    // not degrade compliance.
    let report = engine.validate_chain().unwrap();
    assert!(report.is_structurally_intact);
    assert!(report.is_fully_compliant, "{}", report.report_text);
}

#[test]
fn authorization_interval_is_nanosecond_exact() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), 1024 * 1024);
    let signer = authorized_signer(&engine, "Alice");
    engine.revoke_authorized_key(&signer.public_key).unwrap();

    let record = &engine.get_key_history(&signer.public_key).unwrap()[0];
    let revoked_at = record.revoked_at.expect("revoked record");

    assert!(engine
        .was_key_authorized_at(&signer.public_key, revoked_at - 1)
        .unwrap());
    assert!(!engine
        .was_key_authorized_at(&signer.public_key, revoked_at)
        .unwrap());
}

#[test]
fn reauthorization_inserts_a_fresh_record() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), 1024 * 1024);
    let signer = authorized_signer(&engine, "Alice");

    engine.revoke_authorized_key(&signer.public_key).unwrap();
    engine
        .add_authorized_key(&signer.public_key, "Alice", None)
        .unwrap();

    let history = engine.get_key_history(&signer.public_key).unwrap();
    assert_eq!(history.len(), 2);
    assert!(!history[0].is_active);
    assert!(history[1].is_active);
    assert!(engine.is_key_active_now(&signer.public_key).unwrap());
}

// ── Scenario D: force-delete compliance degradation ──────────────────────────

#[test]
fn force_delete_degrades_compliance_not_structure() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), 1024 * 1024);
    let signer = authorized_signer(&engine, "Alice");

    engine
        .append("signed by K", &signer, AppendOptions::default())
        .unwrap();

    let impact = engine.analyze_deletion_impact(&signer.public_key).unwrap();
    assert!(impact.exists);
    assert!(!impact.safe_to_delete);
    assert_eq!(impact.affected_blocks_count, 1);
    assert!(impact.severe_impact);

    // The safe path refuses.
    let err = engine.delete_key_safely(&signer.public_key).unwrap_err();
    assert!(matches!(err, SigilError::DeletionBlocked { blocks: 1 }));
    let err = engine
        .delete_key_forced(&signer.public_key, "gdpr", false)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    // The forced path goes through and orphans block 1.
    engine
        .delete_key_forced(&signer.public_key, "gdpr", true)
        .unwrap();

    let report = engine.validate_chain().unwrap();
    assert!(report.is_structurally_intact, "{}", report.report_text);
    assert!(!report.is_fully_compliant);
    assert_eq!(report.revoked_blocks.len(), 1);
    assert_eq!(report.revoked_blocks[0].block_number, 1);
}

// ── Scenario E: granular search ──────────────────────────────────────────────

#[test]
fn term_visibility_splits_search_layers() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), 1024 * 1024);
    let signer = authorized_signer(&engine, "Clinic");

    let visibility = TermVisibilityMap::default()
        .set("john", TermVisibility::Private)
        .set("diabetes", TermVisibility::Private);
    let block = engine
        .append(
            "routine visit notes",
            &signer,
            AppendOptions {
                manual_terms: vec!["patient".into(), "john".into(), "diabetes".into()],
                term_visibility: visibility,
                category: Some("MEDICAL".into()),
                password: Some("pw123456".into()),
                ..Default::default()
            },
        )
        .unwrap();

    // Fast-public sees the public term.
    let hits = engine
        .search("patient", &SearchOptions::default())
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].block_hash, block.hash);
    assert!(hits[0].private_snippet.is_none());

    // Fast-public never sees private-only terms.
    assert!(engine
        .search("diabetes", &SearchOptions::default())
        .unwrap()
        .is_empty());

    // Encrypted search with the right password finds it.
    let hits = engine
        .search(
            "diabetes",
            &SearchOptions {
                mode: Some(SearchMode::Encrypted),
                password: Some("pw123456".into()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].block_hash, block.hash);

    // A wrong password yields zero private matches, not an error.
    assert!(engine
        .search(
            "diabetes",
            &SearchOptions {
                mode: Some(SearchMode::Encrypted),
                password: Some("wrong1pw".into()),
                ..Default::default()
            },
        )
        .unwrap()
        .is_empty());

    // Category queries use the public layer.
    let by_category = engine.search_by_category("medical").unwrap();
    assert_eq!(by_category.len(), 1);
    assert_eq!(by_category[0].block_hash, block.hash);
}

#[test]
fn exhaustive_search_scans_decrypted_payloads() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), 1024);
    let signer = authorized_signer(&engine, "Archive");

    // Off-chain block whose terms were never indexed.
    let body = format!("{} hidden-needle {}", "x".repeat(600), "y".repeat(600));
    let block = engine.append(&body, &signer, AppendOptions::default()).unwrap();
    assert!(block.data.starts_with(OFF_CHAIN_PREFIX));

    // Fast-public cannot find it.
    assert!(engine
        .search("hidden-needle", &SearchOptions::default())
        .unwrap()
        .is_empty());

    // Exhaustive (password + signer key) decrypts the off-chain bytes.
    let hits = engine
        .search(
            "hidden-needle",
            &SearchOptions {
                mode: Some(SearchMode::Exhaustive),
                password: Some("pw123456".into()),
                signer_public_key: Some(signer.public_key.clone()),
            },
        )
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].block_number, block.block_number);
    assert!(hits[0]
        .private_snippet
        .as_ref()
        .unwrap()
        .contains("hidden-needle"));
}

// ── Misc boundaries ──────────────────────────────────────────────────────────

#[test]
fn unauthorized_signer_is_rejected_before_any_write() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), 1024 * 1024);
    let stranger = KeyPair::generate().unwrap();

    let err = engine
        .append("nope", &stranger, AppendOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(engine.block_count(), 1);
}

#[test]
fn weak_passwords_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), 1024 * 1024);
    let signer = authorized_signer(&engine, "Alice");

    let err = engine
        .append(
            "data",
            &signer,
            AppendOptions {
                password: Some("short1".into()),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, SigilError::WeakPassword { .. }));
}

#[test]
fn on_chain_encryption_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), 1024 * 1024);
    let signer = authorized_signer(&engine, "Alice");

    let block = engine
        .append(
            "classified entry",
            &signer,
            AppendOptions {
                password: Some("m1secret".into()),
                ..Default::default()
            },
        )
        .unwrap();

    let envelope = block.encryption_metadata.as_ref().expect("envelope");
    assert_eq!(envelope.iterations, 200_000);
    assert_ne!(block.data, "classified entry");

    assert_eq!(
        engine
            .decrypt_block_payload(block.block_number, "m1secret")
            .unwrap(),
        b"classified entry"
    );
    assert!(engine
        .decrypt_block_payload(block.block_number, "wrong1pw")
        .is_err());

    // Structure holds without the password.
    assert!(engine.validate_chain().unwrap().is_structurally_intact);
}
