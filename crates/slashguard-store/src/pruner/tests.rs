//! Tests for retention pruning.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use slashguard_core::types::{Bytes32, PublicKey};

use super::*;
use crate::dao::{blocks, validators, watermarks};
use crate::engine::SlashingProtection;
use crate::error::StoreError;

fn protection() -> SlashingProtection {
    SlashingProtection::in_memory().expect("failed to open in-memory protection database")
}

fn pubkey(byte: u8) -> PublicKey {
    PublicKey::new(vec![byte; 48])
}

fn gvr() -> Bytes32 {
    Bytes32::left_pad(100)
}

/// Authorizes blocks at the given slots through the engine.
fn sign_blocks(protection: &SlashingProtection, key: &PublicKey, slots: impl Iterator<Item = u64>) {
    for slot in slots {
        let root = Bytes32::left_pad(u8::try_from(slot % 250).expect("small slot"));
        assert!(protection
            .may_sign_block(key, &root, slot, &gvr())
            .expect("decision"));
    }
}

fn slots_on_record(protection: &SlashingProtection, key: &PublicKey) -> Vec<u64> {
    let id = protection
        .validator_id(key)
        .expect("lookup")
        .expect("registered");
    protection
        .store()
        .with_read_tx::<_, StoreError>(|tx| {
            Ok(blocks::all_for_validator(tx, id)?
                .into_iter()
                .map(|b| b.slot)
                .collect())
        })
        .expect("read blocks")
}

fn watermark_of(protection: &SlashingProtection, key: &PublicKey) -> watermarks::LowWatermark {
    let id = protection
        .validator_id(key)
        .expect("lookup")
        .expect("registered");
    protection
        .store()
        .with_read_tx::<_, StoreError>(|tx| watermarks::find(tx, id))
        .expect("read watermark")
        .expect("watermark row")
}

#[test]
fn keeps_the_most_recent_blocks_and_raises_the_watermark() {
    let protection = protection();
    let key = pubkey(1);
    sign_blocks(&protection, &key, 0..10);

    let id = protection
        .validator_id(&key)
        .expect("lookup")
        .expect("registered");
    let summary = prune_validator(&protection, id, 5, 5).expect("prune");

    assert_eq!(summary.blocks_deleted, 5);
    assert_eq!(slots_on_record(&protection, &key), vec![5, 6, 7, 8, 9]);
    assert_eq!(watermark_of(&protection, &key).slot, Some(5));

    // The raised watermark now fences the pruned range.
    assert!(!protection
        .may_sign_block(&key, &Bytes32::left_pad(200), 4, &gvr())
        .expect("decision"));
    assert!(protection
        .may_sign_block(&key, &Bytes32::left_pad(200), 10, &gvr())
        .expect("decision"));
}

#[test]
fn keeps_the_most_recent_attestations() {
    let protection = protection();
    let key = pubkey(1);
    for epoch in 1..=10 {
        assert!(protection
            .may_sign_attestation(&key, &Bytes32::left_pad(3), epoch - 1, epoch, &gvr())
            .expect("decision"));
    }

    let id = protection
        .validator_id(&key)
        .expect("lookup")
        .expect("registered");
    let summary = prune_validator(&protection, id, 5, 3).expect("prune");

    assert_eq!(summary.attestations_deleted, 7);
    let watermark = watermark_of(&protection, &key);
    assert_eq!(watermark.target_epoch, Some(8));
    // Source floor follows the retained attestation (7, 8).
    assert_eq!(watermark.source_epoch, Some(7));
}

#[test]
fn validator_without_watermark_is_left_untouched() {
    let protection = protection();
    let key = pubkey(1);
    protection
        .register_validators(std::slice::from_ref(&key))
        .expect("register");

    // Rows written without ever anchoring a watermark: nothing safe to
    // anchor deletion to, so pruning must not touch them.
    let id = protection
        .validator_id(&key)
        .expect("lookup")
        .expect("registered");
    protection
        .store()
        .with_write_tx::<_, StoreError>(|tx| {
            for slot in 0..10 {
                blocks::insert(tx, id, slot, None)?;
            }
            Ok(())
        })
        .expect("insert rows");

    let summary = prune_validator(&protection, id, 3, 3).expect("prune");
    assert_eq!(summary, PruneSummary::default());
    assert_eq!(slots_on_record(&protection, &key).len(), 10);
}

#[test]
fn fewer_rows_than_retention_is_a_no_op() {
    let protection = protection();
    let key = pubkey(1);
    sign_blocks(&protection, &key, 3..6);

    let id = protection
        .validator_id(&key)
        .expect("lookup")
        .expect("registered");
    let summary = prune_validator(&protection, id, 10, 10).expect("prune");
    assert_eq!(summary, PruneSummary::default());
    assert_eq!(slots_on_record(&protection, &key), vec![3, 4, 5]);
    assert_eq!(watermark_of(&protection, &key).slot, Some(3));
}

#[test]
fn zero_retention_is_rejected() {
    let protection = protection();
    let key = pubkey(1);
    sign_blocks(&protection, &key, 0..3);
    let id = protection
        .validator_id(&key)
        .expect("lookup")
        .expect("registered");

    assert!(matches!(
        prune_validator(&protection, id, 0, 5),
        Err(StoreError::InvalidRetention)
    ));
    assert!(matches!(
        prune_all(&protection, 0, 32),
        Err(StoreError::InvalidRetention)
    ));
    assert!(matches!(
        prune_all(&protection, 10, 0),
        Err(StoreError::InvalidRetention)
    ));
}

#[test]
fn prune_all_applies_the_slots_per_epoch_multiple() {
    let protection = protection();
    let first = pubkey(1);
    let second = pubkey(2);
    sign_blocks(&protection, &first, 0..10);
    sign_blocks(&protection, &second, 0..4);

    // Keep 2 epochs of 3 slots: 6 block entries per validator.
    let summary = prune_all(&protection, 2, 3).expect("prune");
    assert_eq!(summary.blocks_deleted, 4);
    assert_eq!(
        slots_on_record(&protection, &first),
        vec![4, 5, 6, 7, 8, 9]
    );
    assert_eq!(slots_on_record(&protection, &second), vec![0, 1, 2, 3]);
}

#[test]
fn pruning_never_lowers_a_watermark() {
    let protection = protection();
    let key = pubkey(1);
    sign_blocks(&protection, &key, 0..10);

    let id = protection
        .validator_id(&key)
        .expect("lookup")
        .expect("registered");
    prune_validator(&protection, id, 3, 3).expect("first prune");
    let raised = watermark_of(&protection, &key).slot;
    assert_eq!(raised, Some(7));

    // A more generous retention later must not pull the floor back down.
    prune_validator(&protection, id, 100, 100).expect("second prune");
    assert_eq!(watermark_of(&protection, &key).slot, raised);
}

#[tokio::test(flavor = "multi_thread")]
async fn pruner_task_runs_and_shuts_down() {
    let protection = Arc::new(protection());
    let key = pubkey(1);
    sign_blocks(&protection, &key, 0..10);

    let config = PrunerConfig::default()
        .with_epochs_to_keep(2)
        .with_slots_per_epoch(2)
        .with_interval(Duration::from_millis(20));
    let task = PrunerTask::new(Arc::clone(&protection), config);
    let shutdown = task.shutdown_handle();
    let handle = tokio::spawn(task.run());

    // Wait for the first pass to land.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if slots_on_record(&protection, &key).len() == 4 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "pruner task never pruned"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown.store(true, Ordering::Release);
    handle.await.expect("task join");
    assert_eq!(slots_on_record(&protection, &key), vec![6, 7, 8, 9]);
}

#[test]
fn prune_all_with_no_validators_is_empty() {
    let protection = protection();
    let summary = prune_all(&protection, 10, 32).expect("prune");
    assert_eq!(summary, PruneSummary::default());
}

#[test]
fn validators_list_in_insertion_order() {
    // `validators::all` backs prune_all; pin its ordering contract.
    let protection = protection();
    protection
        .register_validators(&[pubkey(1), pubkey(2)])
        .expect("register");
    let all = protection
        .store()
        .with_read_tx::<_, StoreError>(validators::all)
        .expect("list validators");
    assert_eq!(all.len(), 2);
    assert!(all[0].0 < all[1].0);
}
