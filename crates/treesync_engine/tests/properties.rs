//! Property tests for whole sync cycles.

use proptest::prelude::*;
use std::sync::Arc;
use treesync_core::{BaseTransaction, Directory, Id};
use treesync_engine::{
    update_from_entity, ConflictPolicy, MockServerConnection, SyncConfig, SyncError, Syncer,
    UpdateApplicator,
};
use treesync_protocol::SyncEntity;
use treesync_testkit::prelude::*;

fn sync_batch(
    dir: &TestDirectory,
    batch: Vec<SyncEntity>,
    policy: ConflictPolicy,
) -> Result<(), SyncError> {
    let server = Arc::new(MockServerConnection::new());
    server.push_entities(batch);
    let config = SyncConfig::new("share").with_conflict_policy(policy);
    Syncer::new(config, dir.shared(), server).sync().map(|_| ())
}

fn policy_strategy() -> impl Strategy<Value = ConflictPolicy> {
    prop_oneof![
        Just(ConflictPolicy::ServerWins),
        Just(ConflictPolicy::ClientWins),
        Just(ConflictPolicy::LastWriteWins),
        Just(ConflictPolicy::Manual),
    ]
}

/// Applies `batch` directly and returns the number of passes taken.
fn apply_directly(dir: &Directory, batch: &[SyncEntity], max_passes: usize) -> (usize, bool) {
    let mut wtx = dir.write();
    let mut applicator = UpdateApplicator::new(batch.iter().map(update_from_entity), max_passes);
    applicator.run(&mut wtx).unwrap();
    let done = applicator.all_updates_applied();
    let passes = applicator.passes();
    wtx.commit().unwrap();
    (passes, done)
}

#[test]
fn reverse_chain_needs_one_pass_per_level() {
    let dir = Directory::open_in_memory("chain");
    let chain = scenarios::reverse_chain(12);
    let (passes, done) = apply_directly(&dir, &chain, 1_000);
    assert!(done);
    assert_eq!(passes, 12);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn shuffled_tree_applies_fully_within_n_passes(batch in shuffled_tree_strategy(24)) {
        let dir = Directory::open_in_memory("shuffled");
        let n = batch.len();
        let (passes, done) = apply_directly(&dir, &batch, 1_000);
        prop_assert!(done);
        prop_assert!(passes <= n);
        prop_assert_eq!(dir.read().kernel().len(), n + 1);
    }

    #[test]
    fn consistent_batches_sync_without_conflicts(batch in shuffled_tree_strategy(24)) {
        let dir = TestDirectory::memory();
        let n = batch.len();
        sync_batch(&dir, batch, ConflictPolicy::ServerWins).unwrap();
        prop_assert_eq!(live_ids(&dir).len(), n);
        prop_assert!(dir.read().unapplied_updates().is_empty());
        assert_tree_invariants(&dir);
    }

    #[test]
    fn syncing_twice_is_idempotent(
        batch in hostile_batch_strategy(16),
        policy in policy_strategy(),
    ) {
        let dir = TestDirectory::memory();
        let first = sync_batch(&dir, batch.clone(), policy);
        prop_assume!(first.is_ok());
        let fingerprint = tree_fingerprint(&dir);
        let queued = dir.read().unapplied_updates();

        // A fresh server with the same log replays the batch from timestamp 0.
        {
            let mut wtx = dir.write();
            wtx.set_last_sync_timestamp(0);
            wtx.commit().unwrap();
        }
        let second = sync_batch(&dir, batch, policy);
        prop_assert!(second.is_ok(), "replay failed: {:?}", second);
        prop_assert_eq!(tree_fingerprint(&dir), fingerprint);
        prop_assert_eq!(dir.read().unapplied_updates(), queued);
        assert_tree_invariants(&dir);
    }

    #[test]
    fn hostile_batches_keep_tree_invariants(
        batch in hostile_batch_strategy(24),
        policy in policy_strategy(),
    ) {
        let dir = TestDirectory::memory();
        create_synced_entry(&dir, "h0", Id::root(), "Docs", 1, true);
        create_local_entry(&dir, Id::server("h0"), "a.txt", false);
        create_local_entry(&dir, Id::root(), "notes", true);

        match sync_batch(&dir, batch, policy) {
            Ok(()) | Err(SyncError::NonConvergence { .. }) => {}
            Err(e) => prop_assert!(false, "unexpected error: {e}"),
        }
        assert_tree_invariants(&dir);
    }
}
