//! Coordinator behaviour at its edges: deadlines, schema changes,
//! cancellation and failures in the source.

use std::time::{Duration, Instant};

use anyhow::Result;

use reorg_core::schema::SchemaFingerprint;
use reorg_replay::stream::{ChangeAction, StreamRow};
use reorg_replay::{
    ConcurrentChanges, ConsistencyToken, LockMode, ProcessOutcome, ReplayConfig, ReplayError,
};

use super::helpers::{config, create_table, Original, Rebuild, ORIGINAL, PKEY, REPLACEMENT};

fn fill(original: &mut Original, count: u64) -> Result<()> {
    for id in 1..=count {
        original.insert(id, id, "row")?;
    }
    Ok(())
}

#[test]
fn test_elapsed_deadline_defers_replay() -> Result<()> {
    let mut original = Original::new()?;
    let mut rebuild = Rebuild::start(&original, config())?;
    fill(&mut original, 10)?;
    rebuild.catch_up_to(original.stream.end_lsn());

    let outcome = rebuild.changes.process(
        &mut original.stream,
        &mut rebuild.cursor,
        &rebuild.checker,
        &mut rebuild.table,
        LockMode::ShareUpdateExclusive,
        Some(Instant::now()),
    )?;

    assert!(!outcome.complete);
    assert_eq!(outcome.passes, 0);
    assert_eq!(outcome.stats.total(), 0);
    // Decoded but not applied: the changes wait in the buffer.
    assert_eq!(rebuild.table.slot_count(), 0);
    let buffered = rebuild.changes.buffer().len();
    assert!(buffered <= 1);

    let outcome = rebuild.changes.process(
        &mut original.stream,
        &mut rebuild.cursor,
        &rebuild.checker,
        &mut rebuild.table,
        LockMode::ShareUpdateExclusive,
        None,
    )?;
    assert!(outcome.complete);
    assert_eq!(outcome.stats.inserts, 10);
    assert_eq!(rebuild.contents(), original.expected());
    Ok(())
}

#[test]
fn test_generous_deadline_completes() -> Result<()> {
    let mut original = Original::new()?;
    let mut rebuild = Rebuild::start(&original, config())?;
    fill(&mut original, 25)?;
    rebuild.catch_up_to(original.stream.end_lsn());

    let outcome = rebuild.changes.process(
        &mut original.stream,
        &mut rebuild.cursor,
        &rebuild.checker,
        &mut rebuild.table,
        LockMode::ShareUpdateExclusive,
        Some(Instant::now() + Duration::from_secs(60)),
    )?;

    assert!(outcome.complete);
    assert_eq!(outcome.passes, 1);
    assert_eq!(rebuild.contents(), original.expected());
    Ok(())
}

#[test]
fn test_nothing_to_do_is_complete() -> Result<()> {
    let mut original = Original::new()?;
    original.unrelated_insert(1)?;
    let mut rebuild = Rebuild::start(&Original::new()?, config())?;
    rebuild.catch_up_to(original.stream.end_lsn());

    let outcome = rebuild.changes.process(
        &mut original.stream,
        &mut rebuild.cursor,
        &rebuild.checker,
        &mut rebuild.table,
        LockMode::NoLock,
        None,
    )?;
    assert!(outcome.complete);
    assert_eq!(outcome.passes, 0);
    assert_eq!(outcome.position, original.stream.end_lsn());
    assert_eq!(rebuild.changes.buffer().len(), 0);
    Ok(())
}

#[test]
fn test_drained_window_is_replayed_past_deadline() -> Result<()> {
    let mut original = Original::new()?;
    let mut rebuild = Rebuild::start(&original, config())?;

    // A single change record with no transaction markers around it.
    let row = original.row(1, 5, "last")?;
    original
        .stream
        .insert(ORIGINAL, StreamRow::new(row.as_bytes().to_vec()));
    original.rows.insert(1, row);
    rebuild.catch_up_to(original.stream.end_lsn());

    let outcome = rebuild.changes.process(
        &mut original.stream,
        &mut rebuild.cursor,
        &rebuild.checker,
        &mut rebuild.table,
        LockMode::ShareUpdateExclusive,
        Some(Instant::now()),
    )?;

    assert!(outcome.complete);
    assert_eq!(outcome.passes, 1);
    assert_eq!(outcome.stats.inserts, 1);
    assert!(rebuild.changes.buffer().is_empty());
    assert_eq!(rebuild.contents(), original.expected());
    Ok(())
}

#[test]
fn test_update_pair_split_across_passes() -> Result<()> {
    let mut original = Original::new()?;
    original.preload(1, 1, "a")?;
    let mut rebuild = Rebuild::start(
        &original,
        ReplayConfig {
            memory_threshold: 1,
            ..config()
        },
    )?;
    original.update(1, 2, 1, "a")?;
    rebuild.catch_up_to(original.stream.end_lsn());

    // The old image fills the first window; the new one opens the second.
    let outcome = rebuild.changes.process(
        &mut original.stream,
        &mut rebuild.cursor,
        &rebuild.checker,
        &mut rebuild.table,
        LockMode::ShareUpdateExclusive,
        None,
    )?;
    assert!(outcome.complete);
    assert_eq!(outcome.stats.updates, 1);
    assert!(outcome.passes >= 2);
    assert_eq!(rebuild.contents(), original.expected());
    Ok(())
}

#[test]
fn test_outcome_serializes() -> Result<()> {
    let mut original = Original::new()?;
    let mut rebuild = Rebuild::start(&original, config())?;
    fill(&mut original, 2)?;
    rebuild.catch_up_to(original.stream.end_lsn());

    let outcome = rebuild.changes.process(
        &mut original.stream,
        &mut rebuild.cursor,
        &rebuild.checker,
        &mut rebuild.table,
        LockMode::ShareUpdateExclusive,
        None,
    )?;
    let json = serde_json::to_string(&outcome)?;
    assert_eq!(serde_json::from_str::<ProcessOutcome>(&json)?, outcome);
    Ok(())
}

#[test]
fn test_schema_change_is_fatal() -> Result<()> {
    let mut original = Original::new()?;
    let mut rebuild = Rebuild::start(&original, config())?;
    fill(&mut original, 3)?;
    rebuild.catch_up_to(original.stream.end_lsn());

    rebuild.checker.publish(SchemaFingerprint(original.fingerprint().0 ^ 1));
    let result = rebuild.changes.process(
        &mut original.stream,
        &mut rebuild.cursor,
        &rebuild.checker,
        &mut rebuild.table,
        LockMode::ShareUpdateExclusive,
        None,
    );

    match result {
        Err(ReplayError::SchemaChanged(changed)) => {
            assert_eq!(changed.relation, ORIGINAL);
            assert_eq!(changed.expected, original.fingerprint());
        }
        other => panic!("expected SchemaChanged, got {other:?}"),
    }
    assert_eq!(rebuild.table.slot_count(), 0);
    Ok(())
}

#[test]
fn test_exclusive_lock_skips_schema_check() -> Result<()> {
    let mut original = Original::new()?;
    let mut rebuild = Rebuild::start(&original, config())?;
    fill(&mut original, 3)?;
    rebuild.catch_up_to(original.stream.end_lsn());

    rebuild.checker.publish(SchemaFingerprint(0));
    let outcome = rebuild.changes.process(
        &mut original.stream,
        &mut rebuild.cursor,
        &rebuild.checker,
        &mut rebuild.table,
        LockMode::AccessExclusive,
        None,
    )?;
    assert!(outcome.complete);
    assert_eq!(rebuild.contents(), original.expected());
    Ok(())
}

#[test]
fn test_cancellation_stops_processing() -> Result<()> {
    let mut original = Original::new()?;
    let mut rebuild = Rebuild::start(&original, config())?;
    fill(&mut original, 3)?;
    rebuild.catch_up_to(original.stream.end_lsn());

    rebuild.cancel.cancel();
    let result = rebuild.changes.process(
        &mut original.stream,
        &mut rebuild.cursor,
        &rebuild.checker,
        &mut rebuild.table,
        LockMode::ShareUpdateExclusive,
        None,
    );
    assert!(matches!(result, Err(ReplayError::Cancelled)));
    assert_eq!(original.stream.reads(), 0);
    Ok(())
}

#[test]
fn test_malformed_change_restores_resource_owner() -> Result<()> {
    let mut original = Original::new()?;
    let mut rebuild = Rebuild::start(&original, config())?;
    original.insert(1, 1, "fine")?;
    original
        .stream
        .push_change(ORIGINAL, ChangeAction::Update, None, None);
    rebuild.catch_up_to(original.stream.end_lsn());

    let result = rebuild.changes.process(
        &mut original.stream,
        &mut rebuild.cursor,
        &rebuild.checker,
        &mut rebuild.table,
        LockMode::ShareUpdateExclusive,
        None,
    );

    assert!(matches!(result, Err(ReplayError::Decode { .. })));
    assert_eq!(original.stream.resource_owner().name(), "top-level");
    assert_eq!(original.stream.cache_invalidations(), 2);
    assert_eq!(original.stream.confirmed(), None);
    Ok(())
}

#[test]
fn test_missing_identity_index() -> Result<()> {
    let table = create_table(REPLACEMENT)?;
    let token = ConsistencyToken::capture(&table);
    let result = ConcurrentChanges::new(
        &table,
        reorg_core::table::IndexId(42),
        token,
        &config(),
        Default::default(),
    );
    assert!(matches!(
        result,
        Err(ReplayError::IdentityIndexMissing { index: 42, .. })
    ));
    assert!(table.indexes().iter().all(|i| i.open_handles() == 0));
    Ok(())
}

#[test]
fn test_finish_closes_index_handles() -> Result<()> {
    let original = Original::new()?;
    let rebuild = Rebuild::start(&original, config())?;
    let indexes = rebuild.table.indexes().to_vec();
    assert!(indexes.iter().all(|i| i.open_handles() == 1));
    assert_eq!(rebuild.changes.index_state().identity_index().id(), PKEY);

    rebuild.changes.finish();
    assert!(indexes.iter().all(|i| i.open_handles() == 0));
    Ok(())
}

#[test]
fn test_wrong_table_rejected() -> Result<()> {
    let mut original = Original::new()?;
    let mut rebuild = Rebuild::start(&original, config())?;
    let mut other = create_table(ORIGINAL)?;

    let result = rebuild.changes.process(
        &mut original.stream,
        &mut rebuild.cursor,
        &rebuild.checker,
        &mut other,
        LockMode::ShareUpdateExclusive,
        None,
    );
    assert!(matches!(result, Err(ReplayError::InvariantViolation(_))));
    Ok(())
}
