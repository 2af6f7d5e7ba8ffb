//! Fixed change sequences with known outcomes.

use anyhow::Result;

use reorg_core::VisibilityCounter;
use reorg_replay::codec::HEADER_LEN;
use reorg_replay::{
    apply_concurrent_changes, CancellationFlag, ChangeKind, DecodingCursor, DecodingState,
    IndexInsertState, LockMode, PendingOldRow, ReplayConfig, ReplayError, ReplayStats,
};

use super::helpers::{config, Original, Rebuild, ORIGINAL, PKEY, REPLACEMENT};

#[test]
fn test_insert_update_delete_leaves_nothing() -> Result<()> {
    let mut original = Original::new()?;
    let mut rebuild = Rebuild::start(&original, config())?;

    original.insert(1, 5, "x")?;
    original.update(1, 1, 6, "x")?;
    original.delete(1)?;
    rebuild.catch_up_to(original.stream.end_lsn());

    let outcome = rebuild.changes.process(
        &mut original.stream,
        &mut rebuild.cursor,
        &rebuild.checker,
        &mut rebuild.table,
        LockMode::ShareUpdateExclusive,
        None,
    )?;

    assert!(outcome.complete);
    assert_eq!(
        outcome.stats,
        ReplayStats {
            inserts: 1,
            updates: 1,
            deletes: 1
        }
    );
    assert!(rebuild.contents().is_empty());
    assert!(rebuild.changes.buffer().is_empty());
    Ok(())
}

#[test]
fn test_three_inserts_update_and_delete() -> Result<()> {
    let mut original = Original::new()?;
    let mut rebuild = Rebuild::start(&original, config())?;

    original.insert(1, 1, "x")?;
    original.insert(2, 2, "y")?;
    original.insert(3, 3, "z")?;
    original.update(2, 2, 20, "y prime")?;
    original.delete(3)?;
    rebuild.catch_up_to(original.stream.end_lsn());

    let outcome = rebuild.changes.process(
        &mut original.stream,
        &mut rebuild.cursor,
        &rebuild.checker,
        &mut rebuild.table,
        LockMode::ShareUpdateExclusive,
        None,
    )?;

    assert_eq!(
        outcome.stats,
        ReplayStats {
            inserts: 3,
            updates: 1,
            deletes: 1
        }
    );
    assert_eq!(rebuild.contents(), original.expected());
    assert_eq!(rebuild.contents().len(), 2);
    Ok(())
}

#[test]
fn test_delete_without_match_is_fatal() -> Result<()> {
    let mut original = Original::new()?;
    original.preload(1, 1, "never copied")?;
    let mut rebuild = Rebuild::start(&Original::new()?, config())?;

    // Delete of a row the replacement never received, then an insert.
    original.delete(1)?;
    original.insert(2, 2, "after")?;
    rebuild.catch_up_to(original.stream.end_lsn());

    let result = rebuild.changes.process(
        &mut original.stream,
        &mut rebuild.cursor,
        &rebuild.checker,
        &mut rebuild.table,
        LockMode::ShareUpdateExclusive,
        None,
    );

    match result {
        Err(ReplayError::LookupMiss { kind, .. }) => assert_eq!(kind, ChangeKind::Delete),
        other => panic!("expected LookupMiss, got {other:?}"),
    }
    assert_eq!(rebuild.table.slot_count(), 0);
    Ok(())
}

#[test]
fn test_threshold_limits_events_per_window() -> Result<()> {
    let mut original = Original::new()?;
    for id in 1..=5 {
        original.insert(id, id, "big")?;
    }

    let (windows, rows) = replay_in_small_windows(&mut original)?;
    assert_eq!(windows, vec![2, 2, 1]);
    assert_eq!(rows, vec![1, 2, 3, 4, 5]);
    Ok(())
}

#[test]
fn test_threshold_splits_update_pair() -> Result<()> {
    let mut original = Original::new()?;
    original.insert(1, 1, "big")?;
    original.update(1, 2, 1, "big")?;
    original.insert(3, 3, "big")?;

    // insert + old image, then new image + insert, then the last commit
    let (windows, rows) = replay_in_small_windows(&mut original)?;
    assert_eq!(windows, vec![2, 2, 0]);
    assert_eq!(rows, vec![2, 3]);
    Ok(())
}

/// Decodes and replays `original`'s whole stream with a threshold that
/// every encoded event exceeds by more than half. Returns the number of
/// events buffered per window and the ids of the resulting rows.
fn replay_in_small_windows(original: &mut Original) -> Result<(Vec<usize>, Vec<u64>)> {
    let stream = &mut original.stream;
    let mut table = super::helpers::create_table(REPLACEMENT)?;
    let config = ReplayConfig {
        memory_threshold: (table.record_size + HEADER_LEN) * 2 - 1,
        ..config()
    };
    assert_eq!(config.relation_id, ORIGINAL);

    let mut state = DecodingState::new(&config, CancellationFlag::new());
    let mut cursor = DecodingCursor::new(Default::default(), stream.end_lsn());
    let iistate = IndexInsertState::open(&table, PKEY)?;
    let identity = iistate.identity_key();
    let mut visibility = VisibilityCounter::starting_after(table.last_command());
    let mut pending = PendingOldRow::new();

    let mut windows = Vec::new();
    loop {
        let drained = state.decode_concurrent_changes(&mut *stream, &mut cursor, None)?;
        windows.push(state.buffer().len());
        apply_concurrent_changes(
            state.buffer_mut(),
            &mut table,
            &identity,
            &iistate,
            &mut visibility,
            &mut pending,
        )?;
        if drained {
            break;
        }
    }
    assert!(!pending.is_pending());

    let mut ids: Vec<u64> = table
        .visible_rows(visibility.snapshot())
        .iter()
        .filter_map(|r| r.read_u64(0))
        .collect();
    ids.sort_unstable();
    Ok((windows, ids))
}

#[test]
fn test_update_pairing_with_key_change() -> Result<()> {
    let mut original = Original::new()?;
    original.preload(1, 10, "a")?;
    original.preload(2, 20, "b")?;
    let mut rebuild = Rebuild::start(&original, config())?;

    original.update(1, 100, 10, "a moved")?;
    original.update(2, 2, 21, "b")?;
    original.update(100, 101, 11, "a moved again")?;
    rebuild.catch_up_to(original.stream.end_lsn());

    let outcome = rebuild.changes.process(
        &mut original.stream,
        &mut rebuild.cursor,
        &rebuild.checker,
        &mut rebuild.table,
        LockMode::ShareUpdateExclusive,
        None,
    )?;

    assert_eq!(outcome.stats.updates, 3);
    assert_eq!(rebuild.contents(), original.expected());
    // Old images do not consume command ids.
    assert_eq!(rebuild.changes.visibility().advances(), 3);
    Ok(())
}
