//! Replacement table converges to the original under mixed workloads.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use reorg_replay::{LockMode, ReplayConfig};

use super::helpers::{config, name_of, Original, Rebuild};

fn run_workload(
    original: &mut Original,
    rng: &mut StdRng,
    ops: usize,
    next_id: &mut u64,
) -> Result<()> {
    for _ in 0..ops {
        let ids: Vec<u64> = original.rows.keys().copied().collect();
        match rng.gen_range(0..10) {
            0..=3 => {
                *next_id += 1;
                let id = *next_id;
                if rng.gen_range(0..4) == 0 {
                    original.insert_external(id, rng.gen_range(0..50), &format!("external {id}"))?;
                } else {
                    original.insert(id, rng.gen_range(0..50), &format!("row {id}"))?;
                }
            }
            4..=6 if !ids.is_empty() => {
                let id = ids[rng.gen_range(0..ids.len())];
                if rng.gen_range(0..3) == 0 {
                    *next_id += 1;
                    original.update(id, *next_id, rng.gen_range(0..50), "rekeyed")?;
                } else {
                    original.update(id, id, rng.gen_range(0..50), &format!("updated {id}"))?;
                }
            }
            7..=8 if !ids.is_empty() => {
                let id = ids[rng.gen_range(0..ids.len())];
                original.delete(id)?;
            }
            _ => original.unrelated_insert(rng.gen_range(0..1000))?,
        }
    }
    Ok(())
}

fn converge(config: ReplayConfig, seed: u64) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut original = Original::new()?;
    let mut next_id = 0;
    for _ in 0..30 {
        next_id += 1;
        original.preload(next_id, rng.gen_range(0..50), &format!("initial {next_id}"))?;
    }

    let mut rebuild = Rebuild::start(&original, config)?;

    // Several rounds of concurrent writes, each caught up by one call.
    for _ in 0..4 {
        run_workload(&mut original, &mut rng, 150, &mut next_id)?;
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
        assert_eq!(outcome.position, original.stream.end_lsn());
        assert_eq!(rebuild.contents(), original.expected());
    }

    assert_eq!(original.stream.confirmed(), Some(original.stream.end_lsn()));
    let totals = rebuild.changes.finish();
    assert!(totals.total() > 0);
    Ok(())
}

#[test]
fn test_converges_with_default_config() -> Result<()> {
    converge(config(), 7)
}

#[test]
fn test_converges_with_many_small_passes() -> Result<()> {
    let config = ReplayConfig {
        memory_threshold: 2048,
        ..config()
    };
    converge(config, 11)
}

#[test]
fn test_converges_through_spill_file() -> Result<()> {
    let config = ReplayConfig {
        spill_threshold: 1024,
        ..config()
    };
    converge(config, 23)
}

#[test]
fn test_external_values_are_flattened() -> Result<()> {
    let mut original = Original::new()?;
    let mut rebuild = Rebuild::start(&original, config())?;

    original.insert_external(1, 3, "stored out of line")?;
    rebuild.catch_up_to(original.stream.end_lsn());
    rebuild.changes.process(
        &mut original.stream,
        &mut rebuild.cursor,
        &rebuild.checker,
        &mut rebuild.table,
        LockMode::ShareUpdateExclusive,
        None,
    )?;

    let rows = rebuild.contents();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        name_of(&rebuild.table, &rows[0]).as_deref(),
        Some("stored out of line")
    );
    Ok(())
}
