//! Row routing: hash shuffles, their inverse, sampling and rebalancing.

use crate::native::NativeArray;
use crate::utils::{hash_key, row_key, SplitMix64};
use anyhow::{bail, ensure, Result};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

/// Destination worker of every row, then rows grouped by worker in input order.
pub(super) fn hash_partition(
    columns: &[Arc<NativeArray>],
    n_keys: usize,
    n_rows: usize,
    workers: usize,
) -> Vec<usize> {
    if workers <= 1 {
        return (0..n_rows).collect();
    }
    let dest: Vec<usize> = (0..n_rows)
        .into_par_iter()
        .map(|r| (hash_key(&row_key(columns, n_keys, r)) % workers as u64) as usize)
        .collect();
    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); workers];
    for (r, w) in dest.into_iter().enumerate() {
        buckets[w].push(r);
    }
    buckets.concat()
}

/// Rows that undo `routing` on a table of `n_rows` rows.
pub(super) fn invert(routing: &[usize], n_rows: usize) -> Result<Vec<usize>> {
    ensure!(
        routing.len() == n_rows,
        "routing info covers {} rows, table has {n_rows}",
        routing.len()
    );
    let mut back = vec![0usize; n_rows];
    for (out_row, &src) in routing.iter().enumerate() {
        back[src] = out_row;
    }
    Ok(back)
}

/// Row positions of a sample: `n` rows when `n >= 0`, else `frac` of the table.
pub(super) fn sample_rows(n_rows: usize, n: i64, frac: f64, replace: bool, seed: u64) -> Result<Vec<usize>> {
    let want = if n >= 0 {
        n as usize
    } else {
        ensure!(frac.is_finite() && frac >= 0.0, "sample fraction {frac} is not valid");
        (frac * n_rows as f64).round() as usize
    };
    let mut rng = SplitMix64::new(seed);
    if replace {
        ensure!(want == 0 || n_rows > 0, "cannot sample {want} rows from an empty table");
        return Ok((0..want).map(|_| rng.below(n_rows)).collect());
    }
    ensure!(
        want <= n_rows,
        "cannot sample {want} rows without replacement from {n_rows}"
    );
    let mut rows: Vec<usize> = (0..n_rows).collect();
    rng.shuffle(&mut rows);
    rows.truncate(want);
    Ok(rows)
}

/// Seed of a renormalization, `None` to keep row order.
pub(super) fn renormalization_seed(random: i32, random_seed: i64, engine_seed: u64) -> Result<Option<u64>> {
    Ok(match random {
        0 => None,
        1 => Some(engine_seed),
        2 => Some(random_seed as u64),
        other => bail!("unknown renormalization random mode {other}"),
    })
}

/// Check a caller-supplied rank group; an empty group means every worker.
pub(super) fn validate_ranks(num_ranks: usize, ranks: &[i32], workers: usize) -> Result<Vec<usize>> {
    ensure!(
        num_ranks == ranks.len(),
        "num_ranks is {num_ranks} but {} ranks were given",
        ranks.len()
    );
    if ranks.is_empty() {
        return Ok((0..workers).collect());
    }
    let mut seen = HashSet::new();
    ranks
        .iter()
        .map(|&r| {
            let r = usize::try_from(r)
                .ok()
                .filter(|&r| r < workers)
                .ok_or_else(|| anyhow::anyhow!("rank {r} is outside 0..{workers}"))?;
            ensure!(seen.insert(r), "rank {r} listed twice");
            Ok(r)
        })
        .collect()
}

/// Rows dealt round-robin onto `ranks` (optionally shuffled first), then
/// listed in worker order.
pub(super) fn rebalance(n_rows: usize, ranks: &[usize], workers: usize, seed: Option<u64>) -> Vec<usize> {
    let mut rows: Vec<usize> = (0..n_rows).collect();
    if let Some(seed) = seed {
        SplitMix64::new(seed).shuffle(&mut rows);
    }
    if ranks.len() <= 1 {
        return rows;
    }
    let mut per_worker: Vec<Vec<usize>> = vec![Vec::new(); workers];
    for (i, r) in rows.into_iter().enumerate() {
        per_worker[ranks[i % ranks.len()]].push(r);
    }
    per_worker.concat()
}
