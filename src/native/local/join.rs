//! Hash and cross joins.
//!
//! Matching produces `(left_row, right_row)` pairs, `None` standing for the
//! null-filled side of an outer row. A condition function narrows matches:
//! a pair counts only when its keys are equal and the condition accepts it,
//! so outer rows are the ones left with no accepted pair.

use super::gather_opt;
use crate::native::{JoinCondition, NativeArray};
use crate::utils::{key_has_na, row_key};
use crate::value::Value;
use anyhow::{anyhow, ensure, Result};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

pub(super) type RowPair = (Option<usize>, Option<usize>);

/// Column layout of a join's inputs and output selection.
pub(super) struct JoinLayout<'a> {
    pub n_keys: usize,
    pub n_data_left: usize,
    pub n_data_right: usize,
    /// Right key `k` is merged into left key `k`.
    pub same_key: &'a [bool],
    /// One flag per left column, then one per right column.
    pub key_in_output: &'a [bool],
}

impl JoinLayout<'_> {
    pub fn validate(&self, left_cols: usize, right_cols: usize) -> Result<()> {
        ensure!(
            left_cols == self.n_keys + self.n_data_left,
            "left table has {left_cols} columns, expected {} keys + {} data",
            self.n_keys,
            self.n_data_left
        );
        ensure!(
            right_cols == self.n_keys + self.n_data_right,
            "right table has {right_cols} columns, expected {} keys + {} data",
            self.n_keys,
            self.n_data_right
        );
        ensure!(
            self.same_key.len() == self.n_keys,
            "{} same-key flags for {} keys",
            self.same_key.len(),
            self.n_keys
        );
        ensure!(
            self.key_in_output.len() == left_cols + right_cols,
            "{} output flags for {} columns",
            self.key_in_output.len(),
            left_cols + right_cols
        );
        Ok(())
    }

    fn merged(&self, right_col: usize) -> bool {
        right_col < self.n_keys && self.same_key[right_col]
    }
}

fn accepts(
    cond: Option<&JoinCondition>,
    left: &[Arc<NativeArray>],
    right: &[Arc<NativeArray>],
    l: usize,
    r: usize,
) -> bool {
    cond.is_none_or(|f| f(left, right, l, r))
}

/// Append right rows no pair touched, for right and full outer joins.
fn unmatched_right(pairs: &mut Vec<RowPair>, matched: &[bool]) {
    pairs.extend(
        matched
            .iter()
            .enumerate()
            .filter(|(_, m)| !**m)
            .map(|(r, _)| (None, Some(r))),
    );
}

pub(super) fn hash_match(
    left: &[Arc<NativeArray>],
    right: &[Arc<NativeArray>],
    layout: &JoinLayout<'_>,
    is_left: bool,
    is_right: bool,
    is_na_equal: bool,
    cond: Option<&JoinCondition>,
) -> Vec<RowPair> {
    let n_keys = layout.n_keys;
    let n_right = right.first().map_or(0, |c| c.len());
    let n_left = left.first().map_or(0, |c| c.len());

    let mut index: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
    for r in 0..n_right {
        if !is_na_equal && key_has_na(right, n_keys, r) {
            continue;
        }
        index.entry(row_key(right, n_keys, r)).or_default().push(r);
    }

    let per_left: Vec<Vec<RowPair>> = (0..n_left)
        .into_par_iter()
        .map(|l| {
            let hits: Vec<RowPair> = if !is_na_equal && key_has_na(left, n_keys, l) {
                Vec::new()
            } else {
                index
                    .get(&row_key(left, n_keys, l))
                    .map(|rs| {
                        rs.iter()
                            .filter(|&&r| accepts(cond, left, right, l, r))
                            .map(|&r| (Some(l), Some(r)))
                            .collect()
                    })
                    .unwrap_or_default()
            };
            if hits.is_empty() && is_left {
                vec![(Some(l), None)]
            } else {
                hits
            }
        })
        .collect();

    let mut pairs: Vec<RowPair> = per_left.concat();
    if is_right {
        let mut matched = vec![false; n_right];
        for r in pairs.iter().filter_map(|p| p.0.and(p.1)) {
            matched[r] = true;
        }
        unmatched_right(&mut pairs, &matched);
    }
    pairs
}

pub(super) fn cross_match(
    left: &[Arc<NativeArray>],
    right: &[Arc<NativeArray>],
    n_left: usize,
    n_right: usize,
    is_left: bool,
    is_right: bool,
    cond: Option<&JoinCondition>,
) -> Vec<RowPair> {
    let per_left: Vec<Vec<RowPair>> = (0..n_left)
        .into_par_iter()
        .map(|l| {
            let hits: Vec<RowPair> = (0..n_right)
                .filter(|&r| accepts(cond, left, right, l, r))
                .map(|r| (Some(l), Some(r)))
                .collect();
            if hits.is_empty() && is_left {
                vec![(Some(l), None)]
            } else {
                hits
            }
        })
        .collect();
    let mut pairs = per_left.concat();
    if is_right {
        let mut matched = vec![false; n_right];
        for r in pairs.iter().filter_map(|p| p.0.and(p.1)) {
            matched[r] = true;
        }
        unmatched_right(&mut pairs, &matched);
    }
    pairs
}

/// A merged key column: the left key where the left row exists, else the right one.
fn merge_key(left: &NativeArray, right: &NativeArray, pairs: &[RowPair]) -> Result<NativeArray> {
    let lrows: Vec<Option<usize>> = pairs.iter().map(|p| p.0).collect();
    if pairs.iter().all(|p| p.0.is_some()) {
        return left.take(&lrows);
    }
    let ty = left
        .layout_type()
        .ok_or_else(|| anyhow!("cannot merge {} join keys", left.kind()))?;
    let values: Vec<Value> = pairs
        .iter()
        .map(|p| match p {
            (Some(l), _) => left.value(*l),
            (None, Some(r)) => right.value(*r),
            (None, None) => Value::Null,
        })
        .collect();
    NativeArray::from_values(&ty, &values)
}

/// Output columns: kept left columns (merged keys included), then kept right
/// columns that were not merged.
pub(super) fn assemble(
    left: &[Arc<NativeArray>],
    right: &[Arc<NativeArray>],
    pairs: &[RowPair],
    layout: &JoinLayout<'_>,
) -> Result<Vec<Arc<NativeArray>>> {
    let lrows: Vec<Option<usize>> = pairs.iter().map(|p| p.0).collect();
    let rrows: Vec<Option<usize>> = pairs.iter().map(|p| p.1).collect();
    let n_left = left.len();

    let mut out = Vec::new();
    for (i, col) in left.iter().enumerate() {
        if !layout.key_in_output[i] {
            continue;
        }
        if layout.merged(i) {
            out.push(Arc::new(merge_key(col, &right[i], pairs)?));
        } else {
            out.extend(gather_opt(std::slice::from_ref(col), &lrows)?);
        }
    }
    let kept_right: Vec<Arc<NativeArray>> = right
        .iter()
        .enumerate()
        .filter(|(j, _)| layout.key_in_output[n_left + j] && !layout.merged(*j))
        .map(|(_, c)| Arc::clone(c))
        .collect();
    out.extend(gather_opt(&kept_right, &rrows)?);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArrayType, PrimitiveType};

    fn col(vals: &[Option<i64>]) -> Arc<NativeArray> {
        let vals: Vec<Value> = vals.iter().map(|v| Value::from(*v)).collect();
        Arc::new(NativeArray::from_values(&ArrayType::Nullable(PrimitiveType::Int64), &vals).unwrap())
    }

    #[test]
    fn null_keys_only_match_when_requested() {
        let left = vec![col(&[None, Some(1)])];
        let right = vec![col(&[None, Some(1)])];
        let layout = JoinLayout {
            n_keys: 1,
            n_data_left: 0,
            n_data_right: 0,
            same_key: &[true],
            key_in_output: &[true, true],
        };
        let strict = hash_match(&left, &right, &layout, false, false, false, None);
        assert_eq!(strict, vec![(Some(1), Some(1))]);
        let loose = hash_match(&left, &right, &layout, false, false, true, None);
        assert_eq!(loose.len(), 2);
    }

    #[test]
    fn full_outer_emits_both_sides() {
        let left = vec![col(&[Some(1), Some(2)])];
        let right = vec![col(&[Some(2), Some(3)])];
        let layout = JoinLayout {
            n_keys: 1,
            n_data_left: 0,
            n_data_right: 0,
            same_key: &[true],
            key_in_output: &[true, true],
        };
        let pairs = hash_match(&left, &right, &layout, true, true, false, None);
        assert_eq!(pairs, vec![(Some(0), None), (Some(1), Some(0)), (None, Some(1))]);
        let out = assemble(&left, &right, &pairs, &layout).unwrap();
        assert_eq!(out.len(), 1);
        let keys: Vec<Value> = (0..3).map(|i| out[0].value(i)).collect();
        assert_eq!(keys, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }
}
