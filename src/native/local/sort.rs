use crate::native::NativeArray;
use crate::utils::row_key;
use crate::value::Value;
use anyhow::{ensure, Result};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::sync::Arc;

/// Per-key direction and null placement.
pub(super) struct SortOrder {
    ascending: Vec<bool>,
    na_last: Vec<bool>,
}

impl SortOrder {
    pub fn new(n_keys: usize, ascending: &[bool], na_last: &[bool]) -> Result<Self> {
        ensure!(
            ascending.len() == n_keys && na_last.len() == n_keys,
            "sort on {n_keys} keys got {} directions and {} null positions",
            ascending.len(),
            na_last.len()
        );
        Ok(Self {
            ascending: ascending.to_vec(),
            na_last: na_last.to_vec(),
        })
    }

    pub fn n_keys(&self) -> usize {
        self.ascending.len()
    }

    /// Nulls go first or last regardless of direction.
    pub fn compare(&self, a: &[Value], b: &[Value]) -> Ordering {
        for (k, (x, y)) in a.iter().zip(b).enumerate() {
            let ord = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) if self.na_last[k] => Ordering::Greater,
                (true, false) => Ordering::Less,
                (false, true) if self.na_last[k] => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) if self.ascending[k] => x.cmp(y),
                (false, false) => y.cmp(x),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Row order of a stable sort. With `bounds`, rows are first range-partitioned
/// on the boundary rows and each partition is sorted on its own.
pub(super) fn sorted_rows(
    columns: &[Arc<NativeArray>],
    n_rows: usize,
    order: &SortOrder,
    bounds: Option<&[Arc<NativeArray>]>,
) -> Result<Vec<usize>> {
    let n_keys = order.n_keys();
    let keys: Vec<Vec<Value>> = (0..n_rows)
        .into_par_iter()
        .map(|r| row_key(columns, n_keys, r))
        .collect();
    let by_key = |a: &usize, b: &usize| order.compare(&keys[*a], &keys[*b]);

    let Some(bounds) = bounds else {
        let mut rows: Vec<usize> = (0..n_rows).collect();
        rows.par_sort_by(by_key);
        return Ok(rows);
    };
    ensure!(
        bounds.len() >= n_keys,
        "sort bounds hold {} columns for {n_keys} keys",
        bounds.len()
    );
    let n_bounds = bounds.first().map_or(0, |c| c.len());
    let splitters: Vec<Vec<Value>> = (0..n_bounds).map(|b| row_key(bounds, n_keys, b)).collect();
    let mut parts: Vec<Vec<usize>> = vec![Vec::new(); n_bounds + 1];
    for (r, key) in keys.iter().enumerate() {
        let dest = splitters.partition_point(|s| order.compare(s, key) == Ordering::Less);
        parts[dest].push(r);
    }
    parts.par_iter_mut().for_each(|p| p.sort_by(by_key));
    Ok(parts.concat())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArrayType, PrimitiveType};

    fn floats(vals: &[Option<f64>]) -> Arc<NativeArray> {
        let vals: Vec<Value> = vals.iter().map(|v| Value::from(*v)).collect();
        Arc::new(NativeArray::from_values(&ArrayType::Primitive(PrimitiveType::Float64), &vals).unwrap())
    }

    #[test]
    fn nulls_follow_position_not_direction() {
        let cols = vec![floats(&[Some(2.0), None, Some(1.0)])];
        let first = SortOrder::new(1, &[false], &[false]).unwrap();
        assert_eq!(sorted_rows(&cols, 3, &first, None).unwrap(), vec![1, 0, 2]);
        let last = SortOrder::new(1, &[true], &[true]).unwrap();
        assert_eq!(sorted_rows(&cols, 3, &last, None).unwrap(), vec![2, 0, 1]);
    }

    #[test]
    fn bounded_sort_matches_global_sort() {
        let cols = vec![floats(&[Some(5.0), Some(1.0), Some(9.0), Some(3.0), Some(7.0)])];
        let bounds = vec![floats(&[Some(4.0)])];
        let order = SortOrder::new(1, &[true], &[true]).unwrap();
        let global = sorted_rows(&cols, 5, &order, None).unwrap();
        let ranged = sorted_rows(&cols, 5, &order, Some(&bounds)).unwrap();
        assert_eq!(global, ranged);
    }
}
