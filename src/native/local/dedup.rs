use crate::native::NativeArray;
use crate::utils::{key_has_na, row_key};
use crate::value::Value;
use anyhow::{bail, Result};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Keep {
    First,
    Last,
    None,
}

impl Keep {
    pub fn from_code(code: i64) -> Result<Self> {
        Ok(match code {
            0 => Self::First,
            1 => Self::Last,
            2 => Self::None,
            other => bail!("unknown keep policy {other}"),
        })
    }
}

/// Surviving rows in input order.
pub(super) fn kept_rows(
    columns: &[Arc<NativeArray>],
    n_keys: usize,
    n_rows: usize,
    keep: Keep,
    dropna: bool,
) -> Vec<usize> {
    let keys: Vec<Option<Vec<Value>>> = (0..n_rows)
        .into_par_iter()
        .map(|r| (!(dropna && key_has_na(columns, n_keys, r))).then(|| row_key(columns, n_keys, r)))
        .collect();

    // key -> (occurrences, chosen row)
    let mut seen: HashMap<&[Value], (usize, usize)> = HashMap::new();
    for (r, key) in keys.iter().enumerate() {
        let Some(key) = key else { continue };
        let e = seen.entry(key.as_slice()).or_insert((0, r));
        e.0 += 1;
        if keep == Keep::Last {
            e.1 = r;
        }
    }
    let mut rows: Vec<usize> = seen
        .into_values()
        .filter(|(n, _)| keep != Keep::None || *n == 1)
        .map(|(_, r)| r)
        .collect();
    rows.sort_unstable();
    rows
}

/// `out[i]` is whether element `i` of `arr` occurs in `values`; nulls never do.
pub(super) fn isin(arr: &NativeArray, values: &NativeArray, out: &mut [bool]) {
    let set: HashSet<Value> = (0..values.len())
        .map(|i| values.value(i))
        .filter(|v| !v.is_null())
        .collect();
    out.par_iter_mut().enumerate().for_each(|(i, o)| {
        let v = arr.value(i);
        *o = !v.is_null() && set.contains(&v);
    });
}
