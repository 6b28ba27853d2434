use crate::native::NativeArray;
use crate::types::{ArrayType, PrimitiveType};
use crate::value::Value;
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Unique dictionary entries and where each old entry moved.
fn unique_entries(dictionary: &NativeArray, sort: bool) -> (Vec<Value>, Vec<usize>) {
    let values: Vec<Value> = (0..dictionary.len()).map(|i| dictionary.value(i)).collect();
    let mut uniq: Vec<Value> = Vec::new();
    let mut pos: HashMap<&Value, usize> = HashMap::new();
    let mut remap: Vec<usize> = Vec::with_capacity(values.len());
    for v in &values {
        let k = *pos.entry(v).or_insert_with(|| {
            uniq.push(v.clone());
            uniq.len() - 1
        });
        remap.push(k);
    }
    if sort {
        let mut order: Vec<usize> = (0..uniq.len()).collect();
        order.sort_by(|&a, &b| uniq[a].cmp(&uniq[b]));
        let mut rank = vec![0usize; uniq.len()];
        for (new, &old) in order.iter().enumerate() {
            rank[old] = new;
        }
        for k in &mut remap {
            *k = rank[*k];
        }
        uniq = order.into_iter().map(|i| uniq[i].clone()).collect();
    }
    (uniq, remap)
}

fn rebuild(
    dictionary: &NativeArray,
    indices: &NativeArray,
    sort: bool,
    has_global_dictionary: bool,
) -> Result<NativeArray> {
    let (uniq, remap) = unique_entries(dictionary, sort);
    let idx: Vec<Value> = (0..indices.len())
        .map(|i| match indices.value(i).as_i64() {
            Some(k) => remap
                .get(k as usize)
                .map_or(Value::Null, |&n| Value::Int(n as i64)),
            None => Value::Null,
        })
        .collect();
    Ok(NativeArray::Dict {
        dictionary: Arc::new(NativeArray::from_values(&ArrayType::String, &uniq)?),
        indices: Arc::new(NativeArray::from_values(
            &ArrayType::Nullable(PrimitiveType::Int32),
            &idx,
        )?),
        has_global_dictionary,
        has_deduped_local_dictionary: true,
    })
}

/// A dictionary array without repeated dictionary entries.
///
/// The dictionary is sorted only when `sort_if_modified` is set and repeats
/// were actually removed.
pub(super) fn dedup_dictionary(arr: &NativeArray, sort_if_modified: bool) -> Result<NativeArray> {
    let NativeArray::Dict {
        dictionary,
        indices,
        has_global_dictionary,
        has_deduped_local_dictionary,
    } = arr
    else {
        bail!("drop_duplicates_local_dictionary: {} array is not dictionary-encoded", arr.kind());
    };
    if *has_deduped_local_dictionary {
        return Ok(arr.clone());
    }
    let (uniq, _) = unique_entries(dictionary, false);
    let modified = uniq.len() != dictionary.len();
    rebuild(dictionary, indices, sort_if_modified && modified, *has_global_dictionary)
}

/// A dictionary array whose dictionary every worker shares.
///
/// One process holds every worker's rows, so the local dictionary, once
/// free of repeats, already is the shared one.
pub(super) fn to_global(arr: &NativeArray, sort_dictionary: bool) -> Result<NativeArray> {
    let NativeArray::Dict {
        dictionary, indices, ..
    } = arr
    else {
        bail!("convert_local_dictionary_to_global: {} array is not dictionary-encoded", arr.kind());
    };
    rebuild(dictionary, indices, sort_dictionary, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict_with_repeats() -> NativeArray {
        NativeArray::Dict {
            dictionary: Arc::new(
                NativeArray::from_values(
                    &ArrayType::String,
                    &[Value::str("b"), Value::str("a"), Value::str("b")],
                )
                .unwrap(),
            ),
            indices: Arc::new(
                NativeArray::from_values(
                    &ArrayType::Nullable(PrimitiveType::Int32),
                    &[Value::Int(2), Value::Int(1), Value::Null, Value::Int(0)],
                )
                .unwrap(),
            ),
            has_global_dictionary: false,
            has_deduped_local_dictionary: false,
        }
    }

    #[test]
    fn dedup_keeps_logical_values() {
        let arr = dict_with_repeats();
        let out = dedup_dictionary(&arr, true).unwrap();
        let NativeArray::Dict { dictionary, .. } = &out else {
            panic!("expected a dictionary array");
        };
        assert_eq!(dictionary.len(), 2);
        assert_eq!(dictionary.value(0), Value::str("a"));
        let before: Vec<Value> = (0..4).map(|i| arr.value(i)).collect();
        let after: Vec<Value> = (0..4).map(|i| out.value(i)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn global_conversion_sets_flag() {
        let out = to_global(&dict_with_repeats(), false).unwrap();
        assert!(matches!(out, NativeArray::Dict { has_global_dictionary: true, .. }));
        assert!(to_global(&NativeArray::from_values(&ArrayType::String, &[]).unwrap(), false).is_err());
    }
}
