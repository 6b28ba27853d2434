// tests/operators.rs
use anyhow::{Context, Result};
use std::collections::HashSet;
use tablebridge::lifetime::delete_shuffle_info;
use tablebridge::testing::*;
use tablebridge::*;


fn int() -> ArrayType {
    ArrayType::Primitive(PrimitiveType::Int64)
}

fn nullable_int() -> ArrayType {
    ArrayType::Nullable(PrimitiveType::Int64)
}

fn two_column(bridge: &Bridge, keys: &Array, payload: &Array) -> Result<TableHandle> {
    Ok(bridge.make_table(vec![bridge.array_to_info(keys)?, bridge.array_to_info(payload)?])?)
}

fn letters(n: usize) -> Array {
    let names: Vec<String> = (0..n).map(|i| char::from(b'a' + i as u8).to_string()).collect();
    let refs: Vec<Option<&str>> = names.iter().map(|s| Some(s.as_str())).collect();
    str_column(&refs)
}

#[test]
fn reverse_shuffle_restores_the_original_rows() -> Result<()> {
    let (bridge, engine) = test_bridge(3);
    let t = two_column(&bridge, &int_column(&[5, 3, 5, 1, 3, 9]), &letters(6))?;
    let types = [int(), ArrayType::String];
    let original = read_rows(&bridge, &t, &types)?;

    assert!(bridge.get_shuffle_info(&t)?.is_none());
    let shuffled = bridge.shuffle_table(&t, 1, true, true)?;
    assert_rows_unordered_equal(&read_rows(&bridge, &shuffled, &types)?, &original);

    let info = bridge
        .get_shuffle_info(&shuffled)?
        .context("shuffle kept no routing info")?;
    let back = bridge.reverse_shuffle_table(&shuffled, &info)?;
    assert_eq!(read_rows(&bridge, &back, &types)?, original);

    delete_shuffle_info(info)?;
    drop((t, shuffled, back));
    engine.assert_no_leaks();
    Ok(())
}

#[test]
fn shuffle_without_routing_info_keeps_none() -> Result<()> {
    let (bridge, _engine) = test_bridge(2);
    let t = two_column(&bridge, &int_column(&[1, 2]), &letters(2))?;
    let shuffled = bridge.shuffle_table(&t, 1, true, false)?;
    assert!(bridge.get_shuffle_info(&shuffled)?.is_none());
    Ok(())
}

#[test]
fn sort_orders_keys_and_places_nulls() -> Result<()> {
    let (bridge, engine) = test_bridge(2);
    let keys = nullable_int_column(&[Some(3), None, Some(1), Some(2)]);
    let payload = str_column(&[Some("c"), Some("n"), Some("a"), Some("b")]);
    let t = two_column(&bridge, &keys, &payload)?;
    let types = [nullable_int(), ArrayType::String];

    let (asc, n) = bridge.sort_values_table(&t, &SortOptions::ascending(1), None)?;
    assert_eq!(n, 4);
    let cols = read_columns(&bridge, &asc, &types)?;
    assert_eq!(cols[0], vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Null]);
    assert_eq!(cols[1], vec![Value::str("a"), Value::str("b"), Value::str("c"), Value::str("n")]);

    let desc = SortOptions {
        ascending: vec![false],
        na_last: vec![false],
        ..SortOptions::ascending(1)
    };
    let (out, _) = bridge.sort_values_table(&t, &desc, None)?;
    let cols = read_columns(&bridge, &out, &types)?;
    assert_eq!(cols[0], vec![Value::Null, Value::Int(3), Value::Int(2), Value::Int(1)]);

    drop((t, asc, out));
    engine.assert_no_leaks();
    Ok(())
}

#[test]
fn sorting_twice_gives_identical_output() -> Result<()> {
    let (bridge, _engine) = test_bridge(4);
    let keys = int_column(&[2, 1, 2, 1, 2, 0]);
    let t = two_column(&bridge, &keys, &letters(6))?;
    let opts = SortOptions {
        is_parallel: true,
        ..SortOptions::ascending(1)
    };
    let types = [int(), ArrayType::String];
    let (first, _) = bridge.sort_values_table(&t, &opts, None)?;
    let (second, _) = bridge.sort_values_table(&t, &opts, None)?;
    let a = read_rows(&bridge, &first, &types)?;
    assert_eq!(a, read_rows(&bridge, &second, &types)?);
    // ties keep input order
    let payload: Vec<Value> = a.iter().map(|r| r[1].clone()).collect();
    assert_eq!(
        payload,
        ["f", "b", "d", "a", "c", "e"].map(Value::str).to_vec()
    );
    Ok(())
}

#[test]
fn sort_with_bounds_still_orders_globally() -> Result<()> {
    let (bridge, _engine) = test_bridge(2);
    let t = two_column(&bridge, &int_column(&[9, 4, 7, 1, 5]), &letters(5))?;
    let bounds = bridge.make_table(vec![bridge.array_to_info(&int_column(&[5]))?])?;
    let opts = SortOptions {
        is_parallel: true,
        ..SortOptions::ascending(1)
    };
    let (out, _) = bridge.sort_values_table(&t, &opts, Some(&bounds))?;
    let cols = read_columns(&bridge, &out, &[int(), ArrayType::String])?;
    assert_eq!(cols[0], [1, 4, 5, 7, 9].map(Value::Int).to_vec());
    Ok(())
}

#[test]
fn dead_keys_leave_the_output() -> Result<()> {
    let (bridge, _engine) = test_bridge(1);
    let t = two_column(&bridge, &int_column(&[2, 1]), &letters(2))?;
    let opts = SortOptions {
        dead_keys: vec![true],
        ..SortOptions::ascending(1)
    };
    let (out, _) = bridge.sort_values_table(&t, &opts, None)?;
    assert_eq!(bridge.table_shape(&out)?, (2, 1));
    let cols = read_columns(&bridge, &out, &[ArrayType::String])?;
    assert_eq!(cols[0], vec![Value::str("b"), Value::str("a")]);
    Ok(())
}

#[test]
fn drop_duplicates_is_idempotent_for_every_policy() -> Result<()> {
    let (bridge, engine) = test_bridge(2);
    let t = two_column(&bridge, &int_column(&[1, 1, 2, 3, 3, 3]), &letters(6))?;
    let types = [int(), ArrayType::String];
    let expected = [
        (KeepPolicy::First, vec!["a", "c", "d"]),
        (KeepPolicy::Last, vec!["b", "c", "f"]),
        (KeepPolicy::DropAll, vec!["c"]),
    ];
    for (keep, payload) in expected {
        let once = bridge.drop_duplicates_table(&t, true, 1, keep, false, true)?;
        let twice = bridge.drop_duplicates_table(&once, true, 1, keep, false, true)?;
        let a = read_rows(&bridge, &once, &types)?;
        assert_eq!(a, read_rows(&bridge, &twice, &types)?, "{keep:?}");
        let got: Vec<Value> = a.iter().map(|r| r[1].clone()).collect();
        let want: Vec<Value> = payload.into_iter().map(Value::str).collect();
        assert_eq!(got, want, "{keep:?}");
    }
    drop(t);
    engine.assert_no_leaks();
    Ok(())
}

#[test]
fn drop_duplicates_can_drop_null_keys() -> Result<()> {
    let (bridge, _engine) = test_bridge(1);
    let keys = nullable_int_column(&[None, Some(1), None]);
    let t = two_column(&bridge, &keys, &letters(3))?;
    let kept = bridge.drop_duplicates_table(&t, false, 1, KeepPolicy::First, false, false)?;
    assert_eq!(bridge.table_shape(&kept)?.0, 2);
    let dropped = bridge.drop_duplicates_table(&t, false, 1, KeepPolicy::First, true, false)?;
    assert_eq!(bridge.table_shape(&dropped)?.0, 1);
    Ok(())
}

#[test]
fn sampling_draws_from_the_input_rows() -> Result<()> {
    let (bridge, engine) = test_bridge(2);
    let t = two_column(&bridge, &int_column(&[10, 20, 30, 40, 50]), &letters(5))?;
    let types = [int(), ArrayType::String];
    let all: HashSet<Vec<Value>> = read_rows(&bridge, &t, &types)?.into_iter().collect();

    let three = read_rows(&bridge, &bridge.sample_table(&t, Some(3), 0.0, false, true)?, &types)?;
    assert_eq!(three.len(), 3);
    let distinct: HashSet<&Vec<Value>> = three.iter().collect();
    assert_eq!(distinct.len(), 3);
    assert!(three.iter().all(|r| all.contains(r)));

    let by_frac = bridge.sample_table(&t, None, 0.4, false, true)?;
    assert_eq!(bridge.table_shape(&by_frac)?.0, 2);

    let many = read_rows(&bridge, &bridge.sample_table(&t, Some(12), 0.0, true, false)?, &types)?;
    assert_eq!(many.len(), 12);
    assert!(many.iter().all(|r| all.contains(r)));

    assert_err_kind!(bridge.sample_table(&t, Some(6), 0.0, false, false), NativeOperationFailure);
    drop((t, by_frac));
    engine.assert_no_leaks();
    Ok(())
}

#[test]
fn renormalization_moves_rows_without_losing_any() -> Result<()> {
    let (bridge, _engine) = test_bridge(3);
    let t = two_column(&bridge, &int_column(&[1, 2, 3, 4, 5, 6, 7]), &letters(7))?;
    let types = [int(), ArrayType::String];
    let original = read_rows(&bridge, &t, &types)?;

    let kept_order = bridge.shuffle_renormalization(&t, RandomSource::Off, 0, true)?;
    assert_rows_unordered_equal(&read_rows(&bridge, &kept_order, &types)?, &original);

    let a = bridge.shuffle_renormalization(&t, RandomSource::Seeded, 7, true)?;
    let b = bridge.shuffle_renormalization(&t, RandomSource::Seeded, 7, true)?;
    let a_rows = read_rows(&bridge, &a, &types)?;
    assert_rows_unordered_equal(&a_rows, &original);
    assert_eq!(a_rows, read_rows(&bridge, &b, &types)?);

    let engine_seeded = bridge.shuffle_renormalization(&t, RandomSource::Engine, 0, true)?;
    assert_rows_unordered_equal(&read_rows(&bridge, &engine_seeded, &types)?, &original);
    Ok(())
}

#[test]
fn group_renormalization_validates_ranks() -> Result<()> {
    let (bridge, _engine) = test_bridge(3);
    let t = two_column(&bridge, &int_column(&[1, 2, 3, 4]), &letters(4))?;
    let types = [int(), ArrayType::String];
    let original = read_rows(&bridge, &t, &types)?;

    let onto_two = bridge.shuffle_renormalization_group(&t, RandomSource::Off, 0, true, &[0, 2])?;
    assert_rows_unordered_equal(&read_rows(&bridge, &onto_two, &types)?, &original);
    let everyone = bridge.shuffle_renormalization_group(&t, RandomSource::Engine, 0, true, &[])?;
    assert_rows_unordered_equal(&read_rows(&bridge, &everyone, &types)?, &original);

    assert_err_kind!(
        bridge.shuffle_renormalization_group(&t, RandomSource::Off, 0, true, &[5]),
        NativeOperationFailure
    );
    assert_err_kind!(
        bridge.shuffle_renormalization_group(&t, RandomSource::Off, 0, true, &[1, 1]),
        NativeOperationFailure
    );
    Ok(())
}

#[test]
fn isin_never_matches_nulls() -> Result<()> {
    let (bridge, engine) = test_bridge(2);
    let needles = bridge.array_to_info(&nullable_int_column(&[Some(1), Some(2), Some(3), None]))?;
    let haystack = bridge.array_to_info(&nullable_int_column(&[Some(2), Some(3), Some(5), None]))?;
    let found = bridge.array_isin(&needles, &haystack, true)?;
    assert_eq!(found, vec![false, true, true, false]);
    drop((needles, haystack));
    engine.assert_no_leaks();
    Ok(())
}

#[test]
fn dictionary_helpers_keep_logical_values() -> Result<()> {
    let (bridge, engine) = test_bridge(2);
    let dict = Array::DictString {
        dictionary: Box::new(str_column(&[Some("b"), Some("a"), Some("b")])),
        indices: Box::new(Array::from_values(
            &ArrayType::Nullable(PrimitiveType::Int32),
            &[Value::Int(2), Value::Int(1), Value::Null, Value::Int(0)],
        )?),
        has_global_dictionary: false,
        has_deduped_local_dictionary: false,
    };
    let logical = dict.to_values();
    assert_eq!(
        logical,
        vec![Value::str("b"), Value::str("a"), Value::Null, Value::str("b")]
    );
    let handle = bridge.array_to_info(&dict)?;

    let deduped = bridge.drop_duplicates_local_dictionary(&handle, true)?;
    let back = bridge.info_to_array(&deduped, &ArrayType::DictString)?;
    assert_values_equal(&back.to_values(), &logical);
    match &back {
        Array::DictString {
            dictionary,
            has_deduped_local_dictionary,
            ..
        } => {
            assert!(*has_deduped_local_dictionary);
            assert_eq!(dictionary.to_values(), vec![Value::str("a"), Value::str("b")]);
        }
        other => anyhow::bail!("expected a dictionary array, got {:?}", other.array_type()),
    }

    let global = bridge.convert_local_dictionary_to_global(&handle, true, false)?;
    let back = bridge.info_to_array(&global, &ArrayType::DictString)?;
    assert_values_equal(&back.to_values(), &logical);
    assert!(matches!(
        back,
        Array::DictString {
            has_global_dictionary: true,
            ..
        }
    ));

    let plain = bridge.array_to_info(&int_column(&[1]))?;
    assert_err_kind!(
        bridge.drop_duplicates_local_dictionary(&plain, false),
        NativeOperationFailure
    );
    drop((handle, deduped, global, plain));
    engine.assert_no_leaks();
    Ok(())
}
