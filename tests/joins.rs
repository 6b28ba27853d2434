// tests/joins.rs
use anyhow::Result;
use std::sync::Arc;
use tablebridge::native::JoinCondition;
use tablebridge::testing::*;
use tablebridge::*;


fn int() -> ArrayType {
    ArrayType::Primitive(PrimitiveType::Int64)
}

fn nullable_int() -> ArrayType {
    ArrayType::Nullable(PrimitiveType::Int64)
}

fn table(bridge: &Bridge, columns: &[Array]) -> Result<TableHandle> {
    let handles = columns
        .iter()
        .map(|c| bridge.array_to_info(c))
        .collect::<BridgeResult<Vec<_>>>()?;
    Ok(bridge.make_table(handles)?)
}

/// `left.data < right.data`, reading column 1 of each side in place.
fn data_less_than() -> Result<impl Fn(&[Arc<NativeArray>], &[Arc<NativeArray>], usize, usize) -> bool + Send + Sync>
{
    let left = make_row_getter(&int(), 1)?;
    let right = make_row_getter(&int(), 1)?;
    Ok(move |l: &[Arc<NativeArray>], r: &[Arc<NativeArray>], i: usize, j: usize| {
        match (left(l, i).as_i64(), right(r, j).as_i64()) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    })
}

#[test]
fn inner_join_keeps_only_matching_keys() -> Result<()> {
    let (bridge, engine) = test_bridge(2);
    let left = table(&bridge, &[int_column(&[1, 2]), str_column(&[Some("a"), Some("b")])])?;
    let right = table(&bridge, &[int_column(&[1, 3]), str_column(&[Some("x"), Some("y")])])?;

    let (joined, n) = bridge.hash_join_table(&left, &right, &HashJoinOptions::inner(1, 1, 1), None)?;
    assert_eq!(n, 1);
    let rows = read_rows(&bridge, &joined, &[int(), ArrayType::String, ArrayType::String])?;
    assert_eq!(rows, vec![vec![Value::Int(1), Value::str("a"), Value::str("x")]]);

    drop((left, right, joined));
    engine.assert_no_leaks();
    Ok(())
}

#[test]
fn duplicate_keys_produce_every_pair() -> Result<()> {
    let (bridge, _engine) = test_bridge(3);
    let left = table(&bridge, &[int_column(&[7, 7, 8]), int_column(&[1, 2, 3])])?;
    let right = table(&bridge, &[int_column(&[7, 7]), int_column(&[10, 20])])?;
    let (joined, n) = bridge.hash_join_table(&left, &right, &HashJoinOptions::inner(1, 1, 1), None)?;
    assert_eq!(n, 4);
    let rows = read_rows(&bridge, &joined, &[int(), int(), int()])?;
    let expected: Vec<Vec<Value>> = [(1, 10), (1, 20), (2, 10), (2, 20)]
        .iter()
        .map(|&(a, b)| vec![Value::Int(7), Value::Int(a), Value::Int(b)])
        .collect();
    assert_rows_unordered_equal(&rows, &expected);
    Ok(())
}

#[test]
fn full_outer_join_null_fills_both_sides() -> Result<()> {
    let (bridge, engine) = test_bridge(2);
    let left = table(&bridge, &[int_column(&[1, 2]), int_column(&[10, 20])])?;
    let right = table(&bridge, &[int_column(&[2, 3]), int_column(&[200, 300])])?;
    let opts = HashJoinOptions::inner(1, 1, 1).outer(true, true);
    let (joined, n) = bridge.hash_join_table(&left, &right, &opts, None)?;
    assert_eq!(n, 3);
    let rows = read_rows(&bridge, &joined, &[nullable_int(), nullable_int(), nullable_int()])?;
    let expected = vec![
        vec![Value::Int(1), Value::Int(10), Value::Null],
        vec![Value::Int(2), Value::Int(20), Value::Int(200)],
        vec![Value::Int(3), Value::Null, Value::Int(300)],
    ];
    assert_rows_unordered_equal(&rows, &expected);
    drop((left, right, joined));
    engine.assert_no_leaks();
    Ok(())
}

#[test]
fn unmerged_keys_keep_both_columns() -> Result<()> {
    let (bridge, _engine) = test_bridge(1);
    let left = table(&bridge, &[int_column(&[5])])?;
    let right = table(&bridge, &[int_column(&[5])])?;
    let opts = HashJoinOptions {
        same_key: vec![false],
        ..HashJoinOptions::inner(1, 0, 0)
    };
    let (joined, _) = bridge.hash_join_table(&left, &right, &opts, None)?;
    assert_eq!(bridge.table_shape(&joined)?, (1, 2));
    Ok(())
}

#[test]
fn null_keys_match_only_when_na_equal() -> Result<()> {
    let (bridge, _engine) = test_bridge(1);
    let left = table(&bridge, &[nullable_int_column(&[None, Some(1)])])?;
    let right = table(&bridge, &[nullable_int_column(&[None, Some(1)])])?;
    let strict = HashJoinOptions::inner(1, 0, 0);
    let (_, n) = bridge.hash_join_table(&left, &right, &strict, None)?;
    assert_eq!(n, 1);
    let loose = HashJoinOptions {
        is_na_equal: true,
        ..strict
    };
    let (_, n) = bridge.hash_join_table(&left, &right, &loose, None)?;
    assert_eq!(n, 2);
    Ok(())
}

#[test]
fn predicate_narrows_matches_and_outer_emits_the_rejected() -> Result<()> {
    let (bridge, engine) = test_bridge(2);
    let left = table(&bridge, &[int_column(&[1, 2]), int_column(&[10, 20])])?;
    let right = table(&bridge, &[int_column(&[1, 2]), int_column(&[100, 5])])?;
    let cond = data_less_than()?;

    // inner: the key-2 pair fails the predicate
    let (inner, n) = bridge.hash_join_table(
        &left,
        &right,
        &HashJoinOptions::inner(1, 1, 1),
        Some(&cond as &JoinCondition),
    )?;
    assert_eq!(n, 1);
    let rows = read_rows(&bridge, &inner, &[int(), int(), int()])?;
    assert_eq!(rows, vec![vec![Value::Int(1), Value::Int(10), Value::Int(100)]]);

    // left outer: the rejected left row comes back null-filled
    let opts = HashJoinOptions::inner(1, 1, 1).outer(true, false);
    let (left_outer, n) = bridge.hash_join_table(&left, &right, &opts, Some(&cond as &JoinCondition))?;
    assert_eq!(n, 2);
    let rows = read_rows(&bridge, &left_outer, &[nullable_int(), nullable_int(), nullable_int()])?;
    assert_rows_unordered_equal(
        &rows,
        &[
            vec![Value::Int(1), Value::Int(10), Value::Int(100)],
            vec![Value::Int(2), Value::Int(20), Value::Null],
        ],
    );

    // full outer: both rejected rows come back
    let opts = HashJoinOptions::inner(1, 1, 1).outer(true, true);
    let (full, n) = bridge.hash_join_table(&left, &right, &opts, Some(&cond as &JoinCondition))?;
    assert_eq!(n, 3);
    let rows = read_rows(&bridge, &full, &[nullable_int(), nullable_int(), nullable_int()])?;
    assert_rows_unordered_equal(
        &rows,
        &[
            vec![Value::Int(1), Value::Int(10), Value::Int(100)],
            vec![Value::Int(2), Value::Int(20), Value::Null],
            vec![Value::Int(2), Value::Null, Value::Int(5)],
        ],
    );

    drop((left, right, inner, left_outer, full));
    engine.assert_no_leaks();
    Ok(())
}

#[test]
fn cross_join_with_and_without_predicate() -> Result<()> {
    let (bridge, _engine) = test_bridge(2);
    let left = table(&bridge, &[int_column(&[0, 1]), int_column(&[1, 50])])?;
    let right = table(&bridge, &[str_column(&[Some("r0"), Some("r1")]), int_column(&[10, 20])])?;

    let (all, n) = bridge.cross_join_table(&left, &right, &CrossJoinOptions::default(), None)?;
    assert_eq!(n, 4);
    assert_eq!(bridge.table_shape(&all)?, (4, 4));

    let cond = data_less_than()?;
    let (some, n) = bridge.cross_join_table(
        &left,
        &right,
        &CrossJoinOptions::default(),
        Some(&cond as &JoinCondition),
    )?;
    assert_eq!(n, 2);
    let rows = read_rows(&bridge, &some, &[int(), int(), ArrayType::String, int()])?;
    assert_rows_unordered_equal(
        &rows,
        &[
            vec![Value::Int(0), Value::Int(1), Value::str("r0"), Value::Int(10)],
            vec![Value::Int(0), Value::Int(1), Value::str("r1"), Value::Int(20)],
        ],
    );

    let opts = CrossJoinOptions {
        key_in_output: vec![true, false, true, false],
        ..CrossJoinOptions::default()
    };
    let (narrow, _) = bridge.cross_join_table(&left, &right, &opts, None)?;
    assert_eq!(bridge.table_shape(&narrow)?, (4, 2));
    Ok(())
}

#[test]
fn malformed_layout_is_a_native_failure() -> Result<()> {
    let (bridge, _engine) = test_bridge(1);
    let left = table(&bridge, &[int_column(&[1])])?;
    let right = table(&bridge, &[int_column(&[1])])?;
    // claims a data column neither table has
    assert_err_kind!(
        bridge.hash_join_table(&left, &right, &HashJoinOptions::inner(1, 1, 0), None),
        NativeOperationFailure
    );
    Ok(())
}

#[test]
fn row_getters_reject_types_without_a_reader() -> Result<()> {
    assert_err_kind!(
        make_row_getter(&ArrayType::list(ArrayType::String), 0),
        UnsupportedType
    );
    assert_err_kind!(
        make_row_na_checker(&ArrayType::Primitive(PrimitiveType::Int32), 0),
        UnsupportedType
    );
    Ok(())
}
