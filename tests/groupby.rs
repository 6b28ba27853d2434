// tests/groupby.rs
use anyhow::Result;
use tablebridge::native::{CombineFn, EvalFn, GeneralUdfFn, UpdateFn};
use tablebridge::testing::*;
use tablebridge::*;


fn int() -> ArrayType {
    ArrayType::Primitive(PrimitiveType::Int64)
}

/// keys  a b a c b a
/// vals  1 2 3 4 5 6
fn keyed_table(bridge: &Bridge) -> Result<TableHandle> {
    let keys = str_column(&[Some("a"), Some("b"), Some("a"), Some("c"), Some("b"), Some("a")]);
    let vals = int_column(&[1, 2, 3, 4, 5, 6]);
    Ok(bridge.make_table(vec![bridge.array_to_info(&keys)?, bridge.array_to_info(&vals)?])?)
}

fn strs(values: &[&str]) -> Vec<Value> {
    values.iter().map(|s| Value::str(*s)).collect()
}

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|&v| Value::Int(v)).collect()
}

#[test]
fn groups_come_out_in_first_appearance_order() -> Result<()> {
    let (bridge, engine) = test_bridge(2);
    let t = keyed_table(&bridge)?;
    let opts = GroupbyOptions::per_column(1, vec![AggFunc::Sum]);
    let (out, n) = bridge.groupby_and_aggregate(&t, &opts, GroupbyCallbacks::default(), None)?;
    assert_eq!(n, 3);
    let cols = read_columns(&bridge, &out, &[ArrayType::String, int()])?;
    assert_eq!(cols[0], strs(&["a", "b", "c"]));
    assert_eq!(cols[1], ints(&[10, 7, 4]));
    drop((t, out));
    engine.assert_no_leaks();
    Ok(())
}

#[test]
fn several_functions_over_one_column() -> Result<()> {
    let (bridge, _engine) = test_bridge(2);
    let t = keyed_table(&bridge)?;
    let opts = GroupbyOptions {
        ftypes: vec![AggFunc::Count, AggFunc::Mean, AggFunc::Max, AggFunc::First],
        func_offsets: vec![0, 4],
        ..GroupbyOptions::per_column(1, vec![])
    };
    let (out, n) = bridge.groupby_and_aggregate(&t, &opts, GroupbyCallbacks::default(), None)?;
    assert_eq!(n, 3);
    let types = [
        ArrayType::String,
        int(),
        ArrayType::Nullable(PrimitiveType::Float64),
        int(),
        int(),
    ];
    let cols = read_columns(&bridge, &out, &types)?;
    assert_eq!(cols[1], ints(&[3, 2, 1]));
    let means: Vec<f64> = cols[2].iter().filter_map(Value::as_f64).collect();
    assert_eq!(means.len(), 3);
    assert_approx_eq!(means[0], 10.0 / 3.0, 1e-12);
    assert_approx_eq!(means[1], 3.5);
    assert_approx_eq!(means[2], 4.0);
    assert_eq!(cols[3], ints(&[6, 5, 4]));
    assert_eq!(cols[4], ints(&[1, 2, 4]));
    Ok(())
}

#[test]
fn null_keys_are_dropped_unless_asked_to_keep() -> Result<()> {
    let (bridge, _engine) = test_bridge(1);
    let keys = nullable_int_column(&[Some(1), None, Some(1), None]);
    let vals = int_column(&[1, 2, 3, 4]);
    let t = bridge.make_table(vec![bridge.array_to_info(&keys)?, bridge.array_to_info(&vals)?])?;

    let opts = GroupbyOptions::per_column(1, vec![AggFunc::Size]);
    let (_, n) = bridge.groupby_and_aggregate(&t, &opts, GroupbyCallbacks::default(), None)?;
    assert_eq!(n, 1);

    let keep = GroupbyOptions {
        dropna: false,
        ..opts
    };
    let (out, n) = bridge.groupby_and_aggregate(&t, &keep, GroupbyCallbacks::default(), None)?;
    assert_eq!(n, 2);
    let cols = read_columns(&bridge, &out, &[ArrayType::Nullable(PrimitiveType::Int64), int()])?;
    assert_eq!(cols[0], vec![Value::Int(1), Value::Null]);
    assert_eq!(cols[1], ints(&[2, 2]));
    Ok(())
}

#[test]
fn cumulative_and_shift_stay_row_aligned() -> Result<()> {
    let (bridge, _engine) = test_bridge(2);
    let t = keyed_table(&bridge)?;

    let cumsum = GroupbyOptions::per_column(1, vec![AggFunc::Cumsum]);
    let (out, n) = bridge.groupby_and_aggregate(&t, &cumsum, GroupbyCallbacks::default(), None)?;
    assert_eq!(n, 6);
    let cols = read_columns(&bridge, &out, &[ArrayType::String, int()])?;
    assert_eq!(cols[1], ints(&[1, 2, 4, 4, 7, 10]));

    let shift = GroupbyOptions::per_column(1, vec![AggFunc::Shift]);
    let (out, _) = bridge.groupby_and_aggregate(&t, &shift, GroupbyCallbacks::default(), None)?;
    let cols = read_columns(
        &bridge,
        &out,
        &[ArrayType::String, ArrayType::Nullable(PrimitiveType::Int64)],
    )?;
    assert_eq!(
        cols[1],
        vec![Value::Null, Value::Null, Value::Int(1), Value::Null, Value::Int(2), Value::Int(3)]
    );

    let transform = GroupbyOptions {
        transform_func: AggFunc::Sum,
        ..GroupbyOptions::per_column(1, vec![AggFunc::Transform])
    };
    let (out, _) = bridge.groupby_and_aggregate(&t, &transform, GroupbyCallbacks::default(), None)?;
    let cols = read_columns(&bridge, &out, &[ArrayType::String, int()])?;
    assert_eq!(cols[1], ints(&[10, 7, 10, 4, 7, 10]));
    Ok(())
}

#[test]
fn head_keeps_the_first_rows_of_each_group() -> Result<()> {
    let (bridge, _engine) = test_bridge(1);
    let t = keyed_table(&bridge)?;
    let opts = GroupbyOptions {
        head_n: 1,
        ..GroupbyOptions::per_column(1, vec![AggFunc::Head])
    };
    let (out, n) = bridge.groupby_and_aggregate(&t, &opts, GroupbyCallbacks::default(), None)?;
    assert_eq!(n, 3);
    let cols = read_columns(&bridge, &out, &[ArrayType::String, int()])?;
    assert_eq!(cols[1], ints(&[1, 2, 4]));
    Ok(())
}

#[test]
fn udf_runs_update_combine_eval_per_group() -> Result<()> {
    let (bridge, engine) = test_bridge(3);
    let t = keyed_table(&bridge)?;
    // exemplar column fixing the udf's output type
    let udf_table = bridge.make_table(vec![bridge.array_to_info(&int_column(&[]))?])?;

    let as_int = |v: &Value| v.as_i64().unwrap_or(0);
    let update = move |_: usize, redvars: &mut [Value], v: &Value| -> Result<()> {
        redvars[0] = Value::Int(as_int(&redvars[0]) + as_int(v) * as_int(v));
        Ok(())
    };
    let combine = move |_: usize, acc: &mut [Value], other: &[Value]| -> Result<()> {
        acc[0] = Value::Int(as_int(&acc[0]) + as_int(&other[0]));
        Ok(())
    };
    let eval = move |_: usize, redvars: &[Value]| -> Result<Value> { Ok(Value::Int(as_int(&redvars[0]))) };
    let callbacks = GroupbyCallbacks {
        update: Some(&update as &UpdateFn),
        combine: Some(&combine as &CombineFn),
        eval: Some(&eval as &EvalFn),
        general: None,
    };
    let opts = GroupbyOptions {
        udf_n_redvars: vec![1],
        ..GroupbyOptions::per_column(1, vec![AggFunc::Udf])
    };
    let (out, n) = bridge.groupby_and_aggregate(&t, &opts, callbacks, Some(&udf_table))?;
    assert_eq!(n, 3);
    let cols = read_columns(&bridge, &out, &[ArrayType::String, int()])?;
    // sums of squares: a = 1 + 9 + 36, b = 4 + 25, c = 16
    assert_eq!(cols[1], ints(&[46, 29, 16]));

    drop((t, udf_table, out));
    engine.assert_no_leaks();
    Ok(())
}

#[test]
fn general_udf_sees_each_group_whole() -> Result<()> {
    let (bridge, _engine) = test_bridge(2);
    let t = keyed_table(&bridge)?;
    let udf_table = bridge.make_table(vec![bridge.array_to_info(&str_column(&[]))?])?;
    let general = |_: usize, values: &[Value]| -> Result<Value> {
        let parts: Vec<String> = values.iter().map(ToString::to_string).collect();
        Ok(Value::str(parts.join("+")))
    };
    let callbacks = GroupbyCallbacks {
        general: Some(&general as &GeneralUdfFn),
        ..GroupbyCallbacks::default()
    };
    let opts = GroupbyOptions::per_column(1, vec![AggFunc::GenUdf]);
    let (out, _) = bridge.groupby_and_aggregate(&t, &opts, callbacks, Some(&udf_table))?;
    let cols = read_columns(&bridge, &out, &[ArrayType::String, ArrayType::String])?;
    assert_eq!(cols[1], strs(&["1+3+6", "2+5", "4"]));
    Ok(())
}

#[test]
fn callback_errors_abort_the_operator() -> Result<()> {
    let (bridge, engine) = test_bridge(2);
    let t = keyed_table(&bridge)?;
    let udf_table = bridge.make_table(vec![bridge.array_to_info(&int_column(&[]))?])?;
    let general = |_: usize, _: &[Value]| -> Result<Value> { anyhow::bail!("udf exploded") };
    let callbacks = GroupbyCallbacks {
        general: Some(&general as &GeneralUdfFn),
        ..GroupbyCallbacks::default()
    };
    let opts = GroupbyOptions::per_column(1, vec![AggFunc::GenUdf]);
    let err = match bridge.groupby_and_aggregate(&t, &opts, callbacks, Some(&udf_table)) {
        Ok(_) => anyhow::bail!("expected the callback error to surface"),
        Err(e) => e,
    };
    assert_eq!(err.kind, ErrorKind::NativeOperationFailure);
    assert!(err.message.contains("udf exploded"), "{err}");
    drop((t, udf_table));
    engine.assert_no_leaks();
    Ok(())
}

#[test]
fn malformed_requests_fail() -> Result<()> {
    let (bridge, _engine) = test_bridge(1);
    let t = keyed_table(&bridge)?;
    let bad_offsets = GroupbyOptions {
        func_offsets: vec![0, 2],
        ..GroupbyOptions::per_column(1, vec![AggFunc::Sum])
    };
    assert_err_kind!(
        bridge.groupby_and_aggregate(&t, &bad_offsets, GroupbyCallbacks::default(), None),
        ShapeMismatch
    );
    let mixed = GroupbyOptions {
        ftypes: vec![AggFunc::Sum, AggFunc::Cumsum],
        func_offsets: vec![0, 2],
        ..GroupbyOptions::per_column(1, vec![])
    };
    assert_err_kind!(
        bridge.groupby_and_aggregate(&t, &mixed, GroupbyCallbacks::default(), None),
        NativeOperationFailure
    );
    let udf_without_callbacks = GroupbyOptions {
        udf_n_redvars: vec![1],
        ..GroupbyOptions::per_column(1, vec![AggFunc::Udf])
    };
    assert_err_kind!(
        bridge.groupby_and_aggregate(&t, &udf_without_callbacks, GroupbyCallbacks::default(), None),
        NativeOperationFailure
    );
    Ok(())
}

#[test]
fn labels_number_groups_and_order_rows() -> Result<()> {
    let (bridge, _engine) = test_bridge(2);
    let keys = str_column(&[Some("x"), Some("y"), Some("x"), None]);
    let t = bridge.make_table(vec![bridge.array_to_info(&keys)?])?;
    let labels = bridge.get_groupby_labels(&t, true, false)?;
    assert_eq!(labels.n_groups, 2);
    assert_eq!(labels.labels, vec![0, 1, 0, -1]);
    assert_eq!(labels.sort_idx, vec![0, 2, 1, 3]);

    let keep_na = bridge.get_groupby_labels(&t, false, false)?;
    assert_eq!(keep_na.n_groups, 3);
    assert_eq!(keep_na.labels, vec![0, 1, 0, 2]);
    Ok(())
}
