//! Ready-made engines, bridges and sample arrays.

use crate::array::Array;
use crate::bridge::Bridge;
use crate::config::EngineConfig;
use crate::native::local::LocalEngine;
use crate::types::{ArrayType, Field, PrimitiveType};
use crate::value::Value;
use std::sync::Arc;

use super::LeakCountingEngine;

/// A leak-counting reference engine.
pub type TestEngine = LeakCountingEngine<LocalEngine>;

/// A bridge over a fresh leak-counting reference engine with `n_workers`
/// simulated workers and a fixed seed.
///
/// ```
/// use tablebridge::testing::test_bridge;
///
/// let (bridge, engine) = test_bridge(2);
/// assert!(bridge.metrics().is_none());
/// engine.assert_no_leaks();
/// ```
#[must_use]
pub fn test_bridge(n_workers: usize) -> (Bridge, Arc<TestEngine>) {
    let config = EngineConfig::default().with_workers(n_workers).with_seed(42);
    let engine = Arc::new(LeakCountingEngine::new(LocalEngine::new(config).unwrap_or_default()));
    (Bridge::new(engine.clone()), engine)
}

/// Plain Int64 column.
#[must_use]
pub fn int_column(values: &[i64]) -> Array {
    let vals: Vec<Value> = values.iter().map(|&v| Value::Int(v)).collect();
    built(&ArrayType::Primitive(PrimitiveType::Int64), &vals)
}

/// Nullable Int64 column.
#[must_use]
pub fn nullable_int_column(values: &[Option<i64>]) -> Array {
    let vals: Vec<Value> = values.iter().map(|&v| Value::from(v)).collect();
    built(&ArrayType::Nullable(PrimitiveType::Int64), &vals)
}

/// Plain Float64 column; `None` becomes NaN.
#[must_use]
pub fn float_column(values: &[Option<f64>]) -> Array {
    let vals: Vec<Value> = values.iter().map(|&v| Value::from(v)).collect();
    built(&ArrayType::Primitive(PrimitiveType::Float64), &vals)
}

/// String column.
#[must_use]
pub fn str_column(values: &[Option<&str>]) -> Array {
    let vals: Vec<Value> = values.iter().map(|&v| Value::from(v)).collect();
    built(&ArrayType::String, &vals)
}

fn built(ty: &ArrayType, values: &[Value]) -> Array {
    match Array::from_values(ty, values) {
        Ok(a) => a,
        Err(e) => panic!("fixture {ty} rejected its values: {e}"),
    }
}

/// One sample array per supported shape, each holding nulls where the shape allows.
#[must_use]
pub fn sample_arrays() -> Vec<Array> {
    let point = ArrayType::Struct(vec![
        Field::new("x", ArrayType::Primitive(PrimitiveType::Float64)),
        Field::new("label", ArrayType::String),
    ]);
    let cases: Vec<(ArrayType, Vec<Value>)> = vec![
        (
            ArrayType::Primitive(PrimitiveType::Int32),
            vec![Value::Int(3), Value::Int(-1), Value::Int(7)],
        ),
        (
            ArrayType::Primitive(PrimitiveType::Datetime),
            vec![Value::Int(1_600_000_000), Value::Null],
        ),
        (
            ArrayType::Nullable(PrimitiveType::UInt8),
            vec![Value::UInt(1), Value::Null, Value::UInt(255)],
        ),
        (
            ArrayType::Nullable(PrimitiveType::Bool),
            vec![Value::Bool(true), Value::Null, Value::Bool(false)],
        ),
        (
            ArrayType::String,
            vec![Value::str("alpha"), Value::Null, Value::str("")],
        ),
        (
            ArrayType::Binary,
            vec![Value::Bytes(vec![0, 1, 2]), Value::Null],
        ),
        (
            ArrayType::Decimal {
                precision: 12,
                scale: 2,
            },
            vec![Value::Decimal(12_345), Value::Null, Value::Decimal(-5)],
        ),
        (
            ArrayType::list(ArrayType::Nullable(PrimitiveType::Int64)),
            vec![
                Value::List(vec![Value::Int(1), Value::Null]),
                Value::Null,
                Value::List(vec![]),
            ],
        ),
        (
            point.clone(),
            vec![
                Value::Struct(vec![Value::float(1.5), Value::str("a")]),
                Value::Null,
            ],
        ),
        (
            ArrayType::list(point),
            vec![Value::List(vec![Value::Struct(vec![
                Value::float(0.0),
                Value::str("origin"),
            ])])],
        ),
        (
            ArrayType::map(ArrayType::String, ArrayType::Nullable(PrimitiveType::Int32)),
            vec![
                Value::List(vec![
                    Value::Struct(vec![Value::str("k1"), Value::Int(1)]),
                    Value::Struct(vec![Value::str("k2"), Value::Null]),
                ]),
                Value::Null,
            ],
        ),
        (
            ArrayType::DictString,
            vec![Value::str("x"), Value::str("y"), Value::Null, Value::str("x")],
        ),
        (
            ArrayType::categorical(&["low", "mid", "high"], true),
            vec![Value::str("high"), Value::Null, Value::str("low")],
        ),
        (
            ArrayType::Interval(PrimitiveType::Float64),
            vec![
                Value::interval(Value::float(0.0), Value::float(1.0)),
                Value::Null,
                Value::interval(Value::float(1.0), Value::float(2.5)),
            ],
        ),
    ];
    cases.iter().map(|(ty, vals)| built(ty, vals)).collect()
}

/// Zero-length arrays of the same shapes as [`sample_arrays`].
#[must_use]
pub fn empty_sample_arrays() -> Vec<Array> {
    sample_arrays()
        .iter()
        .map(|a| built(&a.array_type(), &[]))
        .collect()
}
