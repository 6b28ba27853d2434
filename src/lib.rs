//! # tablebridge
//!
//! A **columnar array interchange** between a typed array runtime and a native
//! table engine, plus the boundary through which distributed table operators
//! (shuffle, join, sort, groupby, dedup, sample) are invoked on that engine.
//!
//! ## Key Features
//!
//! - **Zero-copy export and import** - buffers are shared, never copied, and
//!   every exported buffer stays alive until both sides let go of it
//! - **Closed type set** - primitives, nullable primitives, strings, binary,
//!   decimals, lists, structs, maps, dictionary strings, categoricals, intervals
//! - **Flat type descriptors** - nested types travel as a pre-order integer
//!   sequence plus a name list (see [`codec`])
//! - **Move-only handles** - native references are owned by RAII handles,
//!   so double releases do not type-check
//! - **Operator boundary** - typed option structs in front of positional engine
//!   entry points (see [`ops`])
//! - **Reference engine** - an in-process [`LocalEngine`] that simulates a
//!   group of workers (feature `local-engine`, on by default)
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use tablebridge::*;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let engine = Arc::new(LocalEngine::new(EngineConfig::default().with_workers(2))?);
//! let bridge = Bridge::new(engine);
//!
//! let keys = Array::from_values(
//!     &ArrayType::Primitive(PrimitiveType::Int64),
//!     &[Value::Int(3), Value::Int(1), Value::Int(2)],
//! )?;
//! let table = bridge.make_table(vec![bridge.array_to_info(&keys)?])?;
//!
//! let (sorted, n_rows) = bridge.sort_values_table(&table, &SortOptions::ascending(1), None)?;
//! let out = bridge.table_to_columns(&sorted, &[0], &[keys.array_type()], n_rows, 1, None)?;
//! assert_eq!(
//!     out.get_column(0).map(Array::to_values),
//!     Some(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Arrays
//!
//! An [`Array`] is a managed columnar value of a static [`ArrayType`]. Its
//! storage is a handful of reference-counted `arrow` buffers.
//!
//! ### Handles
//!
//! [`ArrayHandle`], [`TableHandle`] and [`ShuffleInfoHandle`] each own one
//! native reference and release it when dropped. The functions in
//! [`lifetime`] release explicitly and report failures.
//!
//! ### Bridge
//!
//! A [`Bridge`] pairs a [`NativeEngine`] with optional metrics. All export,
//! import, table and operator calls go through it and come back as
//! [`BridgeResult`]s. Errors fall into three kinds: [`ErrorKind::UnsupportedType`],
//! [`ErrorKind::NativeOperationFailure`] and [`ErrorKind::ShapeMismatch`].
//!
//! ### Tables
//!
//! A [`ManagedTable`] is the managed side of a native table: typed columns
//! grouped into same-type blocks, some of them possibly deferred until first
//! use.
//!
//! ## Logging
//!
//! Every boundary call emits `tracing` events at `debug` level; failed
//! releases during drop are logged at `warn`. Install any `tracing`
//! subscriber to see them.

pub mod array;
pub mod bridge;
pub mod buffers;
pub mod codec;
pub mod config;
pub mod error;
pub mod export;
pub mod handle;
pub mod ids;
pub mod import;
pub mod lifetime;
pub mod metrics;
pub mod native;
pub mod ops;
pub mod row_access;
pub mod table;
pub mod types;
pub mod utils;
pub mod value;

#[cfg(feature = "local-engine")]
pub mod testing;

// Re-export commonly used items
pub use array::Array;
pub use bridge::Bridge;
pub use config::EngineConfig;
pub use error::{BridgeError, BridgeResult, ErrorKind};
pub use handle::{ArrayHandle, ShuffleInfoHandle, TableHandle};
pub use ids::{ArrayId, ShuffleInfoId, TableId};
pub use metrics::MetricsCollector;
pub use native::{NativeArray, NativeEngine};
pub use ops::{
    AggFunc, CrossJoinOptions, GroupLabels, GroupbyCallbacks, GroupbyOptions, HashJoinOptions,
    KeepPolicy, RandomSource, SortOptions,
};
pub use row_access::{make_row_getter, make_row_na_checker, RowGetter, RowNaChecker};
pub use table::{KnownCategories, ManagedTable};
pub use types::{ArrayType, Field, PrimitiveType};
pub use value::Value;

#[cfg(feature = "local-engine")]
pub use native::local::LocalEngine;
