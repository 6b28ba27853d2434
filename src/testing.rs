//! Testing utilities for code that talks to a native engine.
//!
//! This module provides what an integration test of the boundary needs:
//!
//! - **Leak counting**: [`LeakCountingEngine`] wraps any engine and tracks
//!   how many arrays, tables and shuffle infos are still alive
//! - **Fixtures**: a ready bridge over the reference engine and sample arrays
//!   of every supported shape
//! - **Assertions**: compare arrays and native tables with readable diffs
//!
//! # Quick Start
//!
//! ```
//! use tablebridge::testing::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let (bridge, engine) = test_bridge(2);
//! let col = int_column(&[1, 2, 3]);
//!
//! let handle = bridge.array_to_info(&col)?;
//! let back = bridge.info_to_array(&handle, &col.array_type())?;
//! assert_arrays_equal(&back, &col);
//!
//! drop(handle);
//! engine.assert_no_leaks();
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;
pub mod leak_counter;

pub use assertions::*;
pub use fixtures::*;
pub use leak_counter::*;
