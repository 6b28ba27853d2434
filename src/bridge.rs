//! The entry object every conversion and operator call goes through.

use crate::error::{BridgeError, BridgeResult};
use crate::handle::{ArrayHandle, ShuffleInfoHandle, TableHandle};
use crate::ids::{ArrayId, ShuffleInfoId, TableId};
use crate::metrics::{MetricsCollector, NATIVE_FAILURES};
use crate::native::NativeEngine;
use std::sync::Arc;
use tracing::debug;

/// Binds a native engine to the conversion and operator surface.
///
/// Cloning is cheap; clones share the engine and the metrics collector.
#[derive(Clone)]
pub struct Bridge {
    engine: Arc<dyn NativeEngine>,
    metrics: Option<MetricsCollector>,
}

impl Bridge {
    pub fn new(engine: Arc<dyn NativeEngine>) -> Self {
        Self {
            engine,
            metrics: None,
        }
    }

    /// Like [`Bridge::new`], counting boundary crossings into `metrics`.
    pub fn with_metrics(engine: Arc<dyn NativeEngine>, metrics: MetricsCollector) -> Self {
        Self {
            engine,
            metrics: Some(metrics),
        }
    }

    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    pub fn metrics(&self) -> Option<&MetricsCollector> {
        self.metrics.as_ref()
    }

    pub(crate) fn bump(&self, name: &str, by: u64) {
        if let Some(m) = &self.metrics {
            m.increment_counter(name, by);
        }
    }

    /// Convert a native result, counting and logging failures.
    pub(crate) fn call<T>(&self, entry: &str, result: anyhow::Result<T>) -> BridgeResult<T> {
        result.map_err(|e| {
            self.bump(NATIVE_FAILURES, 1);
            debug!(entry, error = %format!("{e:#}"), "native call failed");
            BridgeError::native(&e).with_source(entry)
        })
    }

    pub(crate) fn wrap_array(&self, id: ArrayId) -> ArrayHandle {
        ArrayHandle::from_raw(id, Arc::clone(&self.engine))
    }

    pub(crate) fn wrap_table(&self, id: TableId) -> TableHandle {
        TableHandle::from_raw(id, Arc::clone(&self.engine))
    }

    pub(crate) fn wrap_shuffle_info(&self, id: ShuffleInfoId) -> ShuffleInfoHandle {
        ShuffleInfoHandle::from_raw(id, Arc::clone(&self.engine))
    }

    /// `(rows, columns)` of a table.
    ///
    /// # Errors
    /// `NativeOperationFailure` if the engine does not know the table.
    pub fn table_shape(&self, table: &TableHandle) -> BridgeResult<(usize, usize)> {
        let (rows, cols) = self.call("table_shape", self.engine.table_shape(table.id()))?;
        Ok((rows as usize, cols as usize))
    }

    /// Number of elements in a native array.
    ///
    /// # Errors
    /// `NativeOperationFailure` if the engine does not know the array.
    pub fn array_len(&self, array: &ArrayHandle) -> BridgeResult<usize> {
        Ok(self.call("array_length", self.engine.array_length(array.id()))? as usize)
    }
}
