//! Boundary-crossing counters.
//!
//! A [`Bridge`](crate::Bridge) built with [`Bridge::with_metrics`](crate::Bridge::with_metrics)
//! bumps the built-in counters below on every export, import, table assembly
//! and operator call. Callers can register their own [`Metric`]s on the same
//! collector and report everything together.
//!
//! ```no_run
//! use tablebridge::metrics::{MetricsCollector, ARRAYS_EXPORTED};
//!
//! # fn main() -> anyhow::Result<()> {
//! let metrics = MetricsCollector::new();
//! metrics.increment_counter(ARRAYS_EXPORTED, 1);
//! metrics.print();
//! metrics.save_to_file("bridge-metrics.json")?;
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const ARRAYS_EXPORTED: &str = "arrays_exported";
pub const ARRAYS_IMPORTED: &str = "arrays_imported";
pub const TABLES_CREATED: &str = "tables_created";
pub const OPERATOR_CALLS: &str = "operator_calls";
pub const NATIVE_FAILURES: &str = "native_failures";

/// A named value that can be reported as JSON.
pub trait Metric: Send + Sync + Any {
    fn name(&self) -> &str;

    fn value(&self) -> Value;

    fn description(&self) -> Option<&str> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// Thread-safe, cheaply cloneable metric registry.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    inner: Arc<Mutex<HashMap<String, Box<dyn Metric>>>>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Box<dyn Metric>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a metric, replacing any metric of the same name.
    pub fn register(&self, metric: Box<dyn Metric>) {
        self.lock().insert(metric.name().to_string(), metric);
    }

    /// Add `by` to a counter, creating it at zero first if needed.
    ///
    /// A non-counter metric registered under `name` is left alone.
    pub fn increment_counter(&self, name: &str, by: u64) {
        let mut inner = self.lock();
        let current = match inner.get(name) {
            Some(m) => match m.as_any().downcast_ref::<CounterMetric>() {
                Some(c) => c.count,
                None => return,
            },
            None => 0,
        };
        inner.insert(
            name.to_string(),
            Box::new(CounterMetric::with_value(name, current + by)),
        );
    }

    /// Current value of a counter, zero when it was never bumped.
    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        self.lock()
            .get(name)
            .and_then(|m| m.as_any().downcast_ref::<CounterMetric>())
            .map_or(0, |c| c.count)
    }

    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.lock()
            .iter()
            .map(|(name, m)| (name.clone(), m.value()))
            .collect()
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        let inner = self.lock();
        let mut out = serde_json::Map::new();
        for (name, metric) in inner.iter() {
            let mut obj = serde_json::Map::new();
            obj.insert("value".to_string(), metric.value());
            if let Some(desc) = metric.description() {
                obj.insert("description".to_string(), json!(desc));
            }
            out.insert(name.clone(), Value::Object(obj));
        }
        Value::Object(out)
    }

    pub fn print(&self) {
        println!("\n=========== Bridge Metrics ===========");
        let inner = self.lock();
        let mut sorted: Vec<_> = inner.iter().collect();
        sorted.sort_by_key(|(name, _)| *name);
        for (name, metric) in sorted {
            match metric.description() {
                Some(desc) => println!("{name}: {} ({desc})", metric.value()),
                None => println!("{name}: {}", metric.value()),
            }
        }
        drop(inner);
        println!("======================================\n");
    }

    /// Write [`to_json`](Self::to_json) to `path`, pretty-printed.
    ///
    /// # Errors
    /// If the file cannot be created or written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let formatted = serde_json::to_string_pretty(&self.to_json())?;
        let mut file = File::create(path)?;
        file.write_all(formatted.as_bytes())?;
        Ok(())
    }
}

/// Monotonic counter.
pub struct CounterMetric {
    name: String,
    count: u64,
}

impl CounterMetric {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_value(name, 0)
    }

    pub fn with_value(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

impl Metric for CounterMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!(self.count)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Point-in-time numeric value.
pub struct GaugeMetric {
    name: String,
    value: f64,
    description: Option<String>,
}

impl GaugeMetric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Metric for GaugeMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!(self.value)
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
