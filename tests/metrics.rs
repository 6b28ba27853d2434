// tests/metrics.rs
use anyhow::Result;
use std::sync::Arc;
use tablebridge::metrics::*;
use tablebridge::testing::*;
use tablebridge::*;
use tempfile::TempDir;


fn metered_bridge() -> (Bridge, MetricsCollector) {
    let metrics = MetricsCollector::new();
    let engine = Arc::new(LocalEngine::new(EngineConfig::default().with_workers(2)).unwrap_or_default());
    (Bridge::with_metrics(engine, metrics.clone()), metrics)
}

#[test]
fn boundary_crossings_are_counted() -> Result<()> {
    let (bridge, metrics) = metered_bridge();
    let keys = bridge.array_to_info(&int_column(&[3, 1, 2]))?;
    let payload = bridge.array_to_info(&str_column(&[Some("c"), Some("a"), Some("b")]))?;
    assert_eq!(metrics.counter(ARRAYS_EXPORTED), 2);

    let back = bridge.info_to_array(&keys, &ArrayType::Primitive(PrimitiveType::Int64))?;
    assert_eq!(back.len(), 3);
    assert_eq!(metrics.counter(ARRAYS_IMPORTED), 1);

    let t = bridge.make_table(vec![keys, payload])?;
    assert_eq!(metrics.counter(TABLES_CREATED), 1);

    bridge.sort_values_table(&t, &SortOptions::ascending(1), None)?;
    bridge.drop_duplicates_table(&t, false, 1, KeepPolicy::First, false, false)?;
    assert_eq!(metrics.counter(OPERATOR_CALLS), 2);
    assert_eq!(metrics.counter(NATIVE_FAILURES), 0);

    assert_err_kind!(bridge.sample_table(&t, Some(10), 0.0, false, false), NativeOperationFailure);
    assert_eq!(metrics.counter(OPERATOR_CALLS), 3);
    assert_eq!(metrics.counter(NATIVE_FAILURES), 1);
    Ok(())
}

#[test]
fn clones_share_one_collector() -> Result<()> {
    let (bridge, metrics) = metered_bridge();
    let other = bridge.clone();
    other.array_to_info(&int_column(&[1]))?;
    bridge.array_to_info(&int_column(&[2]))?;
    assert_eq!(metrics.counter(ARRAYS_EXPORTED), 2);
    Ok(())
}

#[test]
fn plain_bridge_keeps_no_metrics() -> Result<()> {
    let (bridge, _engine) = test_bridge(1);
    bridge.array_to_info(&int_column(&[1]))?;
    assert!(bridge.metrics().is_none());
    Ok(())
}

#[test]
fn custom_metrics_report_alongside_counters() -> Result<()> {
    let metrics = MetricsCollector::new();
    metrics.register(Box::new(CounterMetric::with_value("batches", 4)));
    metrics.register(Box::new(
        GaugeMetric::new("fill_ratio", 0.75).with_description("rows per slot"),
    ));
    metrics.increment_counter("batches", 2);
    // gauges are not counters and stay untouched
    metrics.increment_counter("fill_ratio", 1);

    assert_eq!(metrics.counter("batches"), 6);
    assert_eq!(metrics.counter("fill_ratio"), 0);
    let snap = metrics.snapshot();
    assert_eq!(snap["batches"], serde_json::json!(6));
    assert_approx_eq!(snap["fill_ratio"].as_f64().unwrap_or_default(), 0.75);

    let json = metrics.to_json();
    assert_eq!(json["fill_ratio"]["description"], "rows per slot");
    assert!(json["batches"].get("description").is_none());
    Ok(())
}

#[test]
fn save_to_file_writes_pretty_json() -> Result<()> {
    let (bridge, metrics) = metered_bridge();
    bridge.array_to_info(&int_column(&[1, 2]))?;

    let dir = TempDir::new()?;
    let path = dir.path().join("metrics.json");
    metrics.save_to_file(&path)?;

    let text = std::fs::read_to_string(&path)?;
    assert!(text.contains('\n'));
    let parsed: serde_json::Value = serde_json::from_str(&text)?;
    assert_eq!(parsed[ARRAYS_EXPORTED]["value"], 1);
    Ok(())
}
