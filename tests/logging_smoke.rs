use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use salesgrid::{
    log_app_start, log_io_selected, run_engine, split_by_date, EngineConfig, EngineError,
    FieldValue, LoggingConfig, ProductKey, RawEvent, TimeOffset, GRID_SCHEMA_VERSION,
};
use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

fn sample_event(timestamp: i64, sales: &str) -> RawEvent {
    RawEvent {
        click_timestamp: FieldValue::Int(timestamp),
        product: ProductKey {
            product_id: "P9".to_string(),
            brand: "northwind".to_string(),
            age_group: "adult".to_string(),
            gender: "unisex".to_string(),
            categories: std::array::from_fn(|i| format!("c{i}")),
            title: "steel bottle".to_string(),
        },
        sales_amount: FieldValue::from(sales),
        product_price: FieldValue::from("12"),
        device_type: "desktop".to_string(),
        audience_id: "aud".to_string(),
    }
}

fn utc_config() -> EngineConfig {
    EngineConfig {
        time_offset: TimeOffset::hours(0),
        schema_version: GRID_SCHEMA_VERSION,
    }
}

#[test]
fn engine_run_emits_stage_events_and_clamp_warning() {
    let events = vec![
        sample_event(1_704_103_200, "12"),
        sample_event(1_704_189_600, "-7"),
    ];

    let logs = capture_logs(Level::INFO, || {
        let (output, grid) = run_engine(events, &utc_config()).expect("engine should run");
        assert_eq!(grid.len(), 2);
        assert_eq!(output.report.monetary.clamped_sales, 1);
        split_by_date(grid, 0, 1);
    });

    for event in [
        "engine.run.start",
        "grid.schema.built",
        "calendar.fields.built",
        "catalog.extract.finish",
        "calendar.campaign.built",
        "monetary.normalize.finish",
        "aggregate.sales.finish",
        "grid.fill.finish",
        "engine.run.finish",
        "split.by_date.finish",
    ] {
        assert!(
            logs.contains(&format!("\"event\":\"{event}\"")),
            "missing {event} in {logs}"
        );
    }

    let clamp_line = logs
        .lines()
        .find(|line| line.contains("\"event\":\"monetary.sales.clamped\""))
        .expect("clamp warning should be logged");
    assert!(clamp_line.contains("\"level\":\"WARN\""));
    assert!(clamp_line.contains("\"clamped_sales\":1"));
}

#[test]
fn clean_feed_logs_no_clamp_warning() {
    let logs = capture_logs(Level::WARN, || {
        run_engine(vec![sample_event(1_704_103_200, "-1")], &utc_config())
            .expect("engine should run");
    });

    assert!(!logs.contains("monetary.sales.clamped"));
    assert!(!logs.contains("engine.run.finish"));
}

#[test]
fn failed_run_does_not_log_finish() {
    let logs = capture_logs(Level::INFO, || {
        let mut event = sample_event(1_704_103_200, "1");
        event.click_timestamp = FieldValue::from("yesterday");
        let err = run_engine(vec![event], &utc_config()).expect_err("timestamp should fail");
        assert!(matches!(err, EngineError::MalformedTimestamp { row: 0, .. }));
    });

    assert!(logs.contains("\"event\":\"engine.run.start\""));
    assert!(!logs.contains("\"event\":\"engine.run.finish\""));
}

#[test]
fn binary_lifecycle_helpers_emit_baseline_events() {
    let logs = capture_logs(Level::INFO, || {
        let cfg = LoggingConfig::default();
        log_app_start(&cfg);
        log_io_selected("input", Path::new("clicks.tsv"), "criteo_tsv", false);
        log_io_selected("output", Path::new("grid.jsonl"), "jsonl", true);
    });

    assert!(logs.contains("\"event\":\"app.start\""));
    assert!(logs.contains("\"event\":\"io.selected\""));
    assert!(logs.contains("\"direction\":\"output\""));
    assert!(logs.contains("\"streamed\":true"));
}
