//! Batch run of the full event -> dense grid pipeline.

use std::env;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::aggregate::{aggregate_sales, annotate_events, NormalizedEvent, ProductDaySales};
use crate::calendar::{add_calendar_fields, CampaignCalendar, TimeOffset};
use crate::catalog::{extract_catalog, ProductCatalog};
use crate::events::RawEvent;
use crate::grid::{
    build_grid_schema, fill_dense_grid, DenseGridFiller, DenseGridRow, GridSchema,
    GRID_SCHEMA_VERSION,
};
use crate::monetary::{normalize_monetary, MonetaryReport};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed timestamp in row {row}, column {column}: '{value}' is not an integer")]
    MalformedTimestamp {
        row: usize,
        column: &'static str,
        value: String,
    },
    #[error("malformed monetary value in row {row}, column {column}: '{value}' is not a finite number")]
    MalformedMonetaryValue {
        row: usize,
        column: &'static str,
        value: String,
    },
    #[error("input is missing required columns: {missing:?}")]
    Schema { missing: Vec<String> },
    #[error("date {date} has no entry in the campaign calendar")]
    IncompleteCalendarMapping { date: NaiveDate },
    #[error("event in row {row} has no catalog entry for its product tuple")]
    UnknownProduct { row: usize },
    #[error("input contains no events")]
    EmptyInput,
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub time_offset: TimeOffset,
    pub schema_version: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            time_offset: TimeOffset::default(),
            schema_version: GRID_SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineReport {
    pub input_events: u64,
    pub distinct_products: u64,
    pub distinct_dates: u64,
    pub first_day: Option<NaiveDate>,
    pub last_day: Option<NaiveDate>,
    pub sparse_rows: u64,
    pub grid_rows: u64,
    pub zero_filled_rows: u64,
    pub monetary: MonetaryReport,
}

#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub schema: GridSchema,
    pub catalog: ProductCatalog,
    pub events: Vec<NormalizedEvent>,
    pub calendar: CampaignCalendar,
    pub product_sales: Vec<ProductDaySales>,
    pub report: EngineReport,
}

impl EngineOutput {
    pub fn grid_filler(&self) -> Result<DenseGridFiller<'_>, EngineError> {
        DenseGridFiller::new(
            &self.product_sales,
            self.catalog.product_ids(),
            self.calendar.dates(),
            &self.calendar,
        )
    }

    pub fn expected_grid_rows(&self) -> u64 {
        self.catalog.len() as u64 * self.calendar.len() as u64
    }
}

pub fn engine_config_from_env() -> EngineConfig {
    let mut config = EngineConfig::default();

    if let Some(days) = env_i64("SALESGRID_TZ_OFFSET_DAYS") {
        config.time_offset.days = days;
    }
    if let Some(hours) = env_i64("SALESGRID_TZ_OFFSET_HOURS") {
        config.time_offset.hours = hours;
    }
    if let Some(minutes) = env_i64("SALESGRID_TZ_OFFSET_MINUTES") {
        config.time_offset.minutes = minutes;
    }

    config
}

fn env_i64(key: &str) -> Option<i64> {
    env::var(key).ok()?.trim().parse().ok()
}

fn validate_config(cfg: &EngineConfig) -> Result<(), EngineError> {
    if cfg.schema_version != GRID_SCHEMA_VERSION {
        return Err(EngineError::InvalidConfig(format!(
            "schema_version must equal GRID_SCHEMA_VERSION ({GRID_SCHEMA_VERSION})"
        )));
    }
    cfg.time_offset.validate()
}

pub fn prepare_product_days(
    events: Vec<RawEvent>,
    cfg: &EngineConfig,
) -> Result<EngineOutput, EngineError> {
    validate_config(cfg)?;
    if events.is_empty() {
        return Err(EngineError::EmptyInput);
    }

    let input_events = events.len() as u64;
    info!(
        component = "engine",
        event = "engine.run.start",
        input_events,
        offset_minutes = cfg.time_offset.total_minutes(),
        schema_version = cfg.schema_version
    );

    let schema = build_grid_schema(cfg.schema_version, &cfg.time_offset);
    let timed = add_calendar_fields(events, &cfg.time_offset)?;
    let catalog = extract_catalog(&timed);
    let calendar = CampaignCalendar::from_dates(timed.iter().map(|event| event.calendar.date))?;
    let (priced, monetary) = normalize_monetary(timed)?;
    let events = annotate_events(priced, &catalog, &calendar)?;
    let product_sales = aggregate_sales(&events);

    let report = EngineReport {
        input_events,
        distinct_products: catalog.len() as u64,
        distinct_dates: calendar.len() as u64,
        first_day: Some(calendar.first_day()),
        last_day: Some(calendar.last_day()),
        sparse_rows: product_sales.len() as u64,
        grid_rows: 0,
        zero_filled_rows: 0,
        monetary,
    };

    Ok(EngineOutput {
        schema,
        catalog,
        events,
        calendar,
        product_sales,
        report,
    })
}

pub fn run_engine(
    events: Vec<RawEvent>,
    cfg: &EngineConfig,
) -> Result<(EngineOutput, Vec<DenseGridRow>), EngineError> {
    let mut output = prepare_product_days(events, cfg)?;
    let grid = fill_dense_grid(
        &output.product_sales,
        output.catalog.product_ids(),
        output.calendar.dates(),
        &output.calendar,
    )?;

    output.report.grid_rows = grid.len() as u64;
    output.report.zero_filled_rows = grid
        .iter()
        .filter(|row| row.number_of_clicks == 0)
        .count() as u64;
    log_run_finish(&output.report);

    Ok((output, grid))
}

pub fn log_run_finish(report: &EngineReport) {
    info!(
        component = "engine",
        event = "engine.run.finish",
        input_events = report.input_events,
        distinct_products = report.distinct_products,
        distinct_dates = report.distinct_dates,
        sparse_rows = report.sparse_rows,
        grid_rows = report.grid_rows,
        zero_filled_rows = report.zero_filled_rows,
        sentinel_sales = report.monetary.sentinel_sales,
        clamped_sales = report.monetary.clamped_sales
    );
}
